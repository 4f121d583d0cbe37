//! Compiled packet schemas.
//!
//! [`Schema::compile`] validates a [`PacketDecl`] once and produces an immutable,
//! ordered list of [`FieldDescriptor`]s. The descriptor order is the wire order:
//! there are no tags, no padding and no alignment. Each descriptor carries a closed
//! [`FieldKind`] that the codec dispatches on with a `match`.

use crate::ast::{FieldDecl, FieldForm, PacketDecl, SchemaFile};
use crate::custom::{CustomHandle, HookRegistry};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Upper bound on the bytes taken by a packet's fixed-size fields.
pub const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

/// Fixed-width unsigned element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    U16,
    U32,
}

impl ElementType {
    /// Width on the wire, in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 => 4,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "u8" => Some(ElementType::U8),
            "u16" => Some(ElementType::U16),
            "u32" => Some(ElementType::U32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a field is stored and marshalled.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Scalar(ElementType),
    Array(ElementType, usize),
    PointerScalar(ElementType),
    PointerArray(ElementType, usize),
    Custom(CustomHandle),
}

impl FieldKind {
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            FieldKind::Scalar(t)
            | FieldKind::Array(t, _)
            | FieldKind::PointerScalar(t)
            | FieldKind::PointerArray(t, _) => Some(*t),
            FieldKind::Custom(_) => None,
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        match self {
            FieldKind::Array(_, n) | FieldKind::PointerArray(_, n) => Some(*n),
            _ => None,
        }
    }

    /// Bytes on the wire; `None` for custom fields.
    pub fn wire_len(&self) -> Option<usize> {
        let width = self.element_type()?.width();
        Some(width * self.dimension().unwrap_or(1))
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Scalar(_) => "scalar",
            FieldKind::Array(..) => "array",
            FieldKind::PointerScalar(_) => "pointer",
            FieldKind::PointerArray(..) => "pointer array",
            FieldKind::Custom(_) => "custom",
        }
    }
}

/// One compiled field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

/// Static position of a field in the wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    /// Type as written in the DSL, e.g. `u16`, `u8[8]`, `&u32[4]`, `custom`.
    pub type_label: String,
    /// Byte offset; unknown once a custom field precedes it.
    pub offset: Option<usize>,
    /// Byte length; unknown for custom fields.
    pub len: Option<usize>,
}

/// Schema construction errors. No schema is produced when any of these is reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("packet name is empty")]
    EmptyPacketName,
    #[error("{packet}: field #{index} has an empty name")]
    EmptyFieldName { packet: String, index: usize },
    #[error("{packet}: duplicate field {field}")]
    DuplicateField { packet: String, field: String },
    #[error("{packet}.{field}: unsupported type {type_name:?} (expected u8, u16 or u32)")]
    UnsupportedType {
        packet: String,
        field: String,
        type_name: String,
    },
    #[error("{packet}.{field}: dimension must be positive (got {dimension})")]
    InvalidDimension {
        packet: String,
        field: String,
        dimension: i64,
    },
    #[error("{packet}.{field}: custom fields take no dimension")]
    UnexpectedDimension { packet: String, field: String },
    #[error("{packet}.{field}: no hook registered for custom field")]
    MissingCustomHook { packet: String, field: String },
    #[error("{packet}.{field}: packet exceeds {limit} bytes")]
    TooLarge {
        packet: String,
        field: String,
        limit: usize,
    },
    #[error("duplicate packet {0}")]
    DuplicatePacket(String),
}

/// An immutable, validated packet schema.
#[derive(Debug)]
pub struct Schema {
    name: String,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
    fixed_len: Option<usize>,
}

impl Schema {
    /// Validate `decl` and build the schema, failing on the first problem found.
    pub fn compile(decl: &PacketDecl, hooks: &HookRegistry) -> Result<Self, SchemaError> {
        let mut errors = Vec::new();
        let fields = build_fields(decl, hooks, &mut errors);
        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let fixed_len = fields
            .iter()
            .map(|f| f.kind.wire_len())
            .sum::<Option<usize>>();
        debug!(
            packet = %decl.name,
            fields = fields.len(),
            fixed_len = ?fixed_len,
            "compiled packet schema"
        );
        Ok(Schema {
            name: decl.name.clone(),
            fields,
            by_name,
            fixed_len,
        })
    }

    /// Every problem with `decl`, in declaration order. Empty when [`Schema::compile`] would succeed.
    pub fn validate(decl: &PacketDecl, hooks: &HookRegistry) -> Vec<SchemaError> {
        let mut errors = Vec::new();
        build_fields(decl, hooks, &mut errors);
        errors
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total wire length, known statically when the schema has no custom field.
    pub fn fixed_len(&self) -> Option<usize> {
        self.fixed_len
    }

    /// Bytes taken by all non-custom fields.
    pub fn static_len(&self) -> usize {
        self.fields.iter().filter_map(|f| f.kind.wire_len()).sum()
    }

    pub fn has_custom_fields(&self) -> bool {
        self.fixed_len.is_none()
    }

    pub fn has_pointer_fields(&self) -> bool {
        self.fields.iter().any(|f| {
            matches!(
                f.kind,
                FieldKind::PointerScalar(_) | FieldKind::PointerArray(..)
            )
        })
    }

    /// Offsets and lengths of every field, in wire order.
    pub fn layout(&self) -> Vec<FieldLayout> {
        let mut offset = Some(0usize);
        self.fields
            .iter()
            .map(|f| {
                let len = f.kind.wire_len();
                let entry = FieldLayout {
                    name: f.name.clone(),
                    type_label: type_label(&f.kind),
                    offset,
                    len,
                };
                offset = offset.zip(len).map(|(o, l)| o + l);
                entry
            })
            .collect()
    }
}

fn type_label(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Scalar(t) => t.to_string(),
        FieldKind::Array(t, n) => format!("{}[{}]", t, n),
        FieldKind::PointerScalar(t) => format!("&{}", t),
        FieldKind::PointerArray(t, n) => format!("&{}[{}]", t, n),
        FieldKind::Custom(_) => "custom".to_string(),
    }
}

fn build_fields(
    decl: &PacketDecl,
    hooks: &HookRegistry,
    errors: &mut Vec<SchemaError>,
) -> Vec<FieldDescriptor> {
    if decl.name.is_empty() {
        errors.push(SchemaError::EmptyPacketName);
    }
    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(decl.fields.len());
    // Bytes taken by fixed-size fields so far; `None` once past the limit.
    let mut static_len = Some(0usize);
    for (index, f) in decl.fields.iter().enumerate() {
        if f.name.is_empty() {
            errors.push(SchemaError::EmptyFieldName {
                packet: decl.name.clone(),
                index,
            });
            continue;
        }
        if !seen.insert(f.name.as_str()) {
            errors.push(SchemaError::DuplicateField {
                packet: decl.name.clone(),
                field: f.name.clone(),
            });
            continue;
        }
        match resolve_kind(&decl.name, f, hooks) {
            Ok(kind) => {
                if let (Some(total), Some(len)) = (static_len, kind.wire_len()) {
                    static_len = total.checked_add(len).filter(|&t| t <= MAX_PACKET_LEN);
                    if static_len.is_none() {
                        errors.push(SchemaError::TooLarge {
                            packet: decl.name.clone(),
                            field: f.name.clone(),
                            limit: MAX_PACKET_LEN,
                        });
                    }
                }
                fields.push(FieldDescriptor {
                    name: f.name.clone(),
                    kind,
                });
            }
            Err(e) => errors.push(e),
        }
    }
    fields
}

/// Pick the field kind from its form and the presence of a dimension.
fn resolve_kind(packet: &str, f: &FieldDecl, hooks: &HookRegistry) -> Result<FieldKind, SchemaError> {
    if f.form == FieldForm::Custom {
        if f.dimension.is_some() {
            return Err(SchemaError::UnexpectedDimension {
                packet: packet.to_string(),
                field: f.name.clone(),
            });
        }
        return hooks
            .lookup(packet, &f.name)
            .cloned()
            .map(FieldKind::Custom)
            .ok_or_else(|| SchemaError::MissingCustomHook {
                packet: packet.to_string(),
                field: f.name.clone(),
            });
    }
    let ty = ElementType::from_name(&f.type_name).ok_or_else(|| SchemaError::UnsupportedType {
        packet: packet.to_string(),
        field: f.name.clone(),
        type_name: f.type_name.clone(),
    })?;
    let dimension = match f.dimension {
        None => None,
        Some(d) => Some(
            usize::try_from(d)
                .ok()
                .filter(|&n| n > 0 && n.checked_mul(ty.width()).is_some())
                .ok_or_else(|| SchemaError::InvalidDimension {
                    packet: packet.to_string(),
                    field: f.name.clone(),
                    dimension: d,
                })?,
        ),
    };
    Ok(match (f.form, dimension) {
        (FieldForm::Pointer, Some(n)) => FieldKind::PointerArray(ty, n),
        (FieldForm::Pointer, None) => FieldKind::PointerScalar(ty),
        (_, Some(n)) => FieldKind::Array(ty, n),
        (_, None) => FieldKind::Scalar(ty),
    })
}

/// All packets of a schema file, compiled against one hook registry.
#[derive(Debug)]
pub struct SchemaSet {
    schemas: Vec<Schema>,
    by_name: HashMap<String, usize>,
}

impl SchemaSet {
    pub fn resolve(file: &SchemaFile, hooks: &HookRegistry) -> Result<Self, SchemaError> {
        let mut schemas = Vec::with_capacity(file.packets.len());
        let mut by_name = HashMap::new();
        for packet in &file.packets {
            if by_name.insert(packet.name.clone(), schemas.len()).is_some() {
                return Err(SchemaError::DuplicatePacket(packet.name.clone()));
            }
            schemas.push(Schema::compile(packet, hooks)?);
        }
        for key in hooks.keys() {
            let used = schemas.iter().any(|s| {
                s.fields().iter().any(|f| {
                    matches!(f.kind, FieldKind::Custom(_))
                        && (key == f.name || key == format!("{}.{}", s.name(), f.name))
                })
            });
            if !used {
                warn!(hook = key, "registered hook matches no custom field");
            }
        }
        Ok(SchemaSet { schemas, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.by_name.get(name).map(|&i| &self.schemas[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(Schema::name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FieldDecl;
    use crate::custom::FnField;
    use crate::codec::CodecError;

    fn packet(fields: Vec<FieldDecl>) -> PacketDecl {
        PacketDecl::new("msg", fields)
    }

    #[test]
    fn resolves_kinds_from_form_and_dimension() {
        let decl = packet(vec![
            FieldDecl::scalar("u16", "a"),
            FieldDecl::array("u8", "b", 32),
            FieldDecl::pointer("u32", "c"),
            FieldDecl::pointer_array("u16", "d", 4),
        ]);
        let schema = Schema::compile(&decl, &HookRegistry::new()).expect("compile");
        let kinds: Vec<_> = schema.fields().iter().map(|f| f.kind.name()).collect();
        assert_eq!(kinds, ["scalar", "array", "pointer", "pointer array"]);
        assert_eq!(schema.fixed_len(), Some(2 + 32 + 4 + 8));
        assert!(schema.has_pointer_fields());
        assert_eq!(schema.index_of("c"), Some(2));
    }

    #[test]
    fn rejects_empty_and_duplicate_names() {
        let decl = packet(vec![
            FieldDecl::scalar("u8", ""),
            FieldDecl::scalar("u8", "a"),
            FieldDecl::scalar("u16", "a"),
        ]);
        let errors = Schema::validate(&decl, &HookRegistry::new());
        assert_eq!(
            errors,
            vec![
                SchemaError::EmptyFieldName { packet: "msg".into(), index: 0 },
                SchemaError::DuplicateField { packet: "msg".into(), field: "a".into() },
            ]
        );
        assert_eq!(
            Schema::compile(&decl, &HookRegistry::new()).unwrap_err(),
            errors[0]
        );
    }

    #[test]
    fn rejects_unsupported_types_and_bad_dimensions() {
        let hooks = HookRegistry::new();
        let err = Schema::compile(&packet(vec![FieldDecl::scalar("u64", "x")]), &hooks).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedType { ref type_name, .. } if type_name == "u64"));

        for dim in [0, -3] {
            let err = Schema::compile(&packet(vec![FieldDecl::array("u8", "x", dim)]), &hooks).unwrap_err();
            assert_eq!(
                err,
                SchemaError::InvalidDimension { packet: "msg".into(), field: "x".into(), dimension: dim }
            );
            let err = Schema::compile(&packet(vec![FieldDecl::pointer_array("u8", "x", dim)]), &hooks).unwrap_err();
            assert!(matches!(err, SchemaError::InvalidDimension { .. }));
        }
    }

    #[test]
    fn rejects_packets_past_the_size_limit() {
        let huge = (1i64 << 62) - 1;
        let decl = packet(vec![
            FieldDecl::array("u32", "a", huge),
            FieldDecl::array("u32", "b", huge),
        ]);
        let errors = Schema::validate(&decl, &HookRegistry::new());
        assert!(matches!(
            errors.as_slice(),
            [SchemaError::TooLarge { field, limit: MAX_PACKET_LEN, .. }] if field == "a"
        ));
        assert_eq!(Schema::compile(&decl, &HookRegistry::new()).unwrap_err(), errors[0]);

        let decl = packet(vec![
            FieldDecl::array("u8", "a", MAX_PACKET_LEN as i64 - 1),
            FieldDecl::scalar("u16", "b"),
        ]);
        let errors = Schema::validate(&decl, &HookRegistry::new());
        assert!(matches!(errors.as_slice(), [SchemaError::TooLarge { field, .. }] if field == "b"));

        let decl = packet(vec![FieldDecl::array("u8", "a", MAX_PACKET_LEN as i64)]);
        let schema = Schema::compile(&decl, &HookRegistry::new()).expect("at the limit");
        assert_eq!(schema.fixed_len(), Some(MAX_PACKET_LEN));
    }

    #[test]
    fn schema_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Schema>();
        assert_send_sync::<SchemaSet>();
        assert_send_sync::<HookRegistry>();
    }

    #[test]
    fn rejects_empty_packet_name() {
        let decl = PacketDecl::new("", vec![FieldDecl::scalar("u8", "a")]);
        assert_eq!(
            Schema::compile(&decl, &HookRegistry::new()).unwrap_err(),
            SchemaError::EmptyPacketName
        );
    }

    #[test]
    fn custom_fields_need_a_hook() {
        let decl = packet(vec![FieldDecl::scalar("u8", "a"), FieldDecl::custom("stamp")]);
        let err = Schema::compile(&decl, &HookRegistry::new()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingCustomHook { packet: "msg".into(), field: "stamp".into() }
        );

        let mut hooks = HookRegistry::new();
        hooks.register(
            "stamp",
            FnField::new(
                |_: &mut [u8], _: usize, _: &u8| -> Result<usize, CodecError> { Ok(0) },
                |_: &[u8], _: usize, _: &mut u8| -> Result<usize, CodecError> { Ok(0) },
            ),
        );
        let schema = Schema::compile(&decl, &hooks).expect("compile");
        assert_eq!(schema.fixed_len(), None);
        assert_eq!(schema.static_len(), 1);
        assert!(schema.has_custom_fields());

        let mut with_dim = FieldDecl::custom("stamp");
        with_dim.dimension = Some(2);
        let err = Schema::compile(&packet(vec![with_dim]), &hooks).unwrap_err();
        assert!(matches!(err, SchemaError::UnexpectedDimension { .. }));
    }

    #[test]
    fn layout_offsets_stop_after_custom_field() {
        let mut hooks = HookRegistry::new();
        hooks.register(
            "stamp",
            FnField::new(
                |_: &mut [u8], _: usize, _: &u8| -> Result<usize, CodecError> { Ok(0) },
                |_: &[u8], _: usize, _: &mut u8| -> Result<usize, CodecError> { Ok(0) },
            ),
        );
        let decl = packet(vec![
            FieldDecl::scalar("u16", "seqn"),
            FieldDecl::array("u8", "arr", 3),
            FieldDecl::custom("stamp"),
            FieldDecl::scalar("u8", "tail"),
        ]);
        let layout = Schema::compile(&decl, &hooks).expect("compile").layout();
        let offsets: Vec<_> = layout.iter().map(|l| l.offset).collect();
        assert_eq!(offsets, [Some(0), Some(2), Some(5), None]);
        assert_eq!(layout[1].type_label, "u8[3]");
        assert_eq!(layout[2].len, None);
    }

    #[test]
    fn schema_set_rejects_duplicate_packets() {
        let file = SchemaFile {
            packets: vec![
                PacketDecl::new("a", vec![FieldDecl::scalar("u8", "x")]),
                PacketDecl::new("a", vec![FieldDecl::scalar("u8", "y")]),
            ],
        };
        let err = SchemaSet::resolve(&file, &HookRegistry::new()).unwrap_err();
        assert_eq!(err, SchemaError::DuplicatePacket("a".into()));
    }
}
