//! Records: the in-memory form of one packet, one storage slot per schema field.
//!
//! Scalar and array slots own their values. Pointer slots borrow caller memory as
//! `Cell`s for the record's lifetime `'a`: the caller keeps its own alias, the
//! encoder reads through it and the decoder writes through it. Pointer slots start
//! unbound; encoding or decoding an unbound one fails with
//! [`CodecError::NullPointerField`].

use crate::codec::CodecError;
use crate::schema::{ElementType, FieldKind, Schema};
use std::any::Any;
use std::cell::Cell;
use std::fmt;

/// A single unsigned value of one of the supported widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
}

impl Value {
    pub fn zero(ty: ElementType) -> Self {
        match ty {
            ElementType::U8 => Value::U8(0),
            ElementType::U16 => Value::U16(0),
            ElementType::U32 => Value::U32(0),
        }
    }

    /// `v` as a value of type `ty`, if it fits.
    pub fn from_u32(ty: ElementType, v: u32) -> Option<Self> {
        match ty {
            ElementType::U8 => u8::try_from(v).ok().map(Value::U8),
            ElementType::U16 => u16::try_from(v).ok().map(Value::U16),
            ElementType::U32 => Some(Value::U32(v)),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Value::U8(_) => ElementType::U8,
            Value::U16(_) => ElementType::U16,
            Value::U32(_) => ElementType::U32,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Value::U8(x) => *x as u32,
            Value::U16(x) => *x as u32,
            Value::U32(x) => *x,
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

/// Owned array contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elements {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Elements {
    pub fn zeroed(ty: ElementType, len: usize) -> Self {
        match ty {
            ElementType::U8 => Elements::U8(vec![0; len]),
            ElementType::U16 => Elements::U16(vec![0; len]),
            ElementType::U32 => Elements::U32(vec![0; len]),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Elements::U8(_) => ElementType::U8,
            Elements::U16(_) => ElementType::U16,
            Elements::U32(_) => ElementType::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Elements::U8(v) => v.len(),
            Elements::U16(v) => v.len(),
            Elements::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Value> {
        match self {
            Elements::U8(v) => v.get(i).copied().map(Value::U8),
            Elements::U16(v) => v.get(i).copied().map(Value::U16),
            Elements::U32(v) => v.get(i).copied().map(Value::U32),
        }
    }

    pub fn to_values(&self) -> Vec<Value> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

impl From<Vec<u8>> for Elements {
    fn from(v: Vec<u8>) -> Self {
        Elements::U8(v)
    }
}

impl From<Vec<u16>> for Elements {
    fn from(v: Vec<u16>) -> Self {
        Elements::U16(v)
    }
}

impl From<Vec<u32>> for Elements {
    fn from(v: Vec<u32>) -> Self {
        Elements::U32(v)
    }
}

impl<const N: usize> From<[u8; N]> for Elements {
    fn from(v: [u8; N]) -> Self {
        Elements::U8(v.to_vec())
    }
}

impl<const N: usize> From<[u16; N]> for Elements {
    fn from(v: [u16; N]) -> Self {
        Elements::U16(v.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for Elements {
    fn from(v: [u32; N]) -> Self {
        Elements::U32(v.to_vec())
    }
}

/// Borrowed single value in caller memory.
#[derive(Debug, Clone, Copy)]
pub enum CellRef<'a> {
    U8(&'a Cell<u8>),
    U16(&'a Cell<u16>),
    U32(&'a Cell<u32>),
}

impl CellRef<'_> {
    pub fn element_type(&self) -> ElementType {
        match self {
            CellRef::U8(_) => ElementType::U8,
            CellRef::U16(_) => ElementType::U16,
            CellRef::U32(_) => ElementType::U32,
        }
    }

    pub fn get(&self) -> Value {
        match self {
            CellRef::U8(c) => Value::U8(c.get()),
            CellRef::U16(c) => Value::U16(c.get()),
            CellRef::U32(c) => Value::U32(c.get()),
        }
    }

    /// Store `v` in the referent. Returns `false` (and stores nothing) on a type mismatch.
    pub fn set(&self, v: Value) -> bool {
        match (self, v) {
            (CellRef::U8(c), Value::U8(x)) => c.set(x),
            (CellRef::U16(c), Value::U16(x)) => c.set(x),
            (CellRef::U32(c), Value::U32(x)) => c.set(x),
            _ => return false,
        }
        true
    }
}

impl<'a> From<&'a Cell<u8>> for CellRef<'a> {
    fn from(c: &'a Cell<u8>) -> Self {
        CellRef::U8(c)
    }
}

impl<'a> From<&'a Cell<u16>> for CellRef<'a> {
    fn from(c: &'a Cell<u16>) -> Self {
        CellRef::U16(c)
    }
}

impl<'a> From<&'a Cell<u32>> for CellRef<'a> {
    fn from(c: &'a Cell<u32>) -> Self {
        CellRef::U32(c)
    }
}

impl<'a> From<&'a mut u8> for CellRef<'a> {
    fn from(v: &'a mut u8) -> Self {
        CellRef::U8(Cell::from_mut(v))
    }
}

impl<'a> From<&'a mut u16> for CellRef<'a> {
    fn from(v: &'a mut u16) -> Self {
        CellRef::U16(Cell::from_mut(v))
    }
}

impl<'a> From<&'a mut u32> for CellRef<'a> {
    fn from(v: &'a mut u32) -> Self {
        CellRef::U32(Cell::from_mut(v))
    }
}

/// Borrowed run of contiguous values in caller memory.
#[derive(Debug, Clone, Copy)]
pub enum CellSlice<'a> {
    U8(&'a [Cell<u8>]),
    U16(&'a [Cell<u16>]),
    U32(&'a [Cell<u32>]),
}

impl CellSlice<'_> {
    pub fn element_type(&self) -> ElementType {
        match self {
            CellSlice::U8(_) => ElementType::U8,
            CellSlice::U16(_) => ElementType::U16,
            CellSlice::U32(_) => ElementType::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CellSlice::U8(s) => s.len(),
            CellSlice::U16(s) => s.len(),
            CellSlice::U32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Value> {
        match self {
            CellSlice::U8(s) => s.get(i).map(|c| Value::U8(c.get())),
            CellSlice::U16(s) => s.get(i).map(|c| Value::U16(c.get())),
            CellSlice::U32(s) => s.get(i).map(|c| Value::U32(c.get())),
        }
    }
}

impl<'a> From<&'a [Cell<u8>]> for CellSlice<'a> {
    fn from(s: &'a [Cell<u8>]) -> Self {
        CellSlice::U8(s)
    }
}

impl<'a> From<&'a [Cell<u16>]> for CellSlice<'a> {
    fn from(s: &'a [Cell<u16>]) -> Self {
        CellSlice::U16(s)
    }
}

impl<'a> From<&'a [Cell<u32>]> for CellSlice<'a> {
    fn from(s: &'a [Cell<u32>]) -> Self {
        CellSlice::U32(s)
    }
}

impl<'a> From<&'a mut [u8]> for CellSlice<'a> {
    fn from(s: &'a mut [u8]) -> Self {
        CellSlice::U8(Cell::from_mut(s).as_slice_of_cells())
    }
}

impl<'a> From<&'a mut [u16]> for CellSlice<'a> {
    fn from(s: &'a mut [u16]) -> Self {
        CellSlice::U16(Cell::from_mut(s).as_slice_of_cells())
    }
}

impl<'a> From<&'a mut [u32]> for CellSlice<'a> {
    fn from(s: &'a mut [u32]) -> Self {
        CellSlice::U32(Cell::from_mut(s).as_slice_of_cells())
    }
}

/// Storage for one field.
pub enum Slot<'a> {
    Scalar(Value),
    Array(Elements),
    PointerScalar(Option<CellRef<'a>>),
    PointerArray(Option<CellSlice<'a>>),
    Custom(Box<dyn Any>),
}

impl fmt::Debug for Slot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Slot::Array(e) => f.debug_tuple("Array").field(e).finish(),
            Slot::PointerScalar(p) => f.debug_tuple("PointerScalar").field(p).finish(),
            Slot::PointerArray(p) => f.debug_tuple("PointerArray").field(p).finish(),
            Slot::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Slot<'_> {
    fn for_kind(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Scalar(t) => Slot::Scalar(Value::zero(*t)),
            FieldKind::Array(t, n) => Slot::Array(Elements::zeroed(*t, *n)),
            FieldKind::PointerScalar(_) => Slot::PointerScalar(None),
            FieldKind::PointerArray(..) => Slot::PointerArray(None),
            FieldKind::Custom(hook) => Slot::Custom(hook.new_value()),
        }
    }
}

/// One packet's worth of field values, tied to the schema it was created from.
#[derive(Debug)]
pub struct Record<'a> {
    schema: &'a Schema,
    slots: Vec<Slot<'a>>,
}

impl<'a> Record<'a> {
    /// Zeroed scalars and arrays, unbound pointers, default custom values.
    pub fn new(schema: &'a Schema) -> Self {
        let slots = schema
            .fields()
            .iter()
            .map(|f| Slot::for_kind(&f.kind))
            .collect();
        Record { schema, slots }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Slots in schema order.
    pub fn slots(&self) -> &[Slot<'a>] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot<'a>] {
        &mut self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&Slot<'a>> {
        self.schema.index_of(name).map(|i| &self.slots[i])
    }

    fn lookup(&self, name: &str) -> Result<(usize, &'a FieldKind), CodecError> {
        let schema = self.schema;
        let i = schema
            .index_of(name)
            .ok_or_else(|| CodecError::UnknownField(name.to_string()))?;
        Ok((i, &schema.fields()[i].kind))
    }

    /// Set a scalar field, or write through a bound pointer field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), CodecError> {
        let value = value.into();
        let (i, kind) = self.lookup(name)?;
        let expected = match kind {
            FieldKind::Scalar(t) | FieldKind::PointerScalar(t) => *t,
            other => return Err(kind_mismatch(name, other, "scalar")),
        };
        check_type(name, expected, value.element_type())?;
        match &mut self.slots[i] {
            Slot::Scalar(v) => *v = value,
            Slot::PointerScalar(Some(target)) => {
                target.set(value);
            }
            Slot::PointerScalar(None) => return Err(CodecError::NullPointerField(name.to_string())),
            _ => return Err(kind_mismatch(name, kind, "scalar")),
        }
        Ok(())
    }

    /// Value of a scalar field, read through the referent for pointer fields.
    pub fn get(&self, name: &str) -> Result<Value, CodecError> {
        let (i, kind) = self.lookup(name)?;
        match &self.slots[i] {
            Slot::Scalar(v) => Ok(*v),
            Slot::PointerScalar(Some(target)) => Ok(target.get()),
            Slot::PointerScalar(None) => Err(CodecError::NullPointerField(name.to_string())),
            _ => Err(kind_mismatch(name, kind, "scalar")),
        }
    }

    /// Replace an owned array. The length must equal the field's dimension.
    pub fn set_array(&mut self, name: &str, elements: impl Into<Elements>) -> Result<(), CodecError> {
        let elements = elements.into();
        let (i, kind) = self.lookup(name)?;
        let FieldKind::Array(ty, n) = kind else {
            return Err(kind_mismatch(name, kind, "array"));
        };
        check_type(name, *ty, elements.element_type())?;
        check_len(name, *n, elements.len(), elements.len() == *n)?;
        self.slots[i] = Slot::Array(elements);
        Ok(())
    }

    pub fn array(&self, name: &str) -> Result<&Elements, CodecError> {
        let (i, kind) = self.lookup(name)?;
        match &self.slots[i] {
            Slot::Array(e) => Ok(e),
            _ => Err(kind_mismatch(name, kind, "array")),
        }
    }

    /// Point a pointer field at caller memory.
    pub fn bind(&mut self, name: &str, target: impl Into<CellRef<'a>>) -> Result<(), CodecError> {
        let target = target.into();
        let (i, kind) = self.lookup(name)?;
        let FieldKind::PointerScalar(ty) = kind else {
            return Err(kind_mismatch(name, kind, "pointer"));
        };
        check_type(name, *ty, target.element_type())?;
        self.slots[i] = Slot::PointerScalar(Some(target));
        Ok(())
    }

    /// Point a pointer-array field at caller memory holding at least `dimension` elements.
    /// Only the first `dimension` elements are ever read or written.
    pub fn bind_slice(&mut self, name: &str, target: impl Into<CellSlice<'a>>) -> Result<(), CodecError> {
        let target = target.into();
        let (i, kind) = self.lookup(name)?;
        let FieldKind::PointerArray(ty, n) = kind else {
            return Err(kind_mismatch(name, kind, "pointer array"));
        };
        check_type(name, *ty, target.element_type())?;
        check_len(name, *n, target.len(), target.len() >= *n)?;
        self.slots[i] = Slot::PointerArray(Some(target));
        Ok(())
    }

    /// Values a pointer-array field currently refers to (first `dimension` elements).
    pub fn pointed_array(&self, name: &str) -> Result<Vec<Value>, CodecError> {
        let (i, kind) = self.lookup(name)?;
        match (&self.slots[i], kind) {
            (Slot::PointerArray(Some(target)), FieldKind::PointerArray(_, n)) => {
                Ok((0..*n).filter_map(|j| target.get(j)).collect())
            }
            (Slot::PointerArray(None), _) => Err(CodecError::NullPointerField(name.to_string())),
            _ => Err(kind_mismatch(name, kind, "pointer array")),
        }
    }

    pub fn set_custom<T: Any>(&mut self, name: &str, value: T) -> Result<(), CodecError> {
        let (i, kind) = self.lookup(name)?;
        let FieldKind::Custom(hook) = kind else {
            return Err(kind_mismatch(name, kind, "custom"));
        };
        if !hook.accepts::<T>() {
            return Err(CodecError::CustomValueType {
                field: name.to_string(),
                expected: hook.value_type_name(),
            });
        }
        self.slots[i] = Slot::Custom(Box::new(value));
        Ok(())
    }

    pub fn custom<T: Any>(&self, name: &str) -> Result<&T, CodecError> {
        let (i, kind) = self.lookup(name)?;
        match (&self.slots[i], kind) {
            (Slot::Custom(v), FieldKind::Custom(hook)) => {
                v.downcast_ref::<T>().ok_or_else(|| CodecError::CustomValueType {
                    field: name.to_string(),
                    expected: hook.value_type_name(),
                })
            }
            _ => Err(kind_mismatch(name, kind, "custom")),
        }
    }
}

fn kind_mismatch(field: &str, kind: &FieldKind, wanted: &'static str) -> CodecError {
    CodecError::KindMismatch {
        field: field.to_string(),
        kind: kind.name(),
        wanted,
    }
}

fn check_type(field: &str, expected: ElementType, found: ElementType) -> Result<(), CodecError> {
    if expected == found {
        Ok(())
    } else {
        Err(CodecError::TypeMismatch {
            field: field.to_string(),
            expected,
            found,
        })
    }
}

fn check_len(field: &str, expected: usize, found: usize, ok: bool) -> Result<(), CodecError> {
    if ok {
        Ok(())
    } else {
        Err(CodecError::LengthMismatch {
            field: field.to_string(),
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldDecl, PacketDecl};
    use crate::custom::HookRegistry;

    fn schema() -> Schema {
        let decl = PacketDecl::new(
            "msg",
            vec![
                FieldDecl::scalar("u16", "seqn"),
                FieldDecl::array("u8", "arr", 4),
                FieldDecl::pointer("u32", "p"),
                FieldDecl::pointer_array("u16", "pa", 2),
            ],
        );
        Schema::compile(&decl, &HookRegistry::new()).expect("compile")
    }

    #[test]
    fn new_record_is_zeroed_and_unbound() {
        let schema = schema();
        let record = Record::new(&schema);
        assert_eq!(record.get("seqn").expect("seqn"), Value::U16(0));
        assert_eq!(record.array("arr").expect("arr"), &Elements::U8(vec![0; 4]));
        assert!(matches!(record.get("p"), Err(CodecError::NullPointerField(ref f)) if f == "p"));
        assert!(matches!(record.slot("pa"), Some(Slot::PointerArray(None))));
    }

    #[test]
    fn setters_check_kind_type_and_length() {
        let schema = schema();
        let mut record = Record::new(&schema);
        assert!(matches!(
            record.set("seqn", 1u8),
            Err(CodecError::TypeMismatch { expected: ElementType::U16, found: ElementType::U8, .. })
        ));
        assert!(matches!(
            record.set("arr", 1u8),
            Err(CodecError::KindMismatch { kind: "array", wanted: "scalar", .. })
        ));
        assert!(matches!(
            record.set_array("arr", vec![1u8, 2, 3]),
            Err(CodecError::LengthMismatch { expected: 4, found: 3, .. })
        ));
        assert!(matches!(record.set("nope", 1u8), Err(CodecError::UnknownField(_))));
        record.set("seqn", 300u16).expect("set");
        record.set_array("arr", [9u8, 8, 7, 6]).expect("set_array");
        assert_eq!(record.get("seqn").expect("get").as_u32(), 300);
        assert_eq!(record.array("arr").expect("arr").get(0), Some(Value::U8(9)));
    }

    #[test]
    fn pointer_slots_alias_caller_memory() {
        let schema = schema();
        let target = Cell::new(5u32);
        let mut backing = [1u16, 2, 3];
        let mut record = Record::new(&schema);
        record.bind("p", &target).expect("bind");
        record.bind_slice("pa", &mut backing[..]).expect("bind_slice");

        target.set(6);
        assert_eq!(record.get("p").expect("get"), Value::U32(6));
        record.set("p", 7u32).expect("write through");
        assert_eq!(target.get(), 7);
        assert_eq!(record.pointed_array("pa").expect("pa"), vec![Value::U16(1), Value::U16(2)]);
    }

    #[test]
    fn bind_slice_requires_enough_elements() {
        let schema = schema();
        let short = [Cell::new(1u16)];
        let wrong = Cell::new(1u8);
        let mut record = Record::new(&schema);
        assert!(matches!(
            record.bind_slice("pa", &short[..]),
            Err(CodecError::LengthMismatch { expected: 2, found: 1, .. })
        ));
        assert!(matches!(record.bind("p", &wrong), Err(CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn value_from_u32_checks_range() {
        assert_eq!(Value::from_u32(ElementType::U8, 255), Some(Value::U8(255)));
        assert_eq!(Value::from_u32(ElementType::U8, 256), None);
        assert_eq!(Value::from_u32(ElementType::U16, 0x1234), Some(Value::U16(0x1234)));
    }
}
