//! Raw packet declarations, as produced by the DSL parser or built by hand.
//!
//! Nothing here is validated: names may be empty, type names may be anything and
//! dimensions may be zero or negative. [`Schema::compile`](crate::schema::Schema::compile)
//! is the single place that turns declarations into a usable schema.

/// A parsed schema file: one or more packet declarations.
#[derive(Debug, Clone, Default)]
pub struct SchemaFile {
    pub packets: Vec<PacketDecl>,
}

/// One `packet NAME { ... }` block.
#[derive(Debug, Clone)]
pub struct PacketDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

/// How a field stores its value in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldForm {
    /// Owned inline: scalar, or array when a dimension is given.
    Value,
    /// Borrowed from caller memory: single value, or the first of `dimension` elements.
    Pointer,
    /// Marshalled by a registered hook.
    Custom,
}

/// A single field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub form: FieldForm,
    /// Element type name (`u8`, `u16`, `u32`). Empty for custom fields.
    pub type_name: String,
    pub dimension: Option<i64>,
}

impl FieldDecl {
    pub fn scalar(type_name: &str, name: &str) -> Self {
        Self::new(name, FieldForm::Value, type_name, None)
    }

    pub fn array(type_name: &str, name: &str, dimension: i64) -> Self {
        Self::new(name, FieldForm::Value, type_name, Some(dimension))
    }

    pub fn pointer(type_name: &str, name: &str) -> Self {
        Self::new(name, FieldForm::Pointer, type_name, None)
    }

    pub fn pointer_array(type_name: &str, name: &str, dimension: i64) -> Self {
        Self::new(name, FieldForm::Pointer, type_name, Some(dimension))
    }

    pub fn custom(name: &str) -> Self {
        Self::new(name, FieldForm::Custom, "", None)
    }

    fn new(name: &str, form: FieldForm, type_name: &str, dimension: Option<i64>) -> Self {
        FieldDecl {
            name: name.to_string(),
            form,
            type_name: type_name.to_string(),
            dimension,
        }
    }
}

impl PacketDecl {
    pub fn new(name: &str, fields: Vec<FieldDecl>) -> Self {
        PacketDecl {
            name: name.to_string(),
            fields,
        }
    }
}

impl SchemaFile {
    pub fn get_packet(&self, name: &str) -> Option<&PacketDecl> {
        self.packets.iter().find(|p| p.name == name)
    }
}
