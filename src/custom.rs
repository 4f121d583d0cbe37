//! Custom field hooks: caller-supplied encode/decode pairs for fields the schema
//! model cannot describe natively.
//!
//! A hook is registered in a [`HookRegistry`] under a field name (applies to every
//! packet with that field) or under `packet.field` (applies to one packet; wins over
//! the bare name). [`Schema::compile`](crate::schema::Schema::compile) attaches the
//! hook to the field, and every record built from that schema holds one value of
//! the hook's [`CustomField::Value`] type in the field's slot.
//!
//! The codec passes the whole buffer and the current cursor. A hook returns how
//! many bytes it wrote or consumed; the codec checks that count against what is
//! left in the buffer but cannot check which bytes the hook actually touched.
//! Hooks should report a short buffer as [`CodecError::BufferTooSmall`] (encode)
//! or [`CodecError::BufferUnderflow`] (decode) so callers can resize and retry.

use crate::codec::CodecError;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Encode/decode pair for one custom field.
pub trait CustomField: Send + Sync + 'static {
    /// Value stored in the record slot. New records start with `Default::default()`.
    type Value: Any + Default;

    /// Write `value` into `dst` starting at `cursor`; return the number of bytes written.
    fn encode(&self, dst: &mut [u8], cursor: usize, value: &Self::Value) -> Result<usize, CodecError>;

    /// Read from `src` starting at `cursor` into `value`; return the number of bytes consumed.
    fn decode(&self, src: &[u8], cursor: usize, value: &mut Self::Value) -> Result<usize, CodecError>;
}

/// Object-safe view of a [`CustomField`], so schemas can hold hooks of different value types.
trait ErasedField: Send + Sync {
    fn encode(&self, field: &str, dst: &mut [u8], cursor: usize, value: &dyn Any) -> Result<usize, CodecError>;
    fn decode(&self, field: &str, src: &[u8], cursor: usize, value: &mut dyn Any) -> Result<usize, CodecError>;
    fn new_value(&self) -> Box<dyn Any>;
    fn value_type(&self) -> (TypeId, &'static str);
}

impl<F: CustomField> ErasedField for F {
    fn encode(&self, field: &str, dst: &mut [u8], cursor: usize, value: &dyn Any) -> Result<usize, CodecError> {
        let value = value
            .downcast_ref::<F::Value>()
            .ok_or_else(|| value_type_error::<F::Value>(field))?;
        CustomField::encode(self, dst, cursor, value)
    }

    fn decode(&self, field: &str, src: &[u8], cursor: usize, value: &mut dyn Any) -> Result<usize, CodecError> {
        let value = value
            .downcast_mut::<F::Value>()
            .ok_or_else(|| value_type_error::<F::Value>(field))?;
        CustomField::decode(self, src, cursor, value)
    }

    fn new_value(&self) -> Box<dyn Any> {
        Box::new(F::Value::default())
    }

    fn value_type(&self) -> (TypeId, &'static str) {
        (TypeId::of::<F::Value>(), type_name::<F::Value>())
    }
}

fn value_type_error<T>(field: &str) -> CodecError {
    CodecError::CustomValueType {
        field: field.to_string(),
        expected: type_name::<T>(),
    }
}

/// Shared handle to a registered hook, stored in the schema's field descriptor.
#[derive(Clone)]
pub struct CustomHandle {
    inner: Arc<dyn ErasedField>,
}

impl CustomHandle {
    pub fn new<F: CustomField>(field: F) -> Self {
        CustomHandle {
            inner: Arc::new(field),
        }
    }

    /// Name of the value type the hook stores in record slots.
    pub fn value_type_name(&self) -> &'static str {
        self.inner.value_type().1
    }

    pub(crate) fn accepts<T: Any>(&self) -> bool {
        self.inner.value_type().0 == TypeId::of::<T>()
    }

    pub(crate) fn new_value(&self) -> Box<dyn Any> {
        self.inner.new_value()
    }

    pub(crate) fn encode(&self, field: &str, dst: &mut [u8], cursor: usize, value: &dyn Any) -> Result<usize, CodecError> {
        self.inner.encode(field, dst, cursor, value)
    }

    pub(crate) fn decode(&self, field: &str, src: &[u8], cursor: usize, value: &mut dyn Any) -> Result<usize, CodecError> {
        self.inner.decode(field, src, cursor, value)
    }
}

impl fmt::Debug for CustomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomHandle")
            .field("value", &self.value_type_name())
            .finish()
    }
}

/// A [`CustomField`] built from two closures.
///
/// ```
/// use xpacket::custom::FnField;
/// use xpacket::CodecError;
///
/// // One byte holding a boolean flag.
/// let flag = FnField::new(
///     |dst: &mut [u8], cursor: usize, v: &bool| -> Result<usize, CodecError> {
///         let available = dst.len();
///         let byte = dst.get_mut(cursor).ok_or_else(|| CodecError::BufferTooSmall {
///             field: "flag".into(),
///             needed: cursor + 1,
///             available,
///         })?;
///         *byte = *v as u8;
///         Ok(1)
///     },
///     |src: &[u8], cursor: usize, v: &mut bool| -> Result<usize, CodecError> {
///         let byte = src.get(cursor).ok_or_else(|| CodecError::BufferUnderflow {
///             field: "flag".into(),
///             needed: cursor + 1,
///             available: src.len(),
///         })?;
///         *v = *byte != 0;
///         Ok(1)
///     },
/// );
/// # let _ = flag;
/// ```
pub struct FnField<T, E, D> {
    encode: E,
    decode: D,
    _value: PhantomData<fn() -> T>,
}

impl<T, E, D> FnField<T, E, D> {
    pub fn new(encode: E, decode: D) -> Self
    where
        E: Fn(&mut [u8], usize, &T) -> Result<usize, CodecError>,
        D: Fn(&[u8], usize, &mut T) -> Result<usize, CodecError>,
    {
        FnField {
            encode,
            decode,
            _value: PhantomData,
        }
    }
}

impl<T, E, D> CustomField for FnField<T, E, D>
where
    T: Any + Default,
    E: Fn(&mut [u8], usize, &T) -> Result<usize, CodecError> + Send + Sync + 'static,
    D: Fn(&[u8], usize, &mut T) -> Result<usize, CodecError> + Send + Sync + 'static,
{
    type Value = T;

    fn encode(&self, dst: &mut [u8], cursor: usize, value: &T) -> Result<usize, CodecError> {
        (self.encode)(dst, cursor, value)
    }

    fn decode(&self, src: &[u8], cursor: usize, value: &mut T) -> Result<usize, CodecError> {
        (self.decode)(src, cursor, value)
    }
}

/// Hooks keyed by `field` or `packet.field`.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, CustomHandle>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `field` under `key`. A later registration under the same key replaces the earlier one.
    pub fn register<F: CustomField>(&mut self, key: &str, field: F) -> &mut Self {
        self.hooks.insert(key.to_string(), CustomHandle::new(field));
        self
    }

    /// Hook for `field` of `packet`: the `packet.field` entry if any, else the bare `field` entry.
    pub fn lookup(&self, packet: &str, field: &str) -> Option<&CustomHandle> {
        self.hooks
            .get(&format!("{}.{}", packet, field))
            .or_else(|| self.hooks.get(field))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_hook() -> FnField<u8, impl Fn(&mut [u8], usize, &u8) -> Result<usize, CodecError>, impl Fn(&[u8], usize, &mut u8) -> Result<usize, CodecError>> {
        FnField::new(
            |dst: &mut [u8], cursor: usize, v: &u8| {
                let available = dst.len();
                *dst.get_mut(cursor).ok_or_else(|| CodecError::BufferTooSmall {
                    field: "byte".into(),
                    needed: cursor + 1,
                    available,
                })? = *v;
                Ok(1)
            },
            |src: &[u8], cursor: usize, v: &mut u8| {
                *v = *src.get(cursor).ok_or_else(|| CodecError::BufferUnderflow {
                    field: "byte".into(),
                    needed: cursor + 1,
                    available: src.len(),
                })?;
                Ok(1)
            },
        )
    }

    #[test]
    fn qualified_key_wins_over_bare_name() {
        let mut hooks = HookRegistry::new();
        hooks.register("stamp", byte_hook());
        hooks.register(
            "beacon.stamp",
            FnField::new(
                |_: &mut [u8], _: usize, _: &u16| Ok(0),
                |_: &[u8], _: usize, _: &mut u16| Ok(0),
            ),
        );
        assert!(hooks.lookup("beacon", "stamp").expect("beacon").accepts::<u16>());
        assert!(hooks.lookup("other", "stamp").expect("other").accepts::<u8>());
        assert!(hooks.lookup("other", "missing").is_none());
        assert_eq!(hooks.len(), 2);
    }

    #[test]
    fn erased_hook_rejects_wrong_value_type() {
        let handle = CustomHandle::new(byte_hook());
        let mut buf = [0u8; 1];
        let err = handle.encode("f", &mut buf, 0, &7u32).unwrap_err();
        assert!(matches!(err, CodecError::CustomValueType { ref field, .. } if field == "f"));
        assert_eq!(handle.encode("f", &mut buf, 0, &7u8).expect("encode"), 1);
        assert_eq!(buf, [7]);
    }

    #[test]
    fn short_buffers_are_reported_by_the_hook() {
        let handle = CustomHandle::new(byte_hook());
        let mut empty: [u8; 0] = [];
        assert!(matches!(
            handle.encode("f", &mut empty, 0, &7u8),
            Err(CodecError::BufferTooSmall { needed: 1, available: 0, .. })
        ));
        let mut value: Box<dyn Any> = handle.new_value();
        assert!(matches!(
            handle.decode("f", &[1, 2], 2, &mut *value),
            Err(CodecError::BufferUnderflow { needed: 3, available: 2, .. })
        ));
    }

    #[test]
    fn new_value_is_default() {
        let handle = CustomHandle::new(byte_hook());
        let v = handle.new_value();
        assert_eq!(v.downcast_ref::<u8>(), Some(&0));
        assert_eq!(handle.value_type_name(), "u8");
    }
}
