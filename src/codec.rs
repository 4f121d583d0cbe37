//! Encode/decode records to and from the tag-free, big-endian wire format.
//!
//! Fields are written strictly in schema order with no padding:
//!
//! - scalar of width W: W bytes, most significant first
//! - array / pointer array of N elements: the scalar rule applied N times
//! - pointer: the scalar rule applied to the referent
//! - custom: whatever the hook writes, at the current cursor
//!
//! Both directions check the buffer before touching a field, so a short buffer
//! yields [`CodecError::BufferTooSmall`] / [`CodecError::BufferUnderflow`] rather
//! than a panic. For schemas without custom fields the whole length is checked
//! up front and nothing is written (or decoded into the record) on failure.

use crate::schema::{ElementType, FieldDescriptor, FieldKind, Schema};
use crate::value::{CellRef, CellSlice, Elements, Record, Slot, Value};
use byteorder::{BigEndian, ByteOrder};
use std::cell::Cell;
use tracing::trace;

/// Upper bound on the buffer [`Schema::encode_to_vec`] grows to for custom fields.
const MAX_GROWN_LEN: usize = 16 * 1024 * 1024;

/// Extra room reserved for custom fields on the first `encode_to_vec` attempt.
const CUSTOM_HEADROOM: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("field {field}: output buffer too small (need {needed} bytes, have {available})")]
    BufferTooSmall {
        field: String,
        needed: usize,
        available: usize,
    },
    #[error("field {field}: input too short (need {needed} bytes, have {available})")]
    BufferUnderflow {
        field: String,
        needed: usize,
        available: usize,
    },
    #[error("field {0}: pointer is not bound")]
    NullPointerField(String),
    #[error("field {field}: custom hook reported {claimed} bytes but only {available} remain")]
    CustomOverrun {
        field: String,
        claimed: usize,
        available: usize,
    },
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("field {field}: is a {kind} field, not {wanted}")]
    KindMismatch {
        field: String,
        kind: &'static str,
        wanted: &'static str,
    },
    #[error("field {field}: expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: ElementType,
        found: ElementType,
    },
    #[error("field {field}: expected {expected} elements, got {found}")]
    LengthMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
    #[error("field {field}: custom value is not a {expected}")]
    CustomValueType {
        field: String,
        expected: &'static str,
    },
    #[error("record was built for packet {record}, not {schema}")]
    SchemaMismatch { schema: String, record: String },
    #[error("Custom: {0}")]
    Custom(String),
}

/// Fixed-width integers as they appear on the wire.
trait WireInt: Copy {
    const WIDTH: usize;
    fn put(self, dst: &mut [u8]);
    fn take(src: &[u8]) -> Self;
}

impl WireInt for u8 {
    const WIDTH: usize = 1;
    fn put(self, dst: &mut [u8]) {
        dst[0] = self;
    }
    fn take(src: &[u8]) -> Self {
        src[0]
    }
}

impl WireInt for u16 {
    const WIDTH: usize = 2;
    fn put(self, dst: &mut [u8]) {
        BigEndian::write_u16(dst, self);
    }
    fn take(src: &[u8]) -> Self {
        BigEndian::read_u16(src)
    }
}

impl WireInt for u32 {
    const WIDTH: usize = 4;
    fn put(self, dst: &mut [u8]) {
        BigEndian::write_u32(dst, self);
    }
    fn take(src: &[u8]) -> Self {
        BigEndian::read_u32(src)
    }
}

/// Encode `record` into `out`; returns the number of bytes written.
pub fn encode(schema: &Schema, record: &Record<'_>, out: &mut [u8]) -> Result<usize, CodecError> {
    check_schema(schema, record)?;
    if let Some(total) = schema.fixed_len() {
        if out.len() < total {
            return Err(CodecError::BufferTooSmall {
                field: first_field_past(schema, out.len()),
                needed: total,
                available: out.len(),
            });
        }
    }
    let mut cursor = 0;
    for (field, slot) in schema.fields().iter().zip(record.slots()) {
        cursor = encode_field(field, slot, out, cursor)?;
    }
    trace!(packet = schema.name(), bytes = cursor, "encoded record");
    Ok(cursor)
}

/// Decode `input` into `record`, overwriting every slot; returns the number of bytes read.
pub fn decode(schema: &Schema, input: &[u8], record: &mut Record<'_>) -> Result<usize, CodecError> {
    check_schema(schema, record)?;
    if let Some(total) = schema.fixed_len() {
        if input.len() < total {
            return Err(CodecError::BufferUnderflow {
                field: first_field_past(schema, input.len()),
                needed: total,
                available: input.len(),
            });
        }
    }
    let mut cursor = 0;
    for (field, slot) in schema.fields().iter().zip(record.slots_mut()) {
        cursor = decode_field(field, slot, input, cursor)?;
    }
    trace!(packet = schema.name(), bytes = cursor, "decoded record");
    Ok(cursor)
}

impl Schema {
    /// See [`encode`].
    pub fn encode(&self, record: &Record<'_>, out: &mut [u8]) -> Result<usize, CodecError> {
        encode(self, record, out)
    }

    /// Encode into a freshly allocated buffer of exactly the encoded length.
    ///
    /// With custom fields the buffer is grown and the encode retried while a field
    /// reports [`CodecError::BufferTooSmall`].
    pub fn encode_to_vec(&self, record: &Record<'_>) -> Result<Vec<u8>, CodecError> {
        let mut capacity = self
            .fixed_len()
            .unwrap_or_else(|| self.static_len() + CUSTOM_HEADROOM);
        loop {
            let mut out = vec![0u8; capacity];
            match encode(self, record, &mut out) {
                Ok(n) => {
                    out.truncate(n);
                    return Ok(out);
                }
                Err(CodecError::BufferTooSmall { needed, .. })
                    if self.has_custom_fields() && capacity < MAX_GROWN_LEN =>
                {
                    capacity = needed.max(capacity * 2).min(MAX_GROWN_LEN);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// See [`decode`].
    pub fn decode(&self, input: &[u8], record: &mut Record<'_>) -> Result<usize, CodecError> {
        decode(self, input, record)
    }

    /// Decode into a new record. Pointer fields start unbound, so this fails with
    /// [`CodecError::NullPointerField`] for schemas that have any.
    pub fn decode_record(&self, input: &[u8]) -> Result<(Record<'_>, usize), CodecError> {
        let mut record = Record::new(self);
        let n = decode(self, input, &mut record)?;
        Ok((record, n))
    }
}

fn check_schema(schema: &Schema, record: &Record<'_>) -> Result<(), CodecError> {
    if std::ptr::eq(schema, record.schema()) {
        Ok(())
    } else {
        Err(CodecError::SchemaMismatch {
            schema: schema.name().to_string(),
            record: record.schema().name().to_string(),
        })
    }
}

/// Name of the first field that does not fit in `available` bytes.
fn first_field_past(schema: &Schema, available: usize) -> String {
    let mut end = 0;
    for f in schema.fields() {
        end += f.kind.wire_len().unwrap_or(0);
        if end > available {
            return f.name.clone();
        }
    }
    String::new()
}

fn encode_field(
    field: &FieldDescriptor,
    slot: &Slot<'_>,
    out: &mut [u8],
    cursor: usize,
) -> Result<usize, CodecError> {
    let name = field.name.as_str();
    match (&field.kind, slot) {
        (FieldKind::Scalar(_), Slot::Scalar(v)) => put_value(out, cursor, *v, name),
        (FieldKind::Array(..), Slot::Array(elements)) => match elements {
            Elements::U8(v) => put_iter(out, cursor, v.iter().copied(), name),
            Elements::U16(v) => put_iter(out, cursor, v.iter().copied(), name),
            Elements::U32(v) => put_iter(out, cursor, v.iter().copied(), name),
        },
        (FieldKind::PointerScalar(_), Slot::PointerScalar(target)) => {
            let target = target.ok_or_else(|| CodecError::NullPointerField(field.name.clone()))?;
            put_value(out, cursor, target.get(), name)
        }
        (FieldKind::PointerArray(_, n), Slot::PointerArray(target)) => {
            let target = target.ok_or_else(|| CodecError::NullPointerField(field.name.clone()))?;
            match target {
                CellSlice::U8(cells) => put_iter(out, cursor, leading(cells, *n, name)?.iter().map(Cell::get), name),
                CellSlice::U16(cells) => put_iter(out, cursor, leading(cells, *n, name)?.iter().map(Cell::get), name),
                CellSlice::U32(cells) => put_iter(out, cursor, leading(cells, *n, name)?.iter().map(Cell::get), name),
            }
        }
        (FieldKind::Custom(hook), Slot::Custom(value)) => {
            let written = hook.encode(name, out, cursor, &**value)?;
            let available = out.len().saturating_sub(cursor);
            if written > available {
                return Err(CodecError::CustomOverrun {
                    field: field.name.clone(),
                    claimed: written,
                    available,
                });
            }
            Ok(cursor + written)
        }
        (kind, _) => Err(slot_mismatch(name, kind)),
    }
}

fn decode_field(
    field: &FieldDescriptor,
    slot: &mut Slot<'_>,
    input: &[u8],
    cursor: usize,
) -> Result<usize, CodecError> {
    let name = field.name.as_str();
    match (&field.kind, slot) {
        (FieldKind::Scalar(ty), Slot::Scalar(v)) => {
            let (value, next) = take_value(input, cursor, *ty, name)?;
            *v = value;
            Ok(next)
        }
        (FieldKind::Array(..), Slot::Array(elements)) => match elements {
            Elements::U8(v) => take_into(input, cursor, v, name),
            Elements::U16(v) => take_into(input, cursor, v, name),
            Elements::U32(v) => take_into(input, cursor, v, name),
        },
        (FieldKind::PointerScalar(ty), Slot::PointerScalar(target)) => {
            let target = target.ok_or_else(|| CodecError::NullPointerField(field.name.clone()))?;
            let (value, next) = take_value(input, cursor, *ty, name)?;
            write_through(target, value, name)?;
            Ok(next)
        }
        (FieldKind::PointerArray(_, n), Slot::PointerArray(target)) => {
            let target = target.ok_or_else(|| CodecError::NullPointerField(field.name.clone()))?;
            match target {
                CellSlice::U8(cells) => take_cells(input, cursor, leading(cells, *n, name)?, name),
                CellSlice::U16(cells) => take_cells(input, cursor, leading(cells, *n, name)?, name),
                CellSlice::U32(cells) => take_cells(input, cursor, leading(cells, *n, name)?, name),
            }
        }
        (FieldKind::Custom(hook), Slot::Custom(value)) => {
            let consumed = hook.decode(name, input, cursor, &mut **value)?;
            let available = input.len().saturating_sub(cursor);
            if consumed > available {
                return Err(CodecError::CustomOverrun {
                    field: field.name.clone(),
                    claimed: consumed,
                    available,
                });
            }
            Ok(cursor + consumed)
        }
        (kind, _) => Err(slot_mismatch(name, kind)),
    }
}

fn slot_mismatch(field: &str, kind: &FieldKind) -> CodecError {
    CodecError::KindMismatch {
        field: field.to_string(),
        kind: kind.name(),
        wanted: "the slot's kind",
    }
}

/// The first `n` cells of a bound pointer array.
fn leading<'c, T>(cells: &'c [Cell<T>], n: usize, field: &str) -> Result<&'c [Cell<T>], CodecError> {
    cells.get(..n).ok_or_else(|| CodecError::LengthMismatch {
        field: field.to_string(),
        expected: n,
        found: cells.len(),
    })
}

fn reserve<'b>(out: &'b mut [u8], cursor: usize, len: usize, field: &str) -> Result<&'b mut [u8], CodecError> {
    let available = out.len();
    match cursor.checked_add(len) {
        Some(end) if end <= available => Ok(&mut out[cursor..end]),
        _ => Err(CodecError::BufferTooSmall {
            field: field.to_string(),
            needed: cursor.saturating_add(len),
            available,
        }),
    }
}

fn consume<'b>(input: &'b [u8], cursor: usize, len: usize, field: &str) -> Result<&'b [u8], CodecError> {
    match cursor.checked_add(len) {
        Some(end) if end <= input.len() => Ok(&input[cursor..end]),
        _ => Err(CodecError::BufferUnderflow {
            field: field.to_string(),
            needed: cursor.saturating_add(len),
            available: input.len(),
        }),
    }
}

fn put_iter<T, I>(out: &mut [u8], cursor: usize, values: I, field: &str) -> Result<usize, CodecError>
where
    T: WireInt,
    I: ExactSizeIterator<Item = T>,
{
    let len = values.len() * T::WIDTH;
    let dst = reserve(out, cursor, len, field)?;
    for (chunk, v) in dst.chunks_exact_mut(T::WIDTH).zip(values) {
        v.put(chunk);
    }
    Ok(cursor + len)
}

fn put_value(out: &mut [u8], cursor: usize, value: Value, field: &str) -> Result<usize, CodecError> {
    match value {
        Value::U8(x) => put_iter(out, cursor, std::iter::once(x), field),
        Value::U16(x) => put_iter(out, cursor, std::iter::once(x), field),
        Value::U32(x) => put_iter(out, cursor, std::iter::once(x), field),
    }
}

fn take_into<T: WireInt>(input: &[u8], cursor: usize, dst: &mut [T], field: &str) -> Result<usize, CodecError> {
    let len = dst.len() * T::WIDTH;
    let src = consume(input, cursor, len, field)?;
    for (v, chunk) in dst.iter_mut().zip(src.chunks_exact(T::WIDTH)) {
        *v = T::take(chunk);
    }
    Ok(cursor + len)
}

fn take_cells<T: WireInt>(input: &[u8], cursor: usize, cells: &[Cell<T>], field: &str) -> Result<usize, CodecError> {
    let len = cells.len() * T::WIDTH;
    let src = consume(input, cursor, len, field)?;
    for (cell, chunk) in cells.iter().zip(src.chunks_exact(T::WIDTH)) {
        cell.set(T::take(chunk));
    }
    Ok(cursor + len)
}

fn take_value(input: &[u8], cursor: usize, ty: ElementType, field: &str) -> Result<(Value, usize), CodecError> {
    let src = consume(input, cursor, ty.width(), field)?;
    let value = match ty {
        ElementType::U8 => Value::U8(u8::take(src)),
        ElementType::U16 => Value::U16(u16::take(src)),
        ElementType::U32 => Value::U32(u32::take(src)),
    };
    Ok((value, cursor + ty.width()))
}

fn write_through(target: CellRef<'_>, value: Value, field: &str) -> Result<(), CodecError> {
    if target.set(value) {
        Ok(())
    } else {
        Err(CodecError::TypeMismatch {
            field: field.to_string(),
            expected: value.element_type(),
            found: target.element_type(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldDecl, PacketDecl};
    use crate::custom::HookRegistry;

    fn compile(fields: Vec<FieldDecl>) -> Schema {
        Schema::compile(&PacketDecl::new("msg", fields), &HookRegistry::new()).expect("compile")
    }

    #[test]
    fn scalars_are_big_endian() {
        let schema = compile(vec![FieldDecl::scalar("u16", "a"), FieldDecl::scalar("u32", "b")]);
        let mut record = Record::new(&schema);
        record.set("a", 0x1234u16).expect("a");
        record.set("b", 0x00AA_BBCCu32).expect("b");
        let bytes = schema.encode_to_vec(&record).expect("encode");
        assert_eq!(bytes, [0x12, 0x34, 0x00, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn u8_array_is_copied_in_order() {
        let schema = compile(vec![FieldDecl::array("u8", "a", 3)]);
        let mut record = Record::new(&schema);
        record.set_array("a", [1u8, 2, 3]).expect("a");
        assert_eq!(schema.encode_to_vec(&record).expect("encode"), [1, 2, 3]);
    }

    #[test]
    fn u16_array_elements_are_each_big_endian() {
        let schema = compile(vec![FieldDecl::array("u16", "a", 2)]);
        let mut record = Record::new(&schema);
        record.set_array("a", [0x0102u16, 0xA0B0]).expect("a");
        let bytes = schema.encode_to_vec(&record).expect("encode");
        assert_eq!(bytes, [0x01, 0x02, 0xA0, 0xB0]);

        let (decoded, n) = schema.decode_record(&bytes).expect("decode");
        assert_eq!(n, 4);
        assert_eq!(decoded.array("a").expect("a"), &Elements::U16(vec![0x0102, 0xA0B0]));
    }

    #[test]
    fn short_output_is_rejected_before_writing() {
        let schema = compile(vec![FieldDecl::scalar("u8", "a"), FieldDecl::scalar("u32", "b")]);
        let mut record = Record::new(&schema);
        record.set("a", 0xFFu8).expect("a");
        let mut out = [0u8; 4];
        let err = schema.encode(&record, &mut out).unwrap_err();
        match err {
            CodecError::BufferTooSmall { field, needed, available } => {
                assert_eq!(field, "b");
                assert_eq!(needed, 5);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn short_input_leaves_record_untouched() {
        let schema = compile(vec![FieldDecl::scalar("u8", "a"), FieldDecl::scalar("u16", "b")]);
        let mut record = Record::new(&schema);
        record.set("a", 9u8).expect("a");
        let err = schema.decode(&[1, 2], &mut record).unwrap_err();
        assert!(matches!(
            err,
            CodecError::BufferUnderflow { ref field, needed: 3, available: 2 } if field == "b"
        ));
        assert_eq!(record.get("a").expect("a"), Value::U8(9));
    }

    #[test]
    fn unbound_pointer_fails_both_ways() {
        let schema = compile(vec![FieldDecl::pointer("u16", "p")]);
        let record = Record::new(&schema);
        let mut out = [0u8; 2];
        assert!(matches!(
            schema.encode(&record, &mut out),
            Err(CodecError::NullPointerField(ref f)) if f == "p"
        ));
        assert!(matches!(
            schema.decode_record(&[0, 1]),
            Err(CodecError::NullPointerField(_))
        ));
    }

    #[test]
    fn record_from_another_schema_is_rejected() {
        let a = compile(vec![FieldDecl::scalar("u8", "x")]);
        let b = compile(vec![FieldDecl::scalar("u8", "x")]);
        let record = Record::new(&a);
        let mut out = [0u8; 1];
        assert!(matches!(
            b.encode(&record, &mut out),
            Err(CodecError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn empty_schema_encodes_nothing() {
        let schema = compile(vec![]);
        let record = Record::new(&schema);
        assert_eq!(schema.encode(&record, &mut []).expect("encode"), 0);
        assert_eq!(schema.decode_record(&[]).expect("decode").1, 0);
    }
}
