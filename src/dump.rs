//! Format schemas and records for display (layout tables, record dumps, hex).

use crate::schema::{FieldKind, Schema};
use crate::value::{Record, Slot, Value};
use std::fmt::Write as _;

/// Layout table: one line per field with offset, length and type.
///
/// ```text
/// packet msg (11 bytes)
///   0..2    seqn  u16
///   2..3    hops  u8
///   3..11   arr   u8[8]
/// ```
pub fn format_layout(schema: &Schema) -> String {
    let layout = schema.layout();
    let name_width = layout.iter().map(|l| l.name.len()).max().unwrap_or(0);
    let mut out = match schema.fixed_len() {
        Some(n) => format!("packet {} ({} bytes)\n", schema.name(), n),
        None => format!(
            "packet {} (at least {} bytes, custom fields)\n",
            schema.name(),
            schema.static_len()
        ),
    };
    for l in &layout {
        let range = match (l.offset, l.len) {
            (Some(o), Some(n)) => format!("{}..{}", o, o + n),
            (Some(o), None) => format!("{}..?", o),
            _ => "?".to_string(),
        };
        let _ = writeln!(
            out,
            "  {:<8}{:<width$}  {}",
            range,
            l.name,
            l.type_label,
            width = name_width
        );
    }
    out
}

/// One `name = value` line per field. Values are shown in decimal with hex in parentheses.
pub fn format_record(record: &Record<'_>) -> String {
    let schema = record.schema();
    let mut out = String::new();
    for (field, slot) in schema.fields().iter().zip(record.slots()) {
        let text = match slot {
            Slot::Scalar(v) => format_value(*v),
            Slot::Array(e) => format_list(&e.to_values()),
            Slot::PointerScalar(Some(target)) => format_value(target.get()),
            Slot::PointerArray(Some(target)) => {
                let n = field.kind.dimension().unwrap_or(0);
                let values: Vec<Value> = (0..n).filter_map(|i| target.get(i)).collect();
                format_list(&values)
            }
            Slot::PointerScalar(None) | Slot::PointerArray(None) => "<unbound>".to_string(),
            Slot::Custom(_) => match &field.kind {
                FieldKind::Custom(hook) => format!("<{}>", hook.value_type_name()),
                _ => "<custom>".to_string(),
            },
        };
        let _ = writeln!(out, "{} = {}", field.name, text);
    }
    out
}

fn format_value(v: Value) -> String {
    let digits = v.element_type().width() * 2;
    format!("{} (0x{:0digits$x})", v.as_u32(), v.as_u32(), digits = digits)
}

fn format_list(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.as_u32().to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Space-separated lowercase hex, e.g. `01 2c 02`.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Parse hex text. Whitespace, `:` and `-` separators and `0x` prefixes are ignored.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let mut digits = String::with_capacity(text.len());
    for token in text.split(|c: char| c.is_whitespace() || c == ':' || c == '-') {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        digits.push_str(token);
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            let pair = digits
                .get(i..i + 2)
                .ok_or_else(|| "non-ASCII character in hex".to_string())?;
            u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte {:?}", pair))
        })
        .collect()
}
