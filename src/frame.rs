//! Frame handling: buffers holding several packets of one schema back to back.
//!
//! The wire format carries no length prefix, so packets are delimited purely by
//! what the schema consumes. A trailing run of bytes too short for another packet
//! is reported rather than treated as an error, so a caller reading from a stream
//! can keep it and retry once more bytes arrive.

use crate::codec::CodecError;
use crate::schema::Schema;
use crate::value::Record;

/// Result of decoding a frame.
#[derive(Debug)]
pub struct FrameDecodeResult<'a> {
    /// Packets that decoded completely.
    pub packets: Vec<DecodedPacket<'a>>,
    /// Byte range of an incomplete packet at the end of the frame, if any.
    pub trailing: Option<(usize, usize)>,
    /// Bytes left over because a packet decoded without consuming anything,
    /// which only happens for schemas that encode to zero bytes.
    pub unconsumed: Option<(usize, usize)>,
}

#[derive(Debug)]
pub struct DecodedPacket<'a> {
    pub record: Record<'a>,
    pub byte_range: (usize, usize),
}

/// Decode packets until `bytes` is exhausted.
///
/// Records are created fresh for each packet, so schemas with pointer fields fail
/// with [`CodecError::NullPointerField`]. A packet that consumes no bytes ends
/// the frame; the remaining bytes are reported in `unconsumed`, not `trailing`.
pub fn decode_frame<'a>(schema: &'a Schema, bytes: &[u8]) -> Result<FrameDecodeResult<'a>, CodecError> {
    let mut packets = Vec::new();
    let mut trailing = None;
    let mut unconsumed = None;
    let mut offset = 0;

    while offset < bytes.len() {
        match schema.decode_record(&bytes[offset..]) {
            Ok((_, 0)) => {
                unconsumed = Some((offset, bytes.len()));
                break;
            }
            Ok((record, consumed)) => {
                packets.push(DecodedPacket {
                    record,
                    byte_range: (offset, offset + consumed),
                });
                offset += consumed;
            }
            Err(CodecError::BufferUnderflow { .. }) => {
                trailing = Some((offset, bytes.len()));
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(FrameDecodeResult {
        packets,
        trailing,
        unconsumed,
    })
}

/// Encode `records` back to back.
pub fn encode_frame(schema: &Schema, records: &[Record<'_>]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(schema.fixed_len().unwrap_or(0) * records.len());
    for record in records {
        out.extend(schema.encode_to_vec(record)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldDecl, PacketDecl};
    use crate::custom::HookRegistry;

    fn schema() -> Schema {
        let decl = PacketDecl::new(
            "beacon",
            vec![FieldDecl::scalar("u16", "id"), FieldDecl::scalar("u8", "rssi")],
        );
        Schema::compile(&decl, &HookRegistry::new()).expect("compile")
    }

    #[test]
    fn splits_back_to_back_packets() {
        let schema = schema();
        let mut records = Vec::new();
        for id in 1u16..=3 {
            let mut r = Record::new(&schema);
            r.set("id", id).expect("id");
            r.set("rssi", (id * 10) as u8).expect("rssi");
            records.push(r);
        }
        let bytes = encode_frame(&schema, &records).expect("encode");
        assert_eq!(bytes.len(), 9);

        let result = decode_frame(&schema, &bytes).expect("decode");
        assert!(result.trailing.is_none());
        assert_eq!(result.packets.len(), 3);
        assert_eq!(result.packets[2].byte_range, (6, 9));
        assert_eq!(result.packets[2].record.get("id").expect("id").as_u32(), 3);
        assert_eq!(result.packets[1].record.get("rssi").expect("rssi").as_u32(), 20);
    }

    #[test]
    fn reports_trailing_partial_packet() {
        let schema = schema();
        let result = decode_frame(&schema, &[0, 1, 5, 0, 2]).expect("decode");
        assert_eq!(result.packets.len(), 1);
        assert_eq!(result.trailing, Some((3, 5)));
        assert_eq!(result.unconsumed, None);
    }

    #[test]
    fn empty_schema_does_not_loop() {
        let schema = Schema::compile(&PacketDecl::new("empty", vec![]), &HookRegistry::new()).expect("compile");
        let result = decode_frame(&schema, &[1, 2]).expect("decode");
        assert!(result.packets.is_empty());
        assert_eq!(result.trailing, None);
        assert_eq!(result.unconsumed, Some((0, 2)));
    }
}
