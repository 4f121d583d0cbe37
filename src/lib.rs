//! # xpacket: schema-driven packet codec
//!
//! Describe a packet as an ordered list of typed fields; get a record type and two
//! deterministic functions that marshal it to and from a compact, tag-free,
//! big-endian byte buffer.
//!
//! ## Field kinds
//!
//! - **Scalar**: `u8`, `u16`, `u32` stored in the record
//! - **Array**: `T[n]` stored in the record
//! - **Pointer**: `&T` / `&T[n]`, borrowed from caller memory (`Cell`s), read on
//!   encode and written through on decode
//! - **Custom**: marshalled by a [`CustomField`] hook registered by field name
//!
//! ## Wire format
//!
//! Fields are concatenated in declaration order, each value most significant byte
//! first. No length prefix, no tags, no padding, no trailer. For schemas without
//! custom fields the encoded length is [`Schema::fixed_len`].
//!
//! ## Example DSL
//!
//! ```text
//! packet msg {
//!   seqn: u16;
//!   hops: u8;
//!   arr: u8[8];
//! }
//! ```
//!
//! ## Usage
//!
//! ```
//! use xpacket::{parse, HookRegistry, Record, Schema};
//!
//! let file = parse("packet msg { seqn: u16; hops: u8; arr: u8[8]; }").unwrap();
//! let schema = Schema::compile(&file.packets[0], &HookRegistry::new()).unwrap();
//!
//! let mut record = Record::new(&schema);
//! record.set("seqn", 300u16).unwrap();
//! record.set("hops", 2u8).unwrap();
//! record.set_array("arr", [0u8, 1, 2, 3, 4, 5, 6, 7]).unwrap();
//!
//! let bytes = schema.encode_to_vec(&record).unwrap();
//! assert_eq!(bytes, [0x01, 0x2c, 0x02, 0, 1, 2, 3, 4, 5, 6, 7]);
//!
//! let (decoded, n) = schema.decode_record(&bytes).unwrap();
//! assert_eq!(n, 11);
//! assert_eq!(decoded.get("seqn").unwrap().as_u32(), 300);
//! ```
//!
//! See `tests/integration.rs` for pointer fields, custom hooks and frames.

pub mod ast;
pub mod codec;
pub mod custom;
pub mod dump;
pub mod frame;
pub mod parser;
pub mod schema;
pub mod value;

pub use ast::{FieldDecl, FieldForm, PacketDecl, SchemaFile};
pub use codec::{decode, encode, CodecError};
pub use custom::{CustomField, CustomHandle, FnField, HookRegistry};
pub use frame::{decode_frame, encode_frame, FrameDecodeResult};
pub use parser::{parse, parse_file};
pub use schema::{ElementType, FieldDescriptor, FieldKind, FieldLayout, Schema, SchemaError, SchemaSet};
pub use value::{CellRef, CellSlice, Elements, Record, Slot, Value};
