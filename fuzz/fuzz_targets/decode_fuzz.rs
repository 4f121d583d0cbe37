//! Decoder fuzz target: decode arbitrary bytes with a schema covering every
//! non-custom field kind. Short input must be an error, never a panic.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const SRC: &str = "packet f { a: u8; b: u16; c: u32; d: u16[3]; e: &u32; g: &u8[5]; }";

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use std::cell::Cell;
    let file = match xpacket::parse(SRC) {
        Ok(f) => f,
        Err(_) => return,
    };
    let hooks = xpacket::HookRegistry::new();
    let schema = match xpacket::Schema::compile(&file.packets[0], &hooks) {
        Ok(s) => s,
        Err(_) => return,
    };
    let e = Cell::new(0u32);
    let g: Vec<Cell<u8>> = (0..5).map(|_| Cell::new(0)).collect();
    let mut record = xpacket::Record::new(&schema);
    if record.bind("e", &e).is_err() || record.bind_slice("g", &g[..]).is_err() {
        return;
    }
    if let Ok(n) = schema.decode(data, &mut record) {
        assert_eq!(Some(n), schema.fixed_len());
        let out = schema.encode_to_vec(&record);
        assert_eq!(out.ok().as_deref(), data.get(..n));
    }
    let _ = xpacket::decode_frame(&schema, data);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
