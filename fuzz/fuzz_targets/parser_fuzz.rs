//! Parser fuzz target: feed arbitrary text to the schema DSL parser and compile
//! whatever parses. Neither step may panic.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if let Ok(file) = xpacket::parse(s) {
        let hooks = xpacket::HookRegistry::new();
        for packet in &file.packets {
            let errors = xpacket::Schema::validate(packet, &hooks);
            let compiled = xpacket::Schema::compile(packet, &hooks);
            assert_eq!(errors.is_empty(), compiled.is_ok());
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
