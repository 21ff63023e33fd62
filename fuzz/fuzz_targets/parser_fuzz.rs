//! Parser fuzz target: feed arbitrary text to the DSL parser.
//! The parser must not panic. Whatever parses must also survive projection
//! and serialization, and the serialized text must parse to the same document.
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
    let (ast, _) = match keymap_sync::check(s, keymap_sync::CheckOptions::default()) {
        Ok(x) => x,
        Err(_) => return,
    };
    let model = keymap_sync::project(&ast, &[]);
    let out = keymap_sync::serialize(&model, &ast).expect("valid model serializes");
    let reparsed = keymap_sync::parse(&out.source).expect("serialized text parses");
    assert!(reparsed.equivalent(&ast));
    assert_eq!(reparsed, out.ast);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
