#![no_main]

use libfuzzer_sys::fuzz_target;
use wasmcc::compiler::{Architecture, Compiler};

fuzz_target!(|data: &[u8]| {
    // Errors are expected; only panics and crashes are interesting
    if let Ok(module) = wasmcc::parser::parse(data) {
        for arch in [Architecture::X86_64, Architecture::Aarch64] {
            let _ = Compiler::new(arch).compile_module(module.clone());
        }
    }
});
