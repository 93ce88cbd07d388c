//! Common test utilities shared between integration tests

#![allow(dead_code)]

use wasmcc::compiler::{Architecture, Compiler};
use wasmcc::compiler::module::CompiledModule;
use wasmcc::parser::{self, module::ParsedModule};

/// Converts a WAT fixture to its binary form.
pub fn wasm(source: &str) -> Vec<u8> {
    wat::parse_str(source).unwrap_or_else(|e| panic!("invalid fixture: {e}"))
}

pub fn parse_wat(source: &str) -> ParsedModule {
    parser::parse(&wasm(source)).unwrap_or_else(|e| panic!("parse failed: {e}"))
}

pub fn compile_wat(source: &str, architecture: Architecture) -> CompiledModule {
    Compiler::new(architecture)
        .compile_module(parse_wat(source))
        .unwrap_or_else(|e| panic!("compile failed: {e}"))
}

pub const ADD: &str = r#"
    (module
      (func $add (param $lhs i32) (param $rhs i32) (result i32)
        local.get $lhs
        local.get $rhs
        i32.add)
      (export "add" (func $add)))
"#;
