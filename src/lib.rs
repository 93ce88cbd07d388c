//! A small WebAssembly engine that compiles straight to native code.
//!
//! wasmcc takes a `.wasm` binary through three stages: binary
//! decoding with per-function validation, single-pass compilation to x86-64
//! or AArch64 machine code, and execution on a guard-paged fiber that can
//! park a call before it runs.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder and validator. Reads `.wasm` bytes into a [`parser::module::ParsedModule`].
//! - [`compiler`] -- Register-allocating single-pass compiler with x86-64 (System V) and AArch64 backends.
//! - [`runtime`] -- Fibers ([`runtime::thread::VMThread`]) and the [`runtime::vm::VM`] that runs compiled modules.
//! - [`coro`] -- Cooperative yield points used by the async parse and compile entry points.
//!
//! # Example
//!
//! Parse a module, compile it for the host and call an exported function:
//!
//! ```no_run
//! use wasmcc::compiler::Compiler;
//! use wasmcc::parser;
//! use wasmcc::runtime::vm::VM;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("add.wasm")?;
//! let parsed = parser::parse(&bytes)?;
//! let compiled = Compiler::native()?.compile_module(parsed)?;
//! let vm = VM::create(compiled)?;
//!
//! let add = vm.lookup_function::<(i32, i32), i32>("add").ok_or("no add export")?;
//! assert_eq!(add.call((3, 4))?, 7);
//! # Ok(())
//! # }
//! ```
//!
//! # Scope
//!
//! The instruction set is deliberately tiny: `i32.const`, `i32.add`,
//! `local.get`, `local.set` and `return`. Imports, tables, memories and
//! globals are decoded and checked but not instantiated.

pub mod compiler;
pub mod coro;
pub mod parser;
pub mod runtime;
