//! Front-end benchmarks: decoding, validation and code generation.
//!
//! Modules are generated with a growing number of functions, each summing a
//! long run of constants so the compiler has to spill.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use wasmcc::compiler::{Architecture, Compiler};
use wasmcc::parser;

/// A module with `functions` exported functions, each `depth` values deep.
fn generate_module(functions: usize, depth: usize) -> Vec<u8> {
    let mut source = String::from("(module\n");
    for f in 0..functions {
        source.push_str(&format!("  (func (export \"f{f}\") (param i32) (result i32) (local i32)\n"));
        source.push_str("    local.get 0\n    local.set 1\n");
        for i in 0..depth {
            source.push_str(&format!("    i32.const {i}\n"));
        }
        source.push_str(&"    i32.add\n".repeat(depth - 1));
        source.push_str("    local.get 1\n    i32.add)\n");
    }
    source.push(')');
    wat::parse_str(&source).expect("generated module is valid")
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for functions in [1, 10, 100] {
        let bytes = generate_module(functions, 16);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(functions), &bytes, |b, bytes| {
            b.iter(|| black_box(parser::parse(bytes).expect("parse failed")));
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for arch in [Architecture::X86_64, Architecture::Aarch64] {
        for depth in [4, 32, 256] {
            let bytes = generate_module(10, depth);
            let parsed = parser::parse(&bytes).expect("parse failed");
            let compiler = Compiler::new(arch);
            group.bench_with_input(BenchmarkId::new(arch.to_string(), depth), &parsed, |b, parsed| {
                b.iter(|| black_box(compiler.compile_module(parsed.clone()).expect("compile failed")));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_compile);
criterion_main!(benches);
