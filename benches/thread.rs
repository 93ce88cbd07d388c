//! Fiber benchmarks: context switches and full calls through a VM.
//!
//! Only meaningful on x86-64 and AArch64 hosts, the targets the fiber
//! switch is written for.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use wasmcc::compiler::Compiler;
use wasmcc::parser;
use wasmcc::runtime::thread::{State, VMThread, VMThreadConfig};
use wasmcc::runtime::vm::VM;

const ADD: &str = r#"
    (module
      (func (export "add") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        i32.add))
"#;

fn bench_switch(c: &mut Criterion) {
    let thread = VMThread::create(
        || loop {
            if VMThread::yield_now().is_err() {
                return;
            }
        },
        VMThreadConfig::default(),
    )
    .expect("Failed to create thread");

    c.bench_function("resume_yield", |b| {
        b.iter(|| thread.resume().expect("resume failed"));
    });
    assert_eq!(thread.state(), State::Suspended);
    thread.stop().expect("stop failed");
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");
    for guard_pages in [false, true] {
        let config = VMThreadConfig {
            enable_guard_pages: guard_pages,
            ..VMThreadConfig::default()
        };
        group.bench_with_input(BenchmarkId::new("guard_pages", guard_pages), &config, |b, config| {
            b.iter(|| black_box(VMThread::create(|| {}, *config).expect("Failed to create thread")));
        });
    }
    group.finish();
}

fn bench_call(c: &mut Criterion) {
    let wasm = wat::parse_str(ADD).expect("invalid fixture");
    let compiled = Compiler::native()
        .expect("unsupported host")
        .compile_module(parser::parse(&wasm).expect("parse failed"))
        .expect("compile failed");
    let vm = VM::create(compiled).expect("Failed to create VM");
    let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");

    c.bench_function("call_add", |b| {
        b.iter(|| black_box(add.call((black_box(3), black_box(4))).expect("call failed")));
    });
}

criterion_group!(benches, bench_switch, bench_create, bench_call);
criterion_main!(benches);
