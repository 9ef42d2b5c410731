//! Benchmarks for constant interning and module serialization.
//!
//! Covers the hot paths of the pool and the file container:
//! - Locator-cache hits for already-interned literals
//! - Bulk interning of fresh constants
//! - The full serialize pass (registration bracket, optimization, assembly)
//! - Deserialization, eager and deferred

extern crate manifold;

use criterion::{criterion_group, criterion_main, Criterion};
use manifold::{Access, ComponentFormat, ConstantPool, ModuleFile};
use std::hint::black_box;

/// A module with a few dozen classes, each carrying properties and method overloads.
fn build_module() -> ModuleFile {
    let mut file = ModuleFile::new("bench.acme.io").unwrap();
    let module = file.module();
    let (tree, pool) = file.parts_mut();

    let module_identity = tree.identity(module).unwrap().unwrap();
    let int_class = pool.ensure_class(module_identity, "Int").unwrap();
    let int_type = pool.ensure_class_type(int_class, Access::Public).unwrap();

    for index in 0..32 {
        let class = tree
            .create_class(
                pool,
                module,
                Access::Public,
                ComponentFormat::Class,
                &format!("Type{index}"),
            )
            .unwrap();
        for property in ["first", "second", "third"] {
            tree.create_property(pool, class, false, Access::Private, int_type, property)
                .unwrap();
        }
        tree.create_method(pool, class, Access::Public, "get", &[int_type], &[int_type])
            .unwrap();
        tree.create_method(pool, class, Access::Public, "get", &[], &[int_type])
            .unwrap();
    }
    file
}

/// Benchmark re-interning a string that is already canonical (locator-cache hit).
fn bench_intern_hit(c: &mut Criterion) {
    let mut pool = ConstantPool::new();
    pool.ensure_string("hot_literal").unwrap();

    c.bench_function("pool_intern_hit", |b| {
        b.iter(|| {
            let handle = pool.ensure_string(black_box("hot_literal")).unwrap();
            black_box(handle)
        });
    });
}

/// Benchmark interning one thousand distinct strings into a fresh pool.
fn bench_intern_fresh(c: &mut Criterion) {
    c.bench_function("pool_intern_1000_strings", |b| {
        b.iter(|| {
            let mut pool = ConstantPool::new();
            for index in 0..1000 {
                pool.ensure_string(&format!("name_{index}")).unwrap();
            }
            black_box(pool.len())
        });
    });
}

/// Benchmark the full serialization pass, optimization included.
fn bench_assemble(c: &mut Criterion) {
    let mut file = build_module();

    c.bench_function("module_assemble_optimized", |b| {
        b.iter(|| {
            let bytes = file.to_bytes(true).unwrap();
            black_box(bytes)
        });
    });
}

/// Benchmark eager deserialization of a full module.
fn bench_disassemble_eager(c: &mut Criterion) {
    let bytes = build_module().to_bytes(true).unwrap();

    c.bench_function("module_disassemble_eager", |b| {
        b.iter(|| {
            let file = ModuleFile::from_bytes(black_box(&bytes), false).unwrap();
            black_box(file.module())
        });
    });
}

/// Benchmark deferred deserialization, which skips every nested child block.
fn bench_disassemble_lazy(c: &mut Criterion) {
    let bytes = build_module().to_bytes(true).unwrap();

    c.bench_function("module_disassemble_lazy", |b| {
        b.iter(|| {
            let file = ModuleFile::from_bytes(black_box(&bytes), true).unwrap();
            black_box(file.module())
        });
    });
}

criterion_group!(
    benches,
    bench_intern_hit,
    bench_intern_fresh,
    bench_assemble,
    bench_disassemble_eager,
    bench_disassemble_lazy
);
criterion_main!(benches);
