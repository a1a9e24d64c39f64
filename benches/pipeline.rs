//! Benchmarks for import and SSA construction.
//!
//! Measures the stages of the pipeline on generated methods:
//! - Import of a long chain of diamonds
//! - Promotion of nested loops
//! - Batch compilation, sequential and parallel

extern crate dotssa;

use criterion::{criterion_group, criterion_main, Criterion};
use dotssa::{
    entities::{IrType, MethodSig},
    frontend::ILImporter,
    il::{IlBuilder, IlMethod, OpCode},
    passes::{MethodPass, MethodTransformContext, Pipeline, PipelineConfig, SsaPromotion},
};
use std::hint::black_box;

/// `count` diamonds in a row, each selecting a new value for local 0.
fn diamond_chain(count: usize) -> IlMethod {
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::I32], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::LdcI40).emit(OpCode::Stloc0);
    for n in 0..count {
        let (other, join) = (format!("other{n}"), format!("join{n}"));
        il.emit(OpCode::Ldarg0)
            .ldc_i4(n as i32)
            .branch(OpCode::Bgt, &other)
            .emit(OpCode::Ldloc0)
            .emit(OpCode::LdcI41)
            .emit(OpCode::Add)
            .emit(OpCode::Stloc0)
            .branch(OpCode::Br, &join)
            .label(&other)
            .emit(OpCode::Ldloc0)
            .emit(OpCode::LdcI42)
            .emit(OpCode::Mul)
            .emit(OpCode::Stloc0)
            .label(&join);
    }
    il.emit(OpCode::Ldloc0).emit(OpCode::Ret);
    il.build().unwrap()
}

/// `depth` loops nested inside each other, all counting local 0 up to argument 0.
fn nested_loops(depth: usize) -> IlMethod {
    let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::I32], IrType::I32));
    il.local(IrType::I32);
    il.emit(OpCode::LdcI40).emit(OpCode::Stloc0);
    for n in 0..depth {
        il.label(&format!("head{n}"));
    }
    il.emit(OpCode::Ldloc0)
        .emit(OpCode::LdcI41)
        .emit(OpCode::Add)
        .emit(OpCode::Stloc0);
    for n in (0..depth).rev() {
        il.emit(OpCode::Ldloc0)
            .emit(OpCode::Ldarg0)
            .ldc_i4(n as i32)
            .emit(OpCode::Sub)
            .branch(OpCode::Blt, &format!("head{n}"));
    }
    il.emit(OpCode::Ldloc0).emit(OpCode::Ret);
    il.build().unwrap()
}

fn bench_import_diamonds(c: &mut Criterion) {
    let method = diamond_chain(200);

    c.bench_function("import_diamonds_200", |b| {
        b.iter(|| {
            let body = ILImporter::new(black_box(&method)).import().unwrap();
            black_box(body)
        });
    });
}

fn bench_promote_diamonds(c: &mut Criterion) {
    let method = diamond_chain(200);
    let imported = ILImporter::new(&method).import().unwrap();

    c.bench_function("promote_diamonds_200", |b| {
        b.iter(|| {
            let mut body = imported.clone();
            let mut ctx = MethodTransformContext::new(&mut body);
            SsaPromotion::new().run(&mut ctx).unwrap();
            black_box(body)
        });
    });
}

fn bench_promote_loops(c: &mut Criterion) {
    let method = nested_loops(32);
    let imported = ILImporter::new(&method).import().unwrap();

    c.bench_function("promote_nested_loops_32", |b| {
        b.iter(|| {
            let mut body = imported.clone();
            let mut ctx = MethodTransformContext::new(&mut body);
            SsaPromotion::new().run(&mut ctx).unwrap();
            black_box(body)
        });
    });
}

fn bench_compile_batch(c: &mut Criterion) {
    let methods: Vec<IlMethod> = (0..64).map(|n| diamond_chain(20 + n)).collect();
    let mut group = c.benchmark_group("compile_batch_64");

    for parallel in [false, true] {
        let pipeline = Pipeline::with_config(PipelineConfig {
            parallel,
            verify: false,
            warn_on_undefined: false,
            ..PipelineConfig::default()
        });
        let name = if parallel { "parallel" } else { "sequential" };
        group.bench_function(name, |b| {
            b.iter(|| black_box(pipeline.compile_all(black_box(&methods))));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_import_diamonds,
    bench_promote_diamonds,
    bench_promote_loops,
    bench_compile_batch
);
criterion_main!(benches);
