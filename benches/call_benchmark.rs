//! Call path benchmarks: plan building, marshaling, and full native calls.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nativecall::ffi::{MemberShape, ObjectLayout, Primitive, marshal};
use nativecall::{AbiConfig, ArgBuffer, CallPlan, CallableDescriptor, NativeCaller, ParamType, ReturnType};
use std::ptr;

extern "C" fn add3(a: i64, b: i64, c: i64) -> i64 {
    a + b + c
}

#[repr(C)]
struct Vec3d {
    x: f64,
    y: f64,
    z: f64,
}

extern "C" fn make_vec3d(x: f64) -> Vec3d {
    Vec3d { x, y: x, z: x }
}

fn ints(n: usize) -> CallableDescriptor {
    CallableDescriptor::function(
        add3 as usize,
        vec![ParamType::from(Primitive::I64); n],
        ReturnType::primitive(Primitive::I64),
    )
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    for abi in [AbiConfig::aarch64(), AbiConfig::x86_64_sysv()] {
        let desc = ints(16);
        group.bench_with_input(BenchmarkId::new("ints16", abi.arch), &desc, |b, desc| {
            b.iter(|| CallPlan::new(black_box(desc), &abi).unwrap())
        });
    }
    group.finish();
}

fn bench_marshal(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal");
    for n in [3usize, 8, 24] {
        let abi = AbiConfig::aarch64();
        let plan = CallPlan::new(&ints(n), &abi).unwrap();
        let mut buf = ArgBuffer::with_capacity(n * 2);
        for i in 0..n {
            buf.push_i64(i as i64);
        }
        group.bench_with_input(BenchmarkId::new("ints", n), &buf, |b, buf| {
            b.iter(|| unsafe {
                marshal(&plan, black_box(buf.as_raw()), ptr::null_mut(), ptr::null_mut()).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_call(c: &mut Criterion) {
    let Ok(caller) = NativeCaller::host() else {
        return;
    };
    let mut group = c.benchmark_group("call");

    let plan = caller.prepare(&ints(3)).unwrap();
    let mut buf = ArgBuffer::new();
    buf.push_i64(1).push_i64(2).push_i64(3);
    group.bench_function("add3", |b| {
        b.iter(|| {
            let mut out = 0i64;
            unsafe {
                caller
                    .call(
                        &plan,
                        black_box(buf.as_raw()),
                        ptr::null_mut(),
                        ptr::null_mut(),
                        (&mut out as *mut i64).cast(),
                    )
                    .unwrap();
            }
            out
        })
    });

    let vec3 = ObjectLayout::pod(24, 8, MemberShape::Float64(3));
    let plan = caller
        .prepare(&CallableDescriptor::function(
            make_vec3d as usize,
            vec![Primitive::F64.into()],
            ReturnType::object(vec3),
        ))
        .unwrap();
    let mut buf = ArgBuffer::new();
    buf.push_f64(2.0);
    group.bench_function("vec3_return", |b| {
        b.iter(|| {
            let mut out = [0f64; 3];
            unsafe {
                caller
                    .call(
                        &plan,
                        black_box(buf.as_raw()),
                        ptr::null_mut(),
                        ptr::null_mut(),
                        out.as_mut_ptr().cast(),
                    )
                    .unwrap();
            }
            out
        })
    });
    group.finish();
}

criterion_group!(benches, bench_plan, bench_marshal, bench_call);
criterion_main!(benches);
