use nativecall::ffi::{MemberShape, ObjectLayout, Primitive};
use nativecall::{ArgBuffer, CallPlan, CallableDescriptor, NativeCaller, ParamType, ReturnType};
use serde::Serialize;
use std::ffi::CString;
use std::hint::black_box;
use std::ptr;
use std::time::Instant;

const ITERATIONS: u32 = 1_000_000;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    iterations: u32,
    native_call_ns: f64,
    direct_call_ns: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    arch: String,
    results: Vec<BenchmarkResult>,
}

// Callees

extern "C" fn add3(a: i64, b: i64, c: i64) -> i64 {
    a + b + c
}

#[allow(clippy::too_many_arguments)]
extern "C" fn sum12(
    a: i64,
    b: i64,
    c: i64,
    d: i64,
    e: i64,
    f: i64,
    g: i64,
    h: i64,
    i: i64,
    j: i64,
    k: i64,
    l: i64,
) -> i64 {
    a + b + c + d + e + f + g + h + i + j + k + l
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Vec3d {
    x: f64,
    y: f64,
    z: f64,
}

extern "C" fn make_vec3d(x: f64) -> Vec3d {
    Vec3d {
        x,
        y: x * 2.0,
        z: x * 3.0,
    }
}

fn per_call_ns(f: impl Fn()) -> f64 {
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        f();
    }
    start.elapsed().as_nanos() as f64 / ITERATIONS as f64
}

/// Time `plan` through the native call path against calling `direct`.
fn measure<R: Copy>(
    caller: &NativeCaller,
    name: &str,
    plan: &CallPlan,
    buf: &ArgBuffer,
    direct: impl Fn() -> R,
) -> BenchmarkResult {
    let native_call_ns = per_call_ns(|| {
        let mut out = std::mem::MaybeUninit::<R>::uninit();
        unsafe {
            if let Err(e) = caller.call(
                plan,
                black_box(buf.as_raw()),
                ptr::null_mut(),
                ptr::null_mut(),
                out.as_mut_ptr().cast(),
            ) {
                eprintln!("{} failed: {}", name, e);
                return;
            }
            black_box(out.assume_init());
        }
    });
    let direct_call_ns = per_call_ns(|| {
        black_box(direct());
    });
    BenchmarkResult {
        name: name.to_string(),
        iterations: ITERATIONS,
        native_call_ns,
        direct_call_ns,
    }
}

fn main() {
    let caller = match NativeCaller::host() {
        Ok(caller) => caller,
        Err(e) => {
            eprintln!("cannot benchmark on this host: {}", e);
            std::process::exit(1);
        }
    };
    let mut results = Vec::new();

    let plan = caller
        .prepare(&CallableDescriptor::function(
            add3 as usize,
            vec![ParamType::from(Primitive::I64); 3],
            ReturnType::primitive(Primitive::I64),
        ))
        .unwrap();
    let mut buf = ArgBuffer::new();
    buf.push_i64(1).push_i64(2).push_i64(3);
    results.push(measure(&caller, "add3", &plan, &buf, || {
        add3(black_box(1), black_box(2), black_box(3))
    }));

    // Spills to the stack on both ABIs.
    let plan = caller
        .prepare(&CallableDescriptor::function(
            sum12 as usize,
            vec![ParamType::from(Primitive::I64); 12],
            ReturnType::primitive(Primitive::I64),
        ))
        .unwrap();
    let mut buf = ArgBuffer::new();
    for i in 0..12 {
        buf.push_i64(i);
    }
    results.push(measure(&caller, "sum12", &plan, &buf, || {
        sum12(
            black_box(0),
            1,
            2,
            3,
            4,
            5,
            6,
            7,
            8,
            9,
            10,
            black_box(11),
        )
    }));

    let vec3 = ObjectLayout::pod(24, 8, MemberShape::Float64(3));
    let plan = caller
        .prepare(&CallableDescriptor::function(
            make_vec3d as usize,
            vec![Primitive::F64.into()],
            ReturnType::object(vec3),
        ))
        .unwrap();
    let mut buf = ArgBuffer::new();
    buf.push_f64(1.5);
    results.push(measure(&caller, "vec3_return", &plan, &buf, || {
        make_vec3d(black_box(1.5))
    }));

    let text = CString::new("native call benchmark").unwrap();
    let plan = caller
        .prepare(&CallableDescriptor::function(
            libc::strlen as usize,
            vec![Primitive::Pointer.into()],
            ReturnType::primitive(Primitive::U64),
        ))
        .unwrap();
    let mut buf = ArgBuffer::new();
    buf.push_ptr(text.as_ptr());
    results.push(measure(&caller, "strlen", &plan, &buf, || unsafe {
        libc::strlen(black_box(text.as_ptr()))
    }));

    let output = BenchmarkOutput {
        arch: caller.abi().arch.to_string(),
        results,
    };
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
}
