//! Argument marshaling: raw VM buffer to calling-convention slots.

use super::args::RawArgs;
use super::error::CallError;
use super::frame::{CallFrame, Location, SlotRouter};
use super::plan::{ArgPass, CallPlan};
use super::types::TrailingObject;
use std::ffi::c_void;
use tracing::trace;

/// Build the call frame for one call of `plan`.
///
/// The receiver goes first for member conventions, declared parameters
/// follow in order, and anything that does not fit its register class
/// spills to the shared stack array in declaration order.
///
/// # Safety
///
/// Every by-value object address in `args` whose bytes are copied into
/// slots (inline words, float members, stack images) must point to a live
/// object of the declared size.
pub unsafe fn marshal(
    plan: &CallPlan,
    args: RawArgs<'_>,
    object: *mut c_void,
    second_object: *mut c_void,
) -> Result<CallFrame, CallError> {
    let conv = plan.conv();
    debug_assert_eq!(
        args.len(),
        plan.arg_words(),
        "argument buffer does not match the signature"
    );
    debug_assert!(
        !conv.needs_object() || !object.is_null(),
        "{} call without an object",
        conv
    );
    debug_assert!(
        !conv.needs_second_object() || !second_object.is_null(),
        "{} call without a second object",
        conv
    );

    let mut frame = CallFrame::new(object, second_object);
    let mut router = SlotRouter::new(plan.abi());

    if plan.hidden_pointer_is_argument() {
        let location = router.general(1, false)?;
        frame.reserve_return_slot(location);
    }
    if conv.receiver_first() {
        frame.place(router.general(1, false)?, &[object as u64]);
    }
    if conv.second_object_first() {
        frame.place(router.general(1, false)?, &[second_object as u64]);
    }

    let mut pos = 0;
    for param in plan.params() {
        let location = param.pass.route(&mut router)?;
        match param.pass {
            ArgPass::General { primitive } => {
                frame.place(location, &[primitive.widen(args.read(pos, param.words))]);
            }
            ArgPass::Float32 => frame.place(location, &[args.read(pos, 1)]),
            ArgPass::Float64 | ArgPass::Address => frame.place(location, &[args.read(pos, 2)]),
            ArgPass::InlineWords { size, .. } | ArgPass::StackImage { size, .. } => {
                let bytes = unsafe { object_bytes(args.address(pos), size) };
                frame.place_bytes(location, bytes);
            }
            ArgPass::FloatMembers { width, size, .. } => {
                let bytes = unsafe { object_bytes(args.address(pos), size) };
                match location {
                    Location::Float { .. } => frame.place_members(location, bytes, width),
                    _ => frame.place_bytes(location, bytes),
                }
            }
        }
        pos += param.words;
    }

    if let Some(trailing) = conv.trailing_object() {
        let ptr = match trailing {
            TrailingObject::Object => object,
            TrailingObject::SecondObject => second_object,
        };
        frame.place(router.general(1, false)?, &[ptr as u64]);
    }

    frame.finish(&router);
    trace!(
        conv = %conv,
        gp = frame.general().len(),
        fp = frame.float().len(),
        stack = frame.stack().len(),
        "marshaled call frame"
    );
    Ok(frame)
}

/// # Safety
///
/// `ptr` must be valid for reads of `size` bytes for the returned lifetime.
unsafe fn object_bytes<'a>(ptr: *const u8, size: u32) -> &'a [u8] {
    debug_assert!(!ptr.is_null(), "by-value object argument is null");
    unsafe { std::slice::from_raw_parts(ptr, size as usize) }
}
