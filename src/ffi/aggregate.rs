//! Composite (struct-like) value analysis.
//!
//! Decides whether a by-value object is a homogeneous floating-point
//! aggregate and how composites are lowered onto the configured ABI.

use super::plan::{ArgPass, ReturnMechanism};
use super::types::{MemberShape, ObjectLayout};
use crate::config::{AbiConfig, FloatPacking};

/// Whether `layout` is a homogeneous floating-point aggregate that the ABI
/// returns in float registers.
///
/// All members must share one precision and the value must fit into the
/// float-return register budget.
pub fn is_hfa(layout: &ObjectLayout, abi: &AbiConfig) -> bool {
    if !layout.trivial {
        return false;
    }
    let Some((width, count)) = layout.float_members() else {
        return false;
    };
    if count == 0 {
        return false;
    }
    let budget = abi.float_return_registers as u32;
    match abi.float_packing {
        FloatPacking::PerMember => count <= budget && layout.size <= width * budget,
        FloatPacking::Eightbyte => layout.size <= 8 * budget,
    }
}

/// Bytes carried by each float register for an HFA; `None` if the layout
/// is not one.
pub fn hfa_register_width(layout: &ObjectLayout, abi: &AbiConfig) -> Option<u8> {
    if !is_hfa(layout, abi) {
        return None;
    }
    match abi.float_packing {
        FloatPacking::PerMember => layout.float_members().map(|(width, _)| width as u8),
        FloatPacking::Eightbyte => Some(8),
    }
}

/// Number of float registers an HFA occupies.
fn hfa_registers(layout: &ObjectLayout, width: u8) -> u8 {
    (layout.size as usize).div_ceil(width as usize) as u8
}

/// Reason given for composites whose members need more than one register
/// class under eightbyte packing.
const MIXED_MEMBERS: &str =
    "members mix register classes (integers with floats, or f32 with f64)";

/// Lower a by-value object parameter.
pub(crate) fn lower_object_param(
    layout: &ObjectLayout,
    abi: &AbiConfig,
) -> Result<ArgPass, &'static str> {
    check_layout(layout)?;
    if !layout.trivial {
        return Ok(ArgPass::Address);
    }
    let words = layout.size.div_ceil(8);
    let align16 = layout.align >= 16;

    if let Some(width) = hfa_register_width(layout, abi) {
        return Ok(ArgPass::FloatMembers {
            count: hfa_registers(layout, width),
            width,
            size: layout.size,
        });
    }

    if layout.size <= abi.max_register_aggregate {
        if layout.members == MemberShape::Mixed && abi.float_packing == FloatPacking::Eightbyte {
            return Err(MIXED_MEMBERS);
        }
        return Ok(ArgPass::InlineWords {
            words,
            size: layout.size,
            align16,
        });
    }

    if abi.large_aggregates_by_address {
        Ok(ArgPass::Address)
    } else {
        Ok(ArgPass::StackImage {
            words,
            size: layout.size,
            align16,
        })
    }
}

/// Lower a by-value object return.
///
/// Runs when the plan is built: whether the callee gets a hidden result
/// pointer has to be known before the invoker variant is chosen.
pub(crate) fn lower_object_return(
    layout: &ObjectLayout,
    abi: &AbiConfig,
) -> Result<ReturnMechanism, &'static str> {
    check_layout(layout)?;
    if !layout.trivial {
        return Ok(ReturnMechanism::Memory);
    }
    if let Some(width) = hfa_register_width(layout, abi) {
        return Ok(ReturnMechanism::FloatAggregate {
            register_width: width,
            registers: hfa_registers(layout, width),
        });
    }
    if layout.size > abi.max_register_aggregate {
        return Ok(ReturnMechanism::Memory);
    }
    if abi.float_packing == FloatPacking::Eightbyte && layout.members != MemberShape::Integer {
        return Err(MIXED_MEMBERS);
    }
    if layout.size <= 8 {
        Ok(ReturnMechanism::General)
    } else {
        Ok(ReturnMechanism::GeneralPair)
    }
}

fn check_layout(layout: &ObjectLayout) -> Result<(), &'static str> {
    if layout.size == 0 {
        return Err("zero-sized objects cannot be passed by value");
    }
    if !layout.align.is_power_of_two() {
        return Err("alignment must be a power of two");
    }
    Ok(())
}
