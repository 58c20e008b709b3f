//! Per-VM control law
//!
//! Each VM is steered towards a comfort target of free guest memory:
//! a VM with more free memory than its target is shrunk by the excess, a VM
//! with less is grown by the shortfall. The result is clamped to
//! `[free_target, max_memory]` and rounded to the policy granularity.

use crate::config::PolicyConfig;
use balloon_types::{MemorySize, VmRecord};

/// Comfort target for a VM: per-core headroom, never below the absolute floor.
pub fn compute_free_target(policy: &PolicyConfig, vcpus: u32) -> MemorySize {
    policy
        .free_mem_per_core_target()
        .saturating_mul(u64::from(vcpus))
        .max(policy.free_mem_target_absolute())
}

/// `actual - (usable - free_target)`, floored at zero.
pub fn unclamped_desired(
    actual: MemorySize,
    usable: MemorySize,
    free_target: MemorySize,
) -> MemorySize {
    actual.saturating_add(free_target).saturating_sub(usable)
}

/// Clamp to the comfort target, then to the VM's ceiling.
///
/// The ceiling wins when a VM's maximum is below its comfort target.
pub fn clamp_desired(
    desired: MemorySize,
    free_target: MemorySize,
    max_memory: MemorySize,
) -> MemorySize {
    desired.max(free_target).min(max_memory)
}

/// Round to the nearest multiple of `granularity` without exceeding `max_memory`.
///
/// If rounding overshoots, the largest multiple below the ceiling is used;
/// if no positive multiple fits, the ceiling itself.
pub fn round_desired(
    desired: MemorySize,
    granularity: MemorySize,
    max_memory: MemorySize,
) -> MemorySize {
    let rounded = desired.round_to_nearest(granularity);
    if rounded <= max_memory {
        return rounded;
    }
    match max_memory.round_down_to(granularity) {
        fitted if fitted.is_zero() => max_memory,
        fitted => fitted,
    }
}

/// Desired size for a VM before the host budget is enforced.
pub fn compute_desired(policy: &PolicyConfig, record: &VmRecord) -> MemorySize {
    let free_target = compute_free_target(policy, record.vcpu_count);
    let desired = unclamped_desired(record.actual_memory, record.usable_memory, free_target);
    let clamped = clamp_desired(desired, free_target, record.max_memory);
    round_desired(clamped, policy.rounding_granularity(), record.max_memory)
}
