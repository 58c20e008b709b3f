//! Per-VM types
//!
//! A `VmRecord` is the controller's view of one running VM during a single
//! cycle. Records are rebuilt from live hypervisor data every cycle and are
//! never persisted.

use crate::{MemorySize, VmId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a VM as reported by the hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmState {
    /// The guest is running and can be rebalanced
    Running,

    /// Any other state (shut off, paused, crashed, ...)
    NotRunning(String),
}

impl VmState {
    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Running)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Running => write!(f, "running"),
            VmState::NotRunning(state) => write!(f, "{}", state),
        }
    }
}

/// Balloon statistics reported by the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Memory currently free or reclaimable inside the guest
    pub usable: MemorySize,

    /// Memory currently allocated to the guest by the hypervisor
    pub actual: MemorySize,
}

/// One running VM, as seen during a single rebalance cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: VmId,

    /// Maximum configured virtual CPUs
    pub vcpu_count: u32,

    /// Hypervisor-imposed upper bound for this VM
    pub max_memory: MemorySize,

    /// Currently allocated memory
    pub actual_memory: MemorySize,

    /// Free memory inside the guest
    pub usable_memory: MemorySize,

    /// Comfort target: desired in-guest free memory
    pub free_target: MemorySize,

    /// Clamped and rounded size, before the global budget is enforced
    pub wanted_memory: Option<MemorySize>,

    /// Size to apply this cycle
    pub desired_memory: Option<MemorySize>,
}

impl VmRecord {
    pub fn new(id: VmId, vcpu_count: u32, max_memory: MemorySize, stats: MemoryStats) -> Self {
        Self {
            id,
            vcpu_count,
            max_memory,
            actual_memory: stats.actual,
            usable_memory: stats.usable,
            free_target: MemorySize::ZERO,
            wanted_memory: None,
            desired_memory: None,
        }
    }

    /// Set both the pre-scaling and the applied size.
    pub fn set_wanted(&mut self, size: MemorySize) {
        self.wanted_memory = Some(size);
        self.desired_memory = Some(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_running() {
        assert!(VmState::Running.is_running());
        assert!(!VmState::NotRunning("paused".into()).is_running());
        assert_eq!(VmState::NotRunning("shut off".into()).to_string(), "shut off");
    }

    #[test]
    fn test_record_starts_without_desired_memory() {
        let mut record = VmRecord::new(
            VmId::new("vm-a"),
            4,
            MemorySize::from_gib(32),
            MemoryStats {
                usable: MemorySize::from_gib(6),
                actual: MemorySize::from_gib(20),
            },
        );
        assert_eq!(record.desired_memory, None);
        assert_eq!(record.actual_memory, MemorySize::from_gib(20));

        record.set_wanted(MemorySize::from_gib(20));
        assert_eq!(record.wanted_memory, record.desired_memory);
    }
}
