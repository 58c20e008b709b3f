//! Host-wide memory budget

use crate::MemorySize;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Budget construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    #[error("reserved margin {margin} leaves no memory for VMs on a host with {total}")]
    MarginTooLarge {
        margin: MemorySize,
        total: MemorySize,
    },
}

/// Ceiling on the sum of all VM allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBudget {
    pub total_physical_memory: MemorySize,
    pub reserved_margin: MemorySize,
}

impl HostBudget {
    /// The margin must be strictly smaller than physical memory.
    pub fn new(
        total_physical_memory: MemorySize,
        reserved_margin: MemorySize,
    ) -> Result<Self, BudgetError> {
        if reserved_margin >= total_physical_memory {
            return Err(BudgetError::MarginTooLarge {
                margin: reserved_margin,
                total: total_physical_memory,
            });
        }
        Ok(Self {
            total_physical_memory,
            reserved_margin,
        })
    }

    pub fn max_total_memory(&self) -> MemorySize {
        self.total_physical_memory.saturating_sub(self.reserved_margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_total_memory() {
        let budget = HostBudget::new(MemorySize::from_gib(64), MemorySize::from_gib(4)).unwrap();
        assert_eq!(budget.max_total_memory(), MemorySize::from_gib(60));
    }

    #[test]
    fn test_margin_must_leave_room() {
        let err = HostBudget::new(MemorySize::from_gib(4), MemorySize::from_gib(4)).unwrap_err();
        assert!(matches!(err, BudgetError::MarginTooLarge { .. }));
        assert!(err.to_string().contains("4 GiB"));
    }
}
