//! Human-readable cycle report

use crate::budget::BudgetOutcome;
use balloon_types::{MemorySize, VmId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome for one VM that received a size this cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub vm_id: VmId,

    /// Allocation reported at the start of the cycle
    pub previous: MemorySize,

    /// Size before the host budget was enforced
    pub wanted: MemorySize,

    /// Size sent to the hypervisor
    pub applied: MemorySize,

    /// Whether the hypervisor accepted the size
    pub apply_succeeded: bool,
}

/// A running VM left out of this cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedVm {
    pub vm_id: VmId,
    pub reason: String,
}

/// Everything one rebalance cycle did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
    pub excluded: Vec<ExcludedVm>,

    /// VMs seen but not running
    pub not_running: usize,

    pub budget: BudgetOutcome,
}

impl CycleReport {
    pub fn entry(&self, vm_id: &VmId) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| &e.vm_id == vm_id)
    }

    pub fn apply_failures(&self) -> usize {
        self.entries.iter().filter(|e| !e.apply_succeeded).count()
    }
}

const ID_WIDTH: usize = 40;

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "------------------ {}", self.started_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"))?;

        for entry in &self.entries {
            writeln!(
                f,
                "{:<ID_WIDTH$} {:>10} -> {:>10}",
                entry.vm_id, entry.previous, entry.wanted
            )?;
        }
        for vm in &self.excluded {
            writeln!(f, "{:<ID_WIDTH$} (skipped: {})", vm.vm_id, vm.reason)?;
        }
        writeln!(
            f,
            "{:<ID_WIDTH$} {:>10}    {:>10}",
            "(total)", "", self.budget.total_wanted
        )?;

        if let Some(factor) = self.budget.scale_factor {
            writeln!(f)?;
            writeln!(
                f,
                "Excessive memory use detected (limit {}), \
                 scaling down all VMs by {:.4}. New values:",
                self.budget.max_total, factor
            )?;
            for entry in &self.entries {
                writeln!(
                    f,
                    "{:<ID_WIDTH$} {:>10} -> {:>10}",
                    entry.vm_id, entry.previous, entry.applied
                )?;
            }
            writeln!(
                f,
                "{:<ID_WIDTH$} {:>10}    {:>10}",
                "(total)", "", self.budget.total_applied
            )?;
        }

        for entry in self.entries.iter().filter(|e| !e.apply_succeeded) {
            writeln!(f, "{:<ID_WIDTH$} (apply failed, retrying next cycle)", entry.vm_id)?;
        }
        Ok(())
    }
}
