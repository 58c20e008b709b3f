//! Host-wide budget enforcement
//!
//! When the fleet wants more than the host can give, every VM is scaled by the
//! same factor `max_total / total_wanted`. Scaled sizes are computed in exact
//! integer arithmetic and floored to whole KiB, so their sum never exceeds
//! the ceiling.

use crate::config::PolicyConfig;
use crate::error::{ControllerError, Result};
use balloon_gateway::HostMemorySource;
use balloon_types::{HostBudget, MemorySize, VmRecord};
use serde::{Deserialize, Serialize};

/// Result of enforcing the host budget over one cycle's records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetOutcome {
    /// Sum of pre-scaling sizes
    pub total_wanted: MemorySize,

    /// Ceiling the sum was checked against
    pub max_total: MemorySize,

    /// Factor applied to every VM, if scaling was needed
    pub scale_factor: Option<f64>,

    /// Sum of the sizes that will be applied
    pub total_applied: MemorySize,

    /// VMs raised back to their comfort target after scaling
    pub floor_adjusted: usize,
}

impl BudgetOutcome {
    pub fn was_scaled(&self) -> bool {
        self.scale_factor.is_some()
    }

    pub fn exceeds_ceiling(&self) -> bool {
        self.total_applied > self.max_total
    }
}

/// Derive the host budget from the host's physical memory and the policy margin.
pub fn derive_budget(host: &dyn HostMemorySource, policy: &PolicyConfig) -> Result<HostBudget> {
    let total = host
        .total_physical_memory()
        .map_err(ControllerError::Host)?;
    Ok(HostBudget::new(total, policy.reserved_host_margin())?)
}

/// Scale every record's desired size down proportionally if the fleet total
/// exceeds the host ceiling. Records without a wanted size are ignored.
pub fn enforce_budget(
    records: &mut [VmRecord],
    budget: &HostBudget,
    policy: &PolicyConfig,
) -> BudgetOutcome {
    let max_total = budget.max_total_memory();
    let total_wanted: MemorySize = records.iter().filter_map(|r| r.wanted_memory).sum();

    let mut scale_factor = None;
    let mut floor_adjusted = 0;

    if total_wanted > max_total {
        let factor = max_total.as_kib() as f64 / total_wanted.as_kib() as f64;
        scale_factor = Some(factor);

        for record in records.iter_mut() {
            let Some(wanted) = record.wanted_memory else {
                continue;
            };
            let mut scaled = wanted.scale_ratio(max_total, total_wanted);

            if policy.enforce_floor_after_scaling {
                let floor = record.free_target.min(wanted);
                if scaled < floor {
                    scaled = floor;
                    floor_adjusted += 1;
                }
            }
            record.desired_memory = Some(scaled);
        }
    }

    let total_applied = records.iter().filter_map(|r| r.desired_memory).sum();

    BudgetOutcome {
        total_wanted,
        max_total,
        scale_factor,
        total_applied,
        floor_adjusted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balloon_gateway::FixedHostMemory;
    use balloon_types::{MemoryStats, VmId};
    use proptest::prelude::*;

    fn gib(n: u64) -> MemorySize {
        MemorySize::from_gib(n)
    }

    fn wanted(id: &str, size: MemorySize, free_target: MemorySize) -> VmRecord {
        let mut record = VmRecord::new(
            VmId::new(id),
            4,
            gib(256),
            MemoryStats {
                usable: MemorySize::ZERO,
                actual: size,
            },
        );
        record.free_target = free_target;
        record.set_wanted(size);
        record
    }

    fn budget(total_gib: u64, margin_gib: u64) -> HostBudget {
        HostBudget::new(gib(total_gib), gib(margin_gib)).unwrap()
    }

    #[test]
    fn test_under_budget_is_untouched() {
        let mut records = vec![wanted("a", gib(20), gib(4)), wanted("b", gib(24), gib(4))];
        let outcome = enforce_budget(&mut records, &budget(64, 4), &PolicyConfig::default());

        assert!(!outcome.was_scaled());
        assert_eq!(outcome.total_wanted, gib(44));
        assert_eq!(outcome.total_applied, gib(44));
        assert_eq!(records[0].desired_memory, Some(gib(20)));
        assert_eq!(records[1].desired_memory, Some(gib(24)));
    }

    #[test]
    fn test_exactly_at_budget_is_untouched() {
        let mut records = vec![wanted("a", gib(30), gib(4)), wanted("b", gib(30), gib(4))];
        let outcome = enforce_budget(&mut records, &budget(64, 4), &PolicyConfig::default());
        assert!(!outcome.was_scaled());
        assert_eq!(outcome.total_applied, gib(60));
    }

    #[test]
    fn test_over_budget_scales_proportionally() {
        let mut records = vec![wanted("a", gib(40), gib(4)), wanted("b", gib(40), gib(4))];
        let outcome = enforce_budget(&mut records, &budget(64, 4), &PolicyConfig::default());

        assert_eq!(outcome.scale_factor, Some(0.75));
        assert_eq!(records[0].desired_memory, Some(gib(30)));
        assert_eq!(records[1].desired_memory, Some(gib(30)));
        assert_eq!(records[0].wanted_memory, Some(gib(40)));
        assert_eq!(outcome.total_applied, gib(60));
    }

    #[test]
    fn test_scaling_may_cross_comfort_floor_by_default() {
        let mut records = vec![wanted("a", gib(8), gib(8)), wanted("b", gib(72), gib(4))];
        enforce_budget(&mut records, &budget(44, 4), &PolicyConfig::default());

        // factor = 40 / 80
        assert_eq!(records[0].desired_memory, Some(gib(4)));
        assert_eq!(records[1].desired_memory, Some(gib(36)));
    }

    #[test]
    fn test_floor_enforcement_after_scaling() {
        let policy = PolicyConfig {
            enforce_floor_after_scaling: true,
            ..Default::default()
        };
        let mut records = vec![wanted("a", gib(8), gib(8)), wanted("b", gib(72), gib(4))];
        let outcome = enforce_budget(&mut records, &budget(44, 4), &policy);

        assert_eq!(records[0].desired_memory, Some(gib(8)));
        assert_eq!(records[1].desired_memory, Some(gib(36)));
        assert_eq!(outcome.floor_adjusted, 1);
        assert!(outcome.exceeds_ceiling());
    }

    #[test]
    fn test_records_without_wanted_size_are_ignored() {
        let mut idle = wanted("idle", gib(100), gib(4));
        idle.wanted_memory = None;
        idle.desired_memory = None;
        let mut records = vec![idle, wanted("a", gib(20), gib(4))];

        let outcome = enforce_budget(&mut records, &budget(64, 4), &PolicyConfig::default());
        assert!(!outcome.was_scaled());
        assert_eq!(records[0].desired_memory, None);
    }

    #[test]
    fn test_derive_budget() {
        let policy = PolicyConfig::default();
        let budget = derive_budget(&FixedHostMemory(gib(64)), &policy).unwrap();
        assert_eq!(budget.max_total_memory(), gib(60));

        let err = derive_budget(&FixedHostMemory(gib(2)), &policy).unwrap_err();
        assert!(matches!(err, ControllerError::Config(_)));
    }

    struct UnreadableHost;

    impl HostMemorySource for UnreadableHost {
        fn total_physical_memory(&self) -> balloon_gateway::Result<MemorySize> {
            Err(balloon_gateway::GatewayError::HostMemoryUnavailable(
                "no /proc/meminfo".to_string(),
            ))
        }
    }

    #[test]
    fn test_derive_budget_reports_unreadable_host() {
        let err = derive_budget(&UnreadableHost, &PolicyConfig::default()).unwrap_err();
        assert!(matches!(err, ControllerError::Host(_)));
    }

    proptest! {
        #[test]
        fn prop_scaled_total_never_exceeds_ceiling(
            sizes in proptest::collection::vec(1u64..(256 * 1024 * 1024), 1..16),
            max_gib in 8u64..512,
        ) {
            let mut records: Vec<_> = sizes
                .iter()
                .enumerate()
                .map(|(i, kib)| wanted(&format!("vm-{i}"), MemorySize::from_kib(*kib), gib(4)))
                .collect();
            let host = budget(max_gib + 4, 4);
            let outcome = enforce_budget(&mut records, &host, &PolicyConfig::default());

            prop_assert!(outcome.total_applied <= host.max_total_memory());
            if let Some(factor) = outcome.scale_factor {
                prop_assert!(factor < 1.0);
                // Within one KiB per VM of the ceiling
                let slack = host.max_total_memory().as_kib() - outcome.total_applied.as_kib();
                prop_assert!(slack <= records.len() as u64);
                for record in &records {
                    let wanted = record.wanted_memory.unwrap();
                    prop_assert_eq!(
                        record.desired_memory,
                        Some(wanted.scale_ratio(outcome.max_total, outcome.total_wanted))
                    );
                }
            } else {
                prop_assert_eq!(outcome.total_applied, outcome.total_wanted);
            }
        }
    }
}
