//! Rebalance controller
//!
//! One cycle is strictly sequential: enumerate every VM, evaluate each
//! running one, enforce the host budget over all of them, then apply. The
//! scale factor depends on every VM's wanted size, so no size is applied
//! before all are computed.

use crate::backoff::Backoff;
use crate::budget::enforce_budget;
use crate::config::PolicyConfig;
use crate::error::{ControllerError, Result};
use crate::policy::{compute_desired, compute_free_target};
use crate::report::{CycleReport, ExcludedVm, ReportEntry};
use balloon_gateway::{GatewayError, HypervisorGateway, VmHandle};
use balloon_types::{HostBudget, VmId, VmRecord};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bound a gateway call by `timeout`.
async fn bounded<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> balloon_gateway::Result<T>
where
    F: Future<Output = balloon_gateway::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn unavailable(
    vm_id: &VmId,
    operation: &'static str,
) -> impl FnOnce(GatewayError) -> ControllerError {
    let vm_id = vm_id.clone();
    move |source| ControllerError::StatsUnavailable {
        vm_id,
        operation,
        source,
    }
}

/// Periodic memory rebalancer for the VMs of one host
pub struct Controller {
    gateway: Arc<dyn HypervisorGateway>,
    budget: HostBudget,
    policy: PolicyConfig,

    /// Whether guest statistics reporting has been armed, per VM.
    /// Entries are never removed; a stopped VM's entry is reset to false.
    stats_tracking: HashMap<VmId, bool>,
}

impl Controller {
    pub fn new(
        gateway: Arc<dyn HypervisorGateway>,
        budget: HostBudget,
        policy: PolicyConfig,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            gateway,
            budget,
            policy,
            stats_tracking: HashMap::new(),
        })
    }

    pub fn budget(&self) -> &HostBudget {
        &self.budget
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn is_stats_tracking_enabled(&self, vm_id: &VmId) -> bool {
        self.stats_tracking.get(vm_id).copied().unwrap_or(false)
    }

    /// Establish the hypervisor session.
    pub async fn connect(&self) -> Result<()> {
        bounded(self.policy.call_timeout(), "connect", self.gateway.connect())
            .await
            .map_err(ControllerError::Connection)
    }

    /// Run one rebalance cycle.
    ///
    /// Only a failure to enumerate VMs fails the cycle; per-VM failures are
    /// logged and recorded in the report. A connection-class error or a
    /// timed-out listing means the session is lost.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let started_at = Utc::now();
        let timeout = self.policy.call_timeout();

        let vms = bounded(timeout, "list_all_vms", self.gateway.list_all_vms())
            .await
            .map_err(|e| {
                if e.is_connection() || matches!(e, GatewayError::Timeout { .. }) {
                    ControllerError::Connection(e)
                } else {
                    ControllerError::Enumeration(e)
                }
            })?;

        let mut handles: Vec<Box<dyn VmHandle>> = Vec::with_capacity(vms.len());
        let mut records: Vec<VmRecord> = Vec::with_capacity(vms.len());
        let mut excluded = Vec::new();
        let mut not_running = 0;

        for vm in vms {
            match self.evaluate_vm(vm.as_ref()).await {
                Ok(Some(record)) => {
                    handles.push(vm);
                    records.push(record);
                }
                Ok(None) => not_running += 1,
                Err(err) => {
                    tracing::warn!(vm_id = %vm.id(), error = %err, "Excluding VM from this cycle");
                    let reason = match &err {
                        ControllerError::StatsUnavailable {
                            operation, source, ..
                        } => format!("{}: {}", operation, source),
                        other => other.to_string(),
                    };
                    excluded.push(ExcludedVm {
                        vm_id: vm.id().clone(),
                        reason,
                    });
                }
            }
        }

        let budget = enforce_budget(&mut records, &self.budget, &self.policy);
        if let Some(factor) = budget.scale_factor {
            tracing::info!(
                factor = factor,
                total_wanted = %budget.total_wanted,
                max_total = %budget.max_total,
                "Excessive memory use, scaling down all VMs"
            );
        }
        if budget.exceeds_ceiling() {
            tracing::warn!(
                total_applied = %budget.total_applied,
                max_total = %budget.max_total,
                floor_adjusted = budget.floor_adjusted,
                "Comfort floors keep the fleet above the host ceiling"
            );
        }

        let mut entries = Vec::with_capacity(records.len());
        for (handle, record) in handles.iter().zip(&records) {
            let Some(size) = record.desired_memory else {
                continue;
            };

            let applied = bounded(timeout, "set_memory", handle.set_memory(size)).await;
            let apply_succeeded = match applied {
                Ok(()) => {
                    tracing::debug!(
                        vm_id = %record.id,
                        previous = %record.actual_memory,
                        applied = %size,
                        "Applied memory size"
                    );
                    true
                }
                Err(source) => {
                    let err = ControllerError::ApplyFailed {
                        vm_id: record.id.clone(),
                        size,
                        source,
                    };
                    tracing::warn!(vm_id = %record.id, error = %err, "Failed to apply memory size");
                    false
                }
            };

            entries.push(ReportEntry {
                vm_id: record.id.clone(),
                previous: record.actual_memory,
                wanted: record.wanted_memory.unwrap_or(size),
                applied: size,
                apply_succeeded,
            });
        }

        let report = CycleReport {
            started_at,
            entries,
            excluded,
            not_running,
            budget,
        };

        tracing::info!(
            rebalanced = report.entries.len(),
            excluded = report.excluded.len(),
            not_running = report.not_running,
            apply_failures = report.apply_failures(),
            total_wanted = %report.budget.total_wanted,
            total_applied = %report.budget.total_applied,
            "Rebalance cycle complete"
        );

        Ok(report)
    }

    /// Build this cycle's record for one VM, or `None` if it is not running.
    async fn evaluate_vm(&mut self, vm: &dyn VmHandle) -> Result<Option<VmRecord>> {
        let timeout = self.policy.call_timeout();

        let state = bounded(timeout, "state", vm.state())
            .await
            .map_err(unavailable(vm.id(), "state"))?;

        if !state.is_running() {
            self.stats_tracking.insert(vm.id().clone(), false);
            tracing::trace!(vm_id = %vm.id(), state = %state, "Skipping VM that is not running");
            return Ok(None);
        }

        if !self.is_stats_tracking_enabled(vm.id()) {
            let period = self.policy.stats_period_secs;
            let armed = bounded(
                timeout,
                "set_memory_stats_period",
                vm.set_memory_stats_period(period),
            )
            .await;
            match armed {
                Ok(()) => {
                    self.stats_tracking.insert(vm.id().clone(), true);
                    tracing::debug!(
                        vm_id = %vm.id(),
                        period_secs = period,
                        "Enabled balloon statistics"
                    );
                }
                Err(e) => {
                    self.stats_tracking.insert(vm.id().clone(), false);
                    tracing::warn!(
                        vm_id = %vm.id(),
                        error = %e,
                        "Failed to enable balloon statistics, retrying next cycle"
                    );
                }
            }
        }

        let vcpus = bounded(timeout, "max_vcpus", vm.max_vcpus())
            .await
            .map_err(unavailable(vm.id(), "max_vcpus"))?;
        let max_memory = bounded(timeout, "max_memory", vm.max_memory())
            .await
            .map_err(unavailable(vm.id(), "max_memory"))?;
        let stats = bounded(timeout, "memory_stats", vm.memory_stats())
            .await
            .map_err(unavailable(vm.id(), "memory_stats"))?;

        let mut record = VmRecord::new(vm.id().clone(), vcpus, max_memory, stats);
        record.free_target = compute_free_target(&self.policy, vcpus);
        record.set_wanted(compute_desired(&self.policy, &record));

        tracing::trace!(
            vm_id = %record.id,
            actual = %record.actual_memory,
            usable = %record.usable_memory,
            free_target = %record.free_target,
            wanted = ?record.wanted_memory,
            "Evaluated VM"
        );

        Ok(Some(record))
    }

    /// Run cycles until `cancel` fires.
    ///
    /// The pause between cycles and the reconnect backoff both end early on
    /// cancellation. Returns an error only if reconnecting is given up.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            max_total = %self.budget.max_total_memory(),
            interval_secs = self.policy.cycle_interval_secs,
            "Rebalance controller started"
        );

        while !cancel.is_cancelled() {
            match self.run_cycle().await {
                Ok(report) => println!("{}", report),
                Err(ControllerError::Connection(e)) => {
                    tracing::warn!(error = %e, "Lost hypervisor connection");
                    if !self.reconnect(&cancel).await? {
                        break;
                    }
                    continue;
                }
                Err(e) => tracing::error!(error = %e, "Rebalance cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.policy.cycle_interval()) => {}
            }
        }

        tracing::info!("Rebalance controller stopped");
        Ok(())
    }

    /// Retry `connect` with backoff. Returns false if cancelled first.
    async fn reconnect(&self, cancel: &CancellationToken) -> Result<bool> {
        let mut backoff = Backoff::new(
            self.policy.reconnect_initial_delay(),
            self.policy.reconnect_max_delay(),
        );

        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect().await {
                Ok(()) => {
                    tracing::info!(attempts = backoff.attempts(), "Reconnected to hypervisor");
                    return Ok(true);
                }
                Err(e) => {
                    let max_attempts = self.policy.reconnect_max_attempts;
                    if max_attempts != 0 && backoff.attempts() >= max_attempts {
                        tracing::error!(
                            attempts = backoff.attempts(),
                            error = %e,
                            "Giving up on hypervisor connection"
                        );
                        return Err(e);
                    }
                    tracing::warn!(attempts = backoff.attempts(), error = %e, "Reconnect failed");
                }
            }
        }
    }
}
