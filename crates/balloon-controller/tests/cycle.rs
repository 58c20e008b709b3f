//! Full rebalance cycles against the in-memory gateway

use balloon_controller::{derive_budget, Controller, PolicyConfig};
use balloon_gateway::{FixedHostMemory, InMemoryGateway, SimulatedVm};
use balloon_types::{MemorySize, VmId, VmState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn gib(n: u64) -> MemorySize {
    MemorySize::from_gib(n)
}

fn id(name: &str) -> VmId {
    VmId::new(name)
}

/// VM-A has 2 GiB more free memory than its target, VM-B 3 GiB less.
fn two_vm_fleet() -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    gateway.add_vm(SimulatedVm::running("vm-a", 4, gib(32), gib(20), gib(6)));
    gateway.add_vm(SimulatedVm::running("vm-b", 8, gib(32), gib(20), gib(1)));
    gateway
}

fn controller_for(gateway: &InMemoryGateway, host_gib: u64, policy: PolicyConfig) -> Controller {
    let budget = derive_budget(&FixedHostMemory(gib(host_gib)), &policy).unwrap();
    Controller::new(Arc::new(gateway.clone()), budget, policy).unwrap()
}

#[tokio::test]
async fn test_balanced_host_applies_rounded_sizes() {
    let gateway = two_vm_fleet();
    let mut controller = controller_for(&gateway, 64, PolicyConfig::default());
    assert_eq!(controller.budget().max_total_memory(), gib(60));

    let report = controller.run_cycle().await.unwrap();

    assert!(!report.budget.was_scaled());
    assert_eq!(report.budget.total_wanted, gib(44));
    assert_eq!(report.entry(&id("vm-a")).unwrap().applied, gib(20));
    assert_eq!(report.entry(&id("vm-b")).unwrap().applied, gib(24));
    assert_eq!(
        gateway.applied(),
        vec![(id("vm-a"), gib(20)), (id("vm-b"), gib(24))]
    );
}

#[tokio::test]
async fn test_oversubscribed_host_scales_every_vm_equally() {
    let gateway = two_vm_fleet();
    let mut controller = controller_for(&gateway, 40, PolicyConfig::default());
    let max_total = gib(36);

    let report = controller.run_cycle().await.unwrap();

    let factor = report.budget.scale_factor.unwrap();
    assert!((factor - 36.0 / 44.0).abs() < 1e-9);
    assert!(report.budget.total_applied <= max_total);

    // Flooring to whole KiB loses at most 1 KiB per VM
    let shortfall = max_total.saturating_sub(report.budget.total_applied);
    assert!(shortfall.as_kib() <= 2);

    for entry in &report.entries {
        assert_eq!(entry.applied, entry.wanted.scale_ratio(max_total, gib(44)));
        assert!(entry.applied < entry.wanted);
    }
    assert!(!report.to_string().is_empty());
}

#[tokio::test]
async fn test_floor_enforcement_after_scaling_is_opt_in() {
    // Four 4-core VMs each wanting 8 GiB on a host with 20 GiB to give
    let gateway = InMemoryGateway::new();
    for name in ["a", "b", "c", "d"] {
        gateway.add_vm(SimulatedVm::running(name, 4, gib(16), gib(8), gib(4)));
    }

    let mut lenient = controller_for(&gateway, 24, PolicyConfig::default());
    let report = lenient.run_cycle().await.unwrap();
    assert_eq!(report.budget.floor_adjusted, 0);
    assert!(!report.budget.exceeds_ceiling());
    assert!(report.entries.iter().all(|e| e.applied == gib(5)));

    gateway.clear_call_log();
    let policy = PolicyConfig {
        enforce_floor_after_scaling: true,
        free_mem_target_absolute_bytes: 6 * 1024 * 1024 * 1024,
        ..Default::default()
    };
    let mut strict = controller_for(&gateway, 24, policy);
    let report = strict.run_cycle().await.unwrap();
    assert_eq!(report.budget.floor_adjusted, 4);
    assert!(report.budget.exceeds_ceiling());
    assert!(report.entries.iter().all(|e| e.applied >= gib(6)));
}

#[tokio::test]
async fn test_repeated_cycles_are_idempotent() {
    let gateway = two_vm_fleet();
    let mut controller = controller_for(&gateway, 40, PolicyConfig::default());

    let first = controller.run_cycle().await.unwrap();
    let second = controller.run_cycle().await.unwrap();

    for entry in &first.entries {
        let again = second.entry(&entry.vm_id).unwrap();
        assert_eq!(again.wanted, entry.wanted);
        assert_eq!(again.applied, entry.applied);
    }
}

#[tokio::test]
async fn test_statistics_armed_once_and_rearmed_after_restart() {
    let gateway = two_vm_fleet();
    let mut controller = controller_for(&gateway, 64, PolicyConfig::default());

    controller.run_cycle().await.unwrap();
    controller.run_cycle().await.unwrap();
    assert_eq!(gateway.stats_period_requests().len(), 2);

    gateway.set_state(&id("vm-a"), VmState::NotRunning("shut off".into()));
    gateway.clear_call_log();
    let report = controller.run_cycle().await.unwrap();
    assert_eq!(report.not_running, 1);
    assert!(report.entry(&id("vm-a")).is_none());
    assert!(!controller.is_stats_tracking_enabled(&id("vm-a")));
    assert!(controller.is_stats_tracking_enabled(&id("vm-b")));
    assert_eq!(gateway.applied(), vec![(id("vm-b"), gib(24))]);

    gateway.set_state(&id("vm-a"), VmState::Running);
    controller.run_cycle().await.unwrap();
    assert_eq!(gateway.stats_period_requests(), vec![(id("vm-a"), 1)]);
    assert!(controller.is_stats_tracking_enabled(&id("vm-a")));
}

#[tokio::test]
async fn test_stats_failure_excludes_only_that_vm() {
    let gateway = two_vm_fleet();
    let mut broken = SimulatedVm::running("vm-c", 2, gib(16), gib(8), gib(2));
    broken.fail_stats = true;
    gateway.add_vm(broken);
    let mut controller = controller_for(&gateway, 64, PolicyConfig::default());

    let report = controller.run_cycle().await.unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].vm_id, id("vm-c"));
    assert!(report.excluded[0].reason.starts_with("memory_stats"));
    assert!(gateway.applied().iter().all(|(vm, _)| vm != &id("vm-c")));
}

#[tokio::test]
async fn test_apply_failure_does_not_stop_the_cycle() {
    let gateway = two_vm_fleet();
    gateway.update(&id("vm-a"), |vm| vm.fail_apply = true);
    let mut controller = controller_for(&gateway, 64, PolicyConfig::default());

    let report = controller.run_cycle().await.unwrap();

    assert_eq!(report.apply_failures(), 1);
    assert!(!report.entry(&id("vm-a")).unwrap().apply_succeeded);
    assert!(report.entry(&id("vm-b")).unwrap().apply_succeeded);
    assert_eq!(gateway.applied(), vec![(id("vm-b"), gib(24))]);
}

#[tokio::test]
async fn test_removed_vm_does_not_linger() {
    let gateway = two_vm_fleet();
    let mut controller = controller_for(&gateway, 64, PolicyConfig::default());
    controller.run_cycle().await.unwrap();

    gateway.remove_vm(&id("vm-b"));
    let report = controller.run_cycle().await.unwrap();

    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.budget.total_wanted, gib(20));
}

#[tokio::test(start_paused = true)]
async fn test_run_survives_a_hypervisor_restart() {
    let gateway = two_vm_fleet();
    let mut controller = controller_for(&gateway, 64, PolicyConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let remote = gateway.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        remote.disconnect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    controller.run(cancel).await.unwrap();

    assert!(gateway.is_connected());
    assert!(gateway.connect_attempts() >= 1);
    // Two cycles before the loss, more after reconnecting
    assert!(gateway.applied().len() > 4);
}
