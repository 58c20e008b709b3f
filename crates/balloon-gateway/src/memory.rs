//! In-memory gateway
//!
//! Simulates a fleet of VMs for development and testing. Setting a VM's
//! memory moves its usable memory by the same amount, the way a balloon
//! inflating or deflating changes what the guest sees as free.

use crate::error::{GatewayError, Result};
use crate::gateway::{HypervisorGateway, VmHandle};
use async_trait::async_trait;
use balloon_types::{MemorySize, MemoryStats, VmId, VmState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A simulated VM
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedVm {
    pub id: VmId,
    pub state: VmState,
    pub vcpus: u32,
    pub max_memory: MemorySize,
    pub actual: MemorySize,
    pub usable: MemorySize,

    /// Last statistics period requested for this VM
    pub stats_period: Option<u32>,

    /// Make `memory_stats` fail
    pub fail_stats: bool,

    /// Make `set_memory` fail
    pub fail_apply: bool,
}

impl SimulatedVm {
    pub fn running(
        id: impl Into<VmId>,
        vcpus: u32,
        max_memory: MemorySize,
        actual: MemorySize,
        usable: MemorySize,
    ) -> Self {
        Self {
            id: id.into(),
            state: VmState::Running,
            vcpus,
            max_memory,
            actual,
            usable,
            stats_period: None,
            fail_stats: false,
            fail_apply: false,
        }
    }

    pub fn with_state(mut self, state: VmState) -> Self {
        self.state = state;
        self
    }
}

struct Entry {
    seq: u64,
    vm: SimulatedVm,
}

struct Inner {
    vms: DashMap<VmId, Entry>,
    next_seq: AtomicU64,
    connected: AtomicBool,
    refuse_connections: AtomicBool,
    connect_attempts: AtomicU64,
    applied: Mutex<Vec<(VmId, MemorySize)>>,
    stats_period_requests: Mutex<Vec<(VmId, u32)>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory hypervisor gateway
#[derive(Clone)]
pub struct InMemoryGateway {
    inner: Arc<Inner>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                vms: DashMap::new(),
                next_seq: AtomicU64::new(0),
                connected: AtomicBool::new(true),
                refuse_connections: AtomicBool::new(false),
                connect_attempts: AtomicU64::new(0),
                applied: Mutex::new(Vec::new()),
                stats_period_requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Add or replace a VM. New VMs are listed after existing ones.
    pub fn add_vm(&self, vm: SimulatedVm) {
        let seq = match self.inner.vms.get(&vm.id) {
            Some(existing) => existing.seq,
            None => self.inner.next_seq.fetch_add(1, Ordering::SeqCst),
        };
        self.inner.vms.insert(vm.id.clone(), Entry { seq, vm });
    }

    pub fn remove_vm(&self, id: &VmId) -> Option<SimulatedVm> {
        self.inner.vms.remove(id).map(|(_, entry)| entry.vm)
    }

    pub fn vm(&self, id: &VmId) -> Option<SimulatedVm> {
        self.inner.vms.get(id).map(|entry| entry.vm.clone())
    }

    /// Mutate a VM in place. Returns false if it does not exist.
    pub fn update<F>(&self, id: &VmId, f: F) -> bool
    where
        F: FnOnce(&mut SimulatedVm),
    {
        match self.inner.vms.get_mut(id) {
            Some(mut entry) => {
                f(&mut entry.vm);
                true
            }
            None => false,
        }
    }

    pub fn set_state(&self, id: &VmId, state: VmState) -> bool {
        self.update(id, |vm| vm.state = state)
    }

    /// Drop the session; listing fails until `connect` succeeds.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Make `connect` fail while `refuse` is true.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Every successful `set_memory` call, in order
    pub fn applied(&self) -> Vec<(VmId, MemorySize)> {
        locked(&self.inner.applied).clone()
    }

    /// Every `set_memory_stats_period` call, in order
    pub fn stats_period_requests(&self) -> Vec<(VmId, u32)> {
        locked(&self.inner.stats_period_requests).clone()
    }

    pub fn clear_call_log(&self) {
        locked(&self.inner.applied).clear();
        locked(&self.inner.stats_period_requests).clear();
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HypervisorGateway for InMemoryGateway {
    async fn connect(&self) -> Result<()> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection(
                "simulated hypervisor refused the connection".to_string(),
            ));
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_all_vms(&self) -> Result<Vec<Box<dyn VmHandle>>> {
        if !self.is_connected() {
            return Err(GatewayError::Connection(
                "simulated hypervisor session lost".to_string(),
            ));
        }

        let mut ids: Vec<(u64, VmId)> = self
            .inner
            .vms
            .iter()
            .map(|entry| (entry.seq, entry.key().clone()))
            .collect();
        ids.sort();

        Ok(ids
            .into_iter()
            .map(|(_, id)| {
                Box::new(InMemoryVmHandle {
                    id,
                    inner: self.inner.clone(),
                }) as Box<dyn VmHandle>
            })
            .collect())
    }
}

struct InMemoryVmHandle {
    id: VmId,
    inner: Arc<Inner>,
}

impl InMemoryVmHandle {
    fn read<T>(&self, f: impl FnOnce(&SimulatedVm) -> T) -> Result<T> {
        self.inner
            .vms
            .get(&self.id)
            .map(|entry| f(&entry.vm))
            .ok_or_else(|| GatewayError::VmNotFound(self.id.clone()))
    }
}

#[async_trait]
impl VmHandle for InMemoryVmHandle {
    fn id(&self) -> &VmId {
        &self.id
    }

    async fn state(&self) -> Result<VmState> {
        self.read(|vm| vm.state.clone())
    }

    async fn max_vcpus(&self) -> Result<u32> {
        self.read(|vm| vm.vcpus)
    }

    async fn max_memory(&self) -> Result<MemorySize> {
        self.read(|vm| vm.max_memory)
    }

    async fn memory_stats(&self) -> Result<MemoryStats> {
        let (fail, stats) = self.read(|vm| {
            (
                vm.fail_stats,
                MemoryStats {
                    usable: vm.usable,
                    actual: vm.actual,
                },
            )
        })?;
        if fail {
            return Err(GatewayError::StatsUnavailable {
                vm_id: self.id.clone(),
                reason: "balloon driver did not report".to_string(),
            });
        }
        Ok(stats)
    }

    async fn set_memory_stats_period(&self, seconds: u32) -> Result<()> {
        let mut entry = self
            .inner
            .vms
            .get_mut(&self.id)
            .ok_or_else(|| GatewayError::VmNotFound(self.id.clone()))?;
        entry.vm.stats_period = Some(seconds);
        drop(entry);

        locked(&self.inner.stats_period_requests).push((self.id.clone(), seconds));
        Ok(())
    }

    async fn set_memory(&self, size: MemorySize) -> Result<()> {
        let mut entry = self
            .inner
            .vms
            .get_mut(&self.id)
            .ok_or_else(|| GatewayError::VmNotFound(self.id.clone()))?;
        let vm = &mut entry.vm;

        if vm.fail_apply {
            return Err(GatewayError::CommandFailed {
                command: format!("setmem {} {}", self.id, size.as_kib()),
                stderr: "simulated balloon failure".to_string(),
            });
        }
        if size > vm.max_memory {
            return Err(GatewayError::OutOfRange {
                vm_id: self.id.clone(),
                size,
                max: vm.max_memory,
            });
        }

        vm.usable = if size >= vm.actual {
            vm.usable.saturating_add(size.saturating_sub(vm.actual))
        } else {
            vm.usable.saturating_sub(vm.actual.saturating_sub(size))
        };
        vm.actual = size;
        drop(entry);

        locked(&self.inner.applied).push((self.id.clone(), size));
        Ok(())
    }
}
