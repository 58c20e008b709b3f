//! Hypervisor gateway traits
//!
//! The controller only ever sees a hypervisor through these two traits, so
//! any backend that can list domains, read balloon statistics and set a
//! domain's memory can be rebalanced.

use crate::error::Result;
use async_trait::async_trait;
use balloon_types::{MemorySize, MemoryStats, VmId, VmState};

/// A session with a hypervisor
#[async_trait]
pub trait HypervisorGateway: Send + Sync {
    /// Establish the session, or verify that it is still usable
    async fn connect(&self) -> Result<()>;

    /// All VMs known to the hypervisor, running or not
    async fn list_all_vms(&self) -> Result<Vec<Box<dyn VmHandle>>>;
}

/// One VM known to the hypervisor
#[async_trait]
pub trait VmHandle: Send + Sync {
    /// Stable identifier, unique while the VM exists
    fn id(&self) -> &VmId;

    async fn state(&self) -> Result<VmState>;

    async fn is_running(&self) -> Result<bool> {
        Ok(self.state().await?.is_running())
    }

    /// Maximum configured virtual CPUs
    async fn max_vcpus(&self) -> Result<u32>;

    /// Upper bound the VM's allocation may not exceed
    async fn max_memory(&self) -> Result<MemorySize>;

    /// Current balloon statistics
    async fn memory_stats(&self) -> Result<MemoryStats>;

    /// Ask the guest to report balloon statistics every `seconds`
    async fn set_memory_stats_period(&self, seconds: u32) -> Result<()>;

    /// Resize the VM's allocation through the balloon
    async fn set_memory(&self, size: MemorySize) -> Result<()>;
}
