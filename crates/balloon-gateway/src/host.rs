//! Host physical-memory discovery

use crate::error::{GatewayError, Result};
use balloon_types::MemorySize;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Source of the host's total physical memory
pub trait HostMemorySource: Send + Sync {
    fn total_physical_memory(&self) -> Result<MemorySize>;
}

/// Reads physical memory from the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoHostMemory;

impl HostMemorySource for SysinfoHostMemory {
    fn total_physical_memory(&self) -> Result<MemorySize> {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        match sys.total_memory() {
            0 => Err(GatewayError::HostMemoryUnavailable(
                "operating system reported zero physical memory".to_string(),
            )),
            bytes => Ok(MemorySize::from_bytes(bytes)),
        }
    }
}

/// A fixed amount of physical memory, for simulation and tests
#[derive(Debug, Clone, Copy)]
pub struct FixedHostMemory(pub MemorySize);

impl HostMemorySource for FixedHostMemory {
    fn total_physical_memory(&self) -> Result<MemorySize> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_reports_some_memory() {
        let total = SysinfoHostMemory.total_physical_memory().unwrap();
        assert!(total > MemorySize::ZERO);
    }

    #[test]
    fn test_fixed_host_memory() {
        let host = FixedHostMemory(MemorySize::from_gib(64));
        assert_eq!(host.total_physical_memory().unwrap(), MemorySize::from_gib(64));
    }
}
