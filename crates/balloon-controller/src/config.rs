//! Rebalance policy configuration
//!
//! Sizes are configured in bytes and converted to `MemorySize` (whole KiB)
//! on access. Durations are configured in whole seconds.

use crate::error::{ControllerError, Result};
use balloon_types::MemorySize;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GIB_BYTES: u64 = 1024 * 1024 * 1024;
const MIB_BYTES: u64 = 1024 * 1024;

/// Policy knobs for the rebalance controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Host memory kept out of the VM budget
    #[serde(default = "default_reserved_host_margin")]
    pub reserved_host_margin_bytes: u64,

    /// Free memory to aim for in every VM, regardless of size
    #[serde(default = "default_free_mem_target_absolute")]
    pub free_mem_target_absolute_bytes: u64,

    /// Free memory to aim for per virtual CPU
    #[serde(default = "default_free_mem_per_core_target")]
    pub free_mem_per_core_target_bytes: u64,

    /// Step that desired sizes are rounded to
    #[serde(default = "default_rounding_granularity")]
    pub rounding_granularity_bytes: u64,

    /// Pause between rebalance cycles
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Guest balloon statistics reporting period
    #[serde(default = "default_stats_period")]
    pub stats_period_secs: u32,

    /// Raise scaled sizes back to each VM's comfort target.
    /// The host ceiling may then be exceeded.
    #[serde(default)]
    pub enforce_floor_after_scaling: bool,

    /// Upper bound on any single hypervisor call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// First delay before reconnecting after the session is lost
    #[serde(default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay_secs: u64,

    /// Cap on the doubling reconnect delay
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,

    /// Consecutive failed reconnects before giving up (0 = never)
    #[serde(default)]
    pub reconnect_max_attempts: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reserved_host_margin_bytes: default_reserved_host_margin(),
            free_mem_target_absolute_bytes: default_free_mem_target_absolute(),
            free_mem_per_core_target_bytes: default_free_mem_per_core_target(),
            rounding_granularity_bytes: default_rounding_granularity(),
            cycle_interval_secs: default_cycle_interval(),
            stats_period_secs: default_stats_period(),
            enforce_floor_after_scaling: false,
            call_timeout_secs: default_call_timeout(),
            reconnect_initial_delay_secs: default_reconnect_initial_delay(),
            reconnect_max_delay_secs: default_reconnect_max_delay(),
            reconnect_max_attempts: 0,
        }
    }
}

// Default value helpers
fn default_reserved_host_margin() -> u64 {
    4 * GIB_BYTES
}

fn default_free_mem_target_absolute() -> u64 {
    4 * GIB_BYTES
}

fn default_free_mem_per_core_target() -> u64 {
    256 * MIB_BYTES
}

fn default_rounding_granularity() -> u64 {
    4 * GIB_BYTES
}

fn default_cycle_interval() -> u64 {
    2
}

fn default_stats_period() -> u32 {
    1
}

fn default_call_timeout() -> u64 {
    10
}

fn default_reconnect_initial_delay() -> u64 {
    1
}

fn default_reconnect_max_delay() -> u64 {
    30
}

impl PolicyConfig {
    pub fn reserved_host_margin(&self) -> MemorySize {
        MemorySize::from_bytes(self.reserved_host_margin_bytes)
    }

    pub fn free_mem_target_absolute(&self) -> MemorySize {
        MemorySize::from_bytes(self.free_mem_target_absolute_bytes)
    }

    pub fn free_mem_per_core_target(&self) -> MemorySize {
        MemorySize::from_bytes(self.free_mem_per_core_target_bytes)
    }

    pub fn rounding_granularity(&self) -> MemorySize {
        MemorySize::from_bytes(self.rounding_granularity_bytes)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_delay_secs)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    /// Reject values the control loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rounding_granularity().is_zero() {
            return Err(ControllerError::Config(
                "rounding_granularity_bytes must be at least 1 KiB".to_string(),
            ));
        }
        if self.free_mem_target_absolute().is_zero() {
            return Err(ControllerError::Config(
                "free_mem_target_absolute_bytes must be at least 1 KiB".to_string(),
            ));
        }
        if self.cycle_interval_secs == 0 {
            return Err(ControllerError::Config(
                "cycle_interval_secs must be positive".to_string(),
            ));
        }
        if self.stats_period_secs == 0 {
            return Err(ControllerError::Config(
                "stats_period_secs must be positive".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(ControllerError::Config(
                "call_timeout_secs must be positive".to_string(),
            ));
        }
        if self.reconnect_initial_delay_secs == 0
            || self.reconnect_max_delay_secs < self.reconnect_initial_delay_secs
        {
            return Err(ControllerError::Config(format!(
                "reconnect delays must satisfy 0 < initial ({}) <= max ({})",
                self.reconnect_initial_delay_secs, self.reconnect_max_delay_secs
            )));
        }
        Ok(())
    }
}
