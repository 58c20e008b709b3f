//! Error types for balloon-controller

use balloon_gateway::GatewayError;
use balloon_types::{BudgetError, MemorySize, VmId};
use thiserror::Error;

/// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The hypervisor session is unusable
    #[error("Hypervisor connection error: {0}")]
    Connection(#[source] GatewayError),

    /// Listing VMs failed without losing the session; retried next cycle
    #[error("Failed to enumerate VMs: {0}")]
    Enumeration(#[source] GatewayError),

    /// A VM could not be evaluated; it is skipped for this cycle
    #[error("Statistics unavailable for {vm_id} ({operation}): {source}")]
    StatsUnavailable {
        vm_id: VmId,
        operation: &'static str,
        source: GatewayError,
    },

    /// Setting a VM's memory failed; retried next cycle
    #[error("Failed to apply {size} to {vm_id}: {source}")]
    ApplyFailed {
        vm_id: VmId,
        size: MemorySize,
        source: GatewayError,
    },

    /// Host physical memory could not be determined
    #[error("Host memory error: {0}")]
    Host(#[source] GatewayError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<BudgetError> for ControllerError {
    fn from(err: BudgetError) -> Self {
        ControllerError::Config(err.to_string())
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ControllerError::StatsUnavailable {
            vm_id: VmId::new("vm-a"),
            operation: "memory_stats",
            source: GatewayError::VmNotFound(VmId::new("vm-a")),
        };
        let message = err.to_string();
        assert!(message.contains("vm-a"));
        assert!(message.contains("memory_stats"));

        let err = ControllerError::ApplyFailed {
            vm_id: VmId::new("vm-b"),
            size: MemorySize::from_gib(24),
            source: GatewayError::Connection("closed".into()),
        };
        assert!(err.to_string().starts_with("Failed to apply 24 GiB to vm-b"));
    }

    #[test]
    fn test_budget_error_is_config_error() {
        let err: ControllerError = BudgetError::MarginTooLarge {
            margin: MemorySize::from_gib(8),
            total: MemorySize::from_gib(8),
        }
        .into();
        assert!(matches!(err, ControllerError::Config(_)));
    }
}
