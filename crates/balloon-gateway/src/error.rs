//! Gateway error types

use balloon_types::{MemorySize, VmId};
use thiserror::Error;

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The hypervisor session could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("VM not found: {0}")]
    VmNotFound(VmId),

    #[error("Statistics unavailable for {vm_id}: {reason}")]
    StatsUnavailable { vm_id: VmId, reason: String },

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to parse {what} from {input:?}")]
    Parse { what: &'static str, input: String },

    #[error("Memory size {size} out of range for {vm_id} (max {max})")]
    OutOfRange {
        vm_id: VmId,
        size: MemorySize,
        max: MemorySize,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Host memory unavailable: {0}")]
    HostMemoryUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Whether the failure concerns the session rather than a single VM.
    pub fn is_connection(&self) -> bool {
        matches!(self, GatewayError::Connection(_))
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
