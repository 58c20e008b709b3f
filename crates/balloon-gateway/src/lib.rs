//! Balloon Gateway - The hypervisor boundary of the rebalancer
//!
//! This crate provides the interfaces the rebalance controller needs from a
//! hypervisor, plus the backends that implement them:
//!
//! - **HypervisorGateway**: Enumerates VMs and (re)establishes the session
//! - **VmHandle**: Per-VM statistics and the balloon memory setter
//! - **HostMemorySource**: Physical memory of the host
//!
//! ## Backends
//!
//! - `VirshGateway` drives libvirt through the `virsh` command-line client
//! - `InMemoryGateway` simulates a fleet, for development and testing
//! - `SysinfoHostMemory` reads physical memory via `sysinfo`

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod gateway;
pub mod host;
pub mod memory;
pub mod virsh;

// Re-exports
pub use error::{GatewayError, Result};
pub use gateway::{HypervisorGateway, VmHandle};
pub use host::{FixedHostMemory, HostMemorySource, SysinfoHostMemory};
pub use memory::{InMemoryGateway, SimulatedVm};
pub use virsh::VirshGateway;
