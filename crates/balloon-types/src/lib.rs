//! Balloon Types - Core types for memory rebalancing
//!
//! The rebalancer periodically resizes the memory of every running VM on a
//! host through the hypervisor's balloon driver. This crate holds the types
//! shared by the gateway, the controller and the daemon.
//!
//! ## Key Concepts
//!
//! - **MemorySize**: A memory quantity in KiB, never a bare integer
//! - **VmId**: Hypervisor name of a VM, unique among listed domains
//! - **VmRecord**: Per-cycle view of one running VM
//! - **HostBudget**: Ceiling on the sum of all VM allocations

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod budget;
pub mod ids;
pub mod memory;
pub mod vm;

pub use budget::{BudgetError, HostBudget};
pub use ids::VmId;
pub use memory::{MemorySize, GIB, KIB, MIB};
pub use vm::{MemoryStats, VmRecord, VmState};
