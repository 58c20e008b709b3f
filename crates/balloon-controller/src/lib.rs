//! Balloon Controller - Periodic memory rebalancing
//!
//! Every cycle the controller reads each running VM's balloon statistics,
//! computes the allocation that leaves it a comfortable amount of free
//! memory, scales all allocations down together when their sum would exceed
//! the host ceiling, and applies the result.
//!
//! ## Cycle
//!
//! 1. Enumerate VMs; a failure here is a lost hypervisor connection
//! 2. Skip VMs that are not running and arm statistics reporting
//! 3. Compute each VM's wanted size from its free-memory target
//! 4. Enforce the host budget across the whole fleet
//! 5. Apply sizes, isolating per-VM failures

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod backoff;
pub mod budget;
pub mod config;
pub mod controller;
pub mod error;
pub mod policy;
pub mod report;

pub use backoff::Backoff;
pub use budget::{derive_budget, enforce_budget, BudgetOutcome};
pub use config::PolicyConfig;
pub use controller::Controller;
pub use error::{ControllerError, Result};
pub use policy::{compute_desired, compute_free_target};
pub use report::{CycleReport, ExcludedVm, ReportEntry};
