//! Strongly-typed identifiers
//!
//! VMs are identified by the name the hypervisor lists them under.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a virtual machine (its hypervisor domain name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(String);

impl VmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for VmId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for VmId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_id_display_honours_width() {
        let id = VmId::new("web-01");
        assert_eq!(format!("{:<8}|", id), "web-01  |");
        assert_eq!(id.as_str(), "web-01");
    }

    #[test]
    fn test_vm_id_serializes_as_plain_string() {
        let id = VmId::from("db");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"db\"");
    }
}
