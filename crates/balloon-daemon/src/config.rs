//! Configuration for balloond

use balloon_controller::PolicyConfig;
use balloon_gateway::SimulatedVm;
use balloon_types::{MemorySize, VmState};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Hypervisor backend
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Rebalance policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hypervisor backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayConfig {
    /// libvirt through the `virsh` client
    Virsh {
        /// Connection URI; virsh's default when unset
        #[serde(default)]
        uri: Option<String>,

        /// Path or name of the virsh binary
        #[serde(default = "default_virsh_program")]
        program: String,
    },

    /// Simulated host and fleet (for development/testing)
    Simulated {
        /// Physical memory of the simulated host
        #[serde(default = "default_simulated_host_memory")]
        host_memory_mib: u64,

        /// Simulated VMs; a small demo fleet when empty
        #[serde(default)]
        vms: Vec<SimulatedVmConfig>,
    },
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig::Virsh {
            uri: None,
            program: default_virsh_program(),
        }
    }
}

impl GatewayConfig {
    pub fn simulated() -> Self {
        GatewayConfig::Simulated {
            host_memory_mib: default_simulated_host_memory(),
            vms: Vec::new(),
        }
    }
}

/// One simulated VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedVmConfig {
    pub name: String,
    pub vcpus: u32,
    pub max_memory_mib: u64,
    pub actual_memory_mib: u64,
    pub usable_memory_mib: u64,

    #[serde(default = "default_true")]
    pub running: bool,
}

impl SimulatedVmConfig {
    pub fn to_simulated_vm(&self) -> SimulatedVm {
        let vm = SimulatedVm::running(
            self.name.as_str(),
            self.vcpus,
            MemorySize::from_mib(self.max_memory_mib),
            MemorySize::from_mib(self.actual_memory_mib),
            MemorySize::from_mib(self.usable_memory_mib),
        );
        if self.running {
            vm
        } else {
            vm.with_state(VmState::NotRunning("shut off".to_string()))
        }
    }

    /// Fleet used when a simulated gateway lists no VMs
    pub fn demo_fleet() -> Vec<SimulatedVmConfig> {
        vec![
            SimulatedVmConfig {
                name: "vm-a".to_string(),
                vcpus: 4,
                max_memory_mib: 32 * 1024,
                actual_memory_mib: 20 * 1024,
                usable_memory_mib: 6 * 1024,
                running: true,
            },
            SimulatedVmConfig {
                name: "vm-b".to_string(),
                vcpus: 8,
                max_memory_mib: 32 * 1024,
                actual_memory_mib: 20 * 1024,
                usable_memory_mib: 1024,
                running: true,
            },
        ]
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_virsh_program() -> String {
    "virsh".to_string()
}

fn default_simulated_host_memory() -> u64 {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `BALLOON_*`
    /// environment variables, with `__` separating nested keys.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        Self::load_with(path.map(|p| config::File::with_name(p).required(false)))
    }

    fn load_with<S>(file: Option<S>) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BALLOON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
