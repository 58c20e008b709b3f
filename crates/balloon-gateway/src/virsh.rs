//! libvirt gateway over the `virsh` command-line client
//!
//! Every operation spawns one `virsh` process. Sizes are exchanged in KiB,
//! virsh's default unit for `setmem`, `dominfo` and `dommemstat`.

use crate::error::{GatewayError, Result};
use crate::gateway::{HypervisorGateway, VmHandle};
use async_trait::async_trait;
use balloon_types::{MemorySize, MemoryStats, VmId, VmState};
use std::sync::Arc;
use tokio::process::Command;

/// Runs `virsh` against one libvirt connection URI
#[derive(Debug, Clone)]
struct VirshRunner {
    program: String,
    uri: Option<String>,
}

impl VirshRunner {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.program);
        if let Some(uri) = &self.uri {
            command.arg("-c").arg(uri);
        }
        command.args(args).kill_on_drop(true);

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GatewayError::Connection(format!("`{}` not found: {}", self.program, e))
            } else {
                GatewayError::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(&args.join(" "), stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn classify_failure(command: &str, stderr: String) -> GatewayError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("failed to connect")
        || lowered.contains("no connection driver")
        || lowered.contains("connection is closed")
        || lowered.contains("end of file while reading data")
    {
        GatewayError::Connection(stderr)
    } else {
        GatewayError::CommandFailed {
            command: command.to_string(),
            stderr,
        }
    }
}

fn is_missing_domain(err: &GatewayError) -> bool {
    match err {
        GatewayError::CommandFailed { stderr, .. } => {
            let lowered = stderr.to_lowercase();
            lowered.contains("domain not found") || lowered.contains("failed to get domain")
        }
        _ => false,
    }
}

/// Gateway backed by the `virsh` binary
#[derive(Debug, Clone)]
pub struct VirshGateway {
    runner: Arc<VirshRunner>,
}

impl VirshGateway {
    /// `uri` of `None` lets virsh pick its default connection.
    pub fn new(uri: Option<String>) -> Self {
        Self::with_program("virsh", uri)
    }

    pub fn with_program(program: impl Into<String>, uri: Option<String>) -> Self {
        Self {
            runner: Arc::new(VirshRunner {
                program: program.into(),
                uri,
            }),
        }
    }
}

#[async_trait]
impl HypervisorGateway for VirshGateway {
    async fn connect(&self) -> Result<()> {
        let uri = self.runner.run(&["uri"]).await?;
        tracing::debug!(uri = %uri.trim(), "Connected to libvirt");
        Ok(())
    }

    async fn list_all_vms(&self) -> Result<Vec<Box<dyn VmHandle>>> {
        let output = self.runner.run(&["list", "--all", "--name"]).await?;
        Ok(parse_domain_list(&output)
            .into_iter()
            .map(|id| {
                Box::new(VirshDomain {
                    id,
                    runner: self.runner.clone(),
                }) as Box<dyn VmHandle>
            })
            .collect())
    }
}

struct VirshDomain {
    id: VmId,
    runner: Arc<VirshRunner>,
}

impl VirshDomain {
    async fn run(&self, args: &[&str]) -> Result<String> {
        self.runner.run(args).await.map_err(|e| {
            if is_missing_domain(&e) {
                GatewayError::VmNotFound(self.id.clone())
            } else {
                e
            }
        })
    }
}

#[async_trait]
impl VmHandle for VirshDomain {
    fn id(&self) -> &VmId {
        &self.id
    }

    async fn state(&self) -> Result<VmState> {
        let output = self.run(&["domstate", self.id.as_str()]).await?;
        Ok(parse_domain_state(&output))
    }

    async fn max_vcpus(&self) -> Result<u32> {
        let output = self
            .run(&["vcpucount", self.id.as_str(), "--maximum", "--live"])
            .await?;
        parse_vcpu_count(&output)
    }

    async fn max_memory(&self) -> Result<MemorySize> {
        let output = self.run(&["dominfo", self.id.as_str()]).await?;
        parse_max_memory(&output)
    }

    async fn memory_stats(&self) -> Result<MemoryStats> {
        let output = self.run(&["dommemstat", self.id.as_str()]).await?;
        parse_memory_stats(&self.id, &output)
    }

    async fn set_memory_stats_period(&self, seconds: u32) -> Result<()> {
        let period = seconds.to_string();
        self.run(&["dommemstat", self.id.as_str(), "--period", period.as_str(), "--live"])
            .await?;
        Ok(())
    }

    async fn set_memory(&self, size: MemorySize) -> Result<()> {
        let kib = size.as_kib().to_string();
        self.run(&["setmem", self.id.as_str(), kib.as_str(), "--live"])
            .await?;
        Ok(())
    }
}

fn parse_domain_list(output: &str) -> Vec<VmId> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(VmId::new)
        .collect()
}

fn parse_domain_state(output: &str) -> VmState {
    match output.trim() {
        "running" => VmState::Running,
        other => VmState::NotRunning(other.to_string()),
    }
}

fn parse_vcpu_count(output: &str) -> Result<u32> {
    output.trim().parse().map_err(|_| GatewayError::Parse {
        what: "vCPU count",
        input: output.trim().to_string(),
    })
}

fn parse_max_memory(dominfo: &str) -> Result<MemorySize> {
    let value = dominfo
        .lines()
        .find_map(|line| line.trim().strip_prefix("Max memory:"))
        .ok_or_else(|| GatewayError::Parse {
            what: "max memory",
            input: dominfo.to_string(),
        })?;

    let kib = value
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| GatewayError::Parse {
            what: "max memory",
            input: value.trim().to_string(),
        })?;
    Ok(MemorySize::from_kib(kib))
}

fn parse_memory_stats(vm_id: &VmId, output: &str) -> Result<MemoryStats> {
    let mut actual = None;
    let mut usable = None;

    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(kib) = value.parse::<u64>() else {
            continue;
        };
        match key {
            "actual" => actual = Some(MemorySize::from_kib(kib)),
            "usable" => usable = Some(MemorySize::from_kib(kib)),
            _ => {}
        }
    }

    match (usable, actual) {
        (Some(usable), Some(actual)) => Ok(MemoryStats { usable, actual }),
        (None, _) => Err(GatewayError::StatsUnavailable {
            vm_id: vm_id.clone(),
            reason: "guest did not report usable memory".to_string(),
        }),
        (_, None) => Err(GatewayError::StatsUnavailable {
            vm_id: vm_id.clone(),
            reason: "hypervisor did not report actual memory".to_string(),
        }),
    }
}
