//! Daemon wiring: backend selection, startup checks and shutdown

use crate::config::{DaemonConfig, GatewayConfig, SimulatedVmConfig};
use crate::error::DaemonResult;
use balloon_controller::{derive_budget, Controller, CycleReport};
use balloon_gateway::{
    FixedHostMemory, HostMemorySource, HypervisorGateway, InMemoryGateway, SysinfoHostMemory,
    VirshGateway,
};
use balloon_types::MemorySize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A connected rebalance controller, ready to run
pub struct Daemon {
    controller: Controller,
}

impl Daemon {
    /// Build the backend, derive the host budget and connect.
    ///
    /// Failing to connect here is fatal; once running, lost connections are
    /// retried by the controller.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let (gateway, host): (Arc<dyn HypervisorGateway>, Box<dyn HostMemorySource>) =
            match &config.gateway {
                GatewayConfig::Virsh { uri, program } => {
                    tracing::info!(
                        program = %program,
                        uri = uri.as_deref().unwrap_or("(default)"),
                        "Using virsh gateway"
                    );
                    (
                        Arc::new(VirshGateway::with_program(program.clone(), uri.clone())),
                        Box::new(SysinfoHostMemory),
                    )
                }
                GatewayConfig::Simulated {
                    host_memory_mib,
                    vms,
                } => {
                    let fleet = if vms.is_empty() {
                        SimulatedVmConfig::demo_fleet()
                    } else {
                        vms.clone()
                    };
                    let gateway = InMemoryGateway::new();
                    for vm in &fleet {
                        gateway.add_vm(vm.to_simulated_vm());
                    }
                    tracing::info!(
                        vms = fleet.len(),
                        host_memory_mib = host_memory_mib,
                        "Using simulated gateway"
                    );
                    (
                        Arc::new(gateway),
                        Box::new(FixedHostMemory(MemorySize::from_mib(*host_memory_mib))),
                    )
                }
            };

        let budget = derive_budget(host.as_ref(), &config.policy)?;

        let controller = Controller::new(gateway, budget, config.policy)?;
        controller.connect().await?;

        tracing::info!(
            host_memory = %budget.total_physical_memory,
            max_total = %budget.max_total_memory(),
            "Connected to hypervisor"
        );

        Ok(Self { controller })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Run a single cycle.
    pub async fn run_once(&mut self) -> DaemonResult<CycleReport> {
        Ok(self.controller.run_cycle().await?)
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(mut self) -> DaemonResult<()> {
        let cancel = CancellationToken::new();
        install_shutdown_handler(cancel.clone())?;

        self.controller.run(cancel).await?;

        tracing::info!("balloond shutting down");
        Ok(())
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
fn install_shutdown_handler(cancel: CancellationToken) -> DaemonResult<()> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                tracing::info!("Received terminate signal, initiating graceful shutdown");
            }
        }
        cancel.cancel();
    });

    Ok(())
}
