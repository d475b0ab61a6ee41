//! Service state management

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use compliance_clock::{ComplianceMonitor, SystemClock};
use compliance_engine::ComplianceStateMachine;
use emission_store::{ComplianceStatus, EntityId, InMemoryStore, MonitoredEntity};
use ledger_gateway::{
    CreditAmount, JsonRpcLedgerClient, LedgerClient, LedgerGateway, SimulatedLedger,
};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::{LedgerMode, MetricsConfig, ServiceConfig};

/// Main service state containing all components
pub struct ServiceState {
    pub config: ServiceConfig,
    pub store: Arc<InMemoryStore>,
    /// Present only in simulated ledger mode
    pub simulated_ledger: Option<Arc<SimulatedLedger>>,
    pub monitor: Arc<ComplianceMonitor>,
}

impl ServiceState {
    /// Build store, ledger client, state machine and monitor from configuration
    pub fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing service state...");

        let store = Arc::new(InMemoryStore::new());
        for seed in &config.entities {
            let mut entity = MonitoredEntity::new(EntityId(seed.id), seed.ledger_account.clone());
            if let Some(cap) = seed.cap {
                entity = entity.with_cap(cap);
            }
            store.upsert_entity(entity);
        }
        info!("Seeded {} entities into the store", config.entities.len());

        let (client, simulated_ledger): (Arc<dyn LedgerClient>, _) = match config.ledger.mode {
            LedgerMode::Rpc => {
                let client = JsonRpcLedgerClient::new(&config.ledger.rpc)
                    .context("Failed to create ledger RPC client")?;
                info!("Using ledger RPC endpoint {}", client.endpoint());
                (Arc::new(client), None)
            }
            LedgerMode::Simulated => {
                let ledger = Arc::new(SimulatedLedger::new());
                for seed in &config.entities {
                    if let Some(balance) = seed.opening_balance {
                        let balance = CreditAmount::from_decimal(balance).with_context(|| {
                            format!("Invalid opening balance for entity {}", seed.id)
                        })?;
                        ledger.seed_account(&seed.ledger_account, balance);
                    }
                }
                warn!("Using the simulated in-process ledger");
                (ledger.clone(), Some(ledger))
            }
        };

        let gateway = Arc::new(LedgerGateway::new(client, config.gateway.clone()));
        let machine =
            Arc::new(ComplianceStateMachine::new(store.clone(), gateway, config.engine.clone()));
        let monitor = Arc::new(
            ComplianceMonitor::new(machine, Arc::new(SystemClock), config.clock.clone())
                .context("Failed to create ComplianceMonitor")?,
        );

        info!("Service state initialized");
        Ok(Self { config, store, simulated_ledger, monitor })
    }

    /// Register every seeded entity with the monitor.
    ///
    /// A failed registration is logged and left for the operator; the
    /// remaining entities are still registered. Returns how many succeeded.
    pub async fn register_seeded_entities(&self) -> Result<usize> {
        let mut registered = 0;
        for seed in &self.config.entities {
            let entity_id = EntityId(seed.id);
            match self.monitor.register_entity(entity_id).await {
                Ok(_) => registered += 1,
                Err(e) => warn!(entity_id = %entity_id, error = %e, "Failed to register entity"),
            }
        }
        info!("Registered {}/{} entities", registered, self.config.entities.len());
        Ok(registered)
    }

    /// Start the tick and sweep schedulers
    pub fn start_monitor(&self) -> Result<()> {
        self.monitor.start().context("Failed to start ComplianceMonitor")?;
        let status = self.monitor.status();
        info!(
            next_tick_at = ?status.next_tick_at,
            monitored = status.monitored_count,
            "ComplianceMonitor running"
        );
        Ok(())
    }

    pub fn stop_monitor(&self) {
        self.monitor.stop();
    }

    pub fn is_running(&self) -> bool {
        self.monitor.status().running
    }

    /// Get service health status
    pub fn health_check(&self) -> ServiceHealth {
        if !self.is_running() {
            return ServiceHealth::Unhealthy;
        }

        let flagged = self
            .monitor
            .monitored_entities()
            .into_iter()
            .filter_map(|id| self.store.entity(id))
            .any(|entity| entity.compliance_status == ComplianceStatus::Flagged);

        if flagged {
            ServiceHealth::Degraded
        } else {
            ServiceHealth::Healthy
        }
    }

    /// Stop scheduling and wait for in-flight cycles.
    /// Returns false if they were still running at the timeout.
    pub async fn shutdown(&self) -> bool {
        info!("Stopping ComplianceMonitor...");
        self.stop_monitor();

        let timeout = self.config.service.shutdown_timeout().min(self.config.clock.shutdown_timeout());
        let idle = self.monitor.wait_idle(timeout).await;
        if idle {
            info!("All in-flight cycles finished");
        }
        idle
    }
}

/// Service health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    /// Running, but at least one monitored entity is flagged
    Degraded,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }
}

/// Serve the `metrics` facade over HTTP in Prometheus format
pub fn install_metrics_exporter(config: &MetricsConfig) -> Result<()> {
    let addr = config.socket_addr()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics exporter listening on {}", addr);
    Ok(())
}
