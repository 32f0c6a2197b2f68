use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use crate::chain::{ChainVerifier, LedgerRpc, RpcClient, VerifierConfig};
use crate::config::Config;
use crate::error::AppError;
use crate::events::handlers::{LoggingEventHandler, MetricsEventHandler};
use crate::events::EventBus;
use crate::invoice::{InvoiceStore, MemoryInvoiceStore};
use crate::services::{ExpiryMonitor, ExpiryMonitorConfig, ExpiryPolicy};
use crate::types::Pubkey;
use crate::webhooks::notifier::notifier_handler;
use crate::webhooks::WebhookIngestor;

struct AppStateInner {
    config: Config,
    store: Arc<dyn InvoiceStore>,
    event_bus: Arc<EventBus>,
    rpc: Arc<dyn LedgerRpc>,
    verifier: Arc<ChainVerifier>,
    ingestor: Arc<WebhookIngestor>,
    expiry_monitor: Arc<ExpiryMonitor>,
    start_time: Instant,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let rpc: Arc<dyn LedgerRpc> = Arc::new(RpcClient::new(
            config.rpc_url.clone(),
            Duration::from_secs(config.rpc_timeout_secs),
        )?);
        Self::with_rpc(config, rpc)
    }

    /// Assemble state around a custom ledger client; tests inject mocks here.
    pub fn with_rpc(config: Config, rpc: Arc<dyn LedgerRpc>) -> Result<Self, AppError> {
        let token_mint = Pubkey::new(&config.token_mint).map_err(|e| {
            AppError::validation_error(format!("Invalid token-mint in config: {}", e))
        })?;

        let event_bus = Arc::new(EventBus::new(config.event_bus_capacity));
        let store: Arc<dyn InvoiceStore> = Arc::new(MemoryInvoiceStore::new(event_bus.clone()));

        let verifier = Arc::new(ChainVerifier::new(
            rpc.clone(),
            VerifierConfig {
                token_mint: token_mint.clone(),
                amount_tolerance: config.amount_tolerance,
                deadline: Duration::from_secs(config.verify_deadline_secs),
                max_signatures: config.verify_max_signatures,
            },
        ));

        let ingestor = Arc::new(WebhookIngestor::new(
            store.clone(),
            token_mint,
            config.amount_tolerance,
        ));

        let expiry_monitor = Arc::new(ExpiryMonitor::new(
            store.clone(),
            verifier.clone(),
            ExpiryMonitorConfig {
                sweep_interval: Duration::from_secs(config.expiry_sweep_interval_secs),
            },
        ));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                event_bus,
                rpc,
                verifier,
                ingestor,
                expiry_monitor,
                start_time: Instant::now(),
            }),
        })
    }

    /// Register the ambient event handlers (logging, metrics, and outbound
    /// merchant webhooks when endpoints are configured).
    pub async fn register_default_handlers(&self) -> Result<()> {
        let bus = self.event_bus();
        bus.register_handler(Arc::new(LoggingEventHandler::new()))
            .await;
        bus.register_handler(Arc::new(MetricsEventHandler::new()))
            .await;

        if let Some(notifier) = notifier_handler(&self.inner.config.merchant_webhooks)? {
            info!(
                endpoints = self.inner.config.merchant_webhooks.endpoints.len(),
                "Registering outbound webhook notifier"
            );
            bus.register_handler(notifier).await;
        }

        Ok(())
    }

    /// Start the background services (expiry monitor)
    pub async fn start_background_services(&self) -> Result<()> {
        self.inner.expiry_monitor.start().await
    }

    /// Stop the background services
    pub async fn stop_background_services(&self) -> Result<()> {
        self.inner.expiry_monitor.stop().await
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn InvoiceStore> {
        &self.inner.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.event_bus
    }

    pub fn rpc(&self) -> &Arc<dyn LedgerRpc> {
        &self.inner.rpc
    }

    pub fn verifier(&self) -> &Arc<ChainVerifier> {
        &self.inner.verifier
    }

    pub fn ingestor(&self) -> &Arc<WebhookIngestor> {
        &self.inner.ingestor
    }

    pub fn expiry_monitor(&self) -> &Arc<ExpiryMonitor> {
        &self.inner.expiry_monitor
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::new(self.inner.config.extension_window_secs)
    }

    pub fn stream_ceiling(&self) -> Duration {
        Duration::from_secs(self.inner.config.stream_ceiling_secs)
    }

    pub fn stream_keepalive(&self) -> Duration {
        Duration::from_secs(self.inner.config.stream_keepalive_secs)
    }

    pub fn uptime(&self) -> Duration {
        self.inner.start_time.elapsed()
    }
}
