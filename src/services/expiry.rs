//! Invoice validity windows: the extension policy and the background sweep
//! that expires lapsed invoices.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::chain::ChainVerifier;
use crate::invoice::{InvoiceMutation, InvoiceStore};
use crate::types::unix_now_sec;

/// Computes extended validity windows.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryPolicy {
    pub window_secs: i64,
}

impl ExpiryPolicy {
    pub fn new(window_secs: i64) -> Self {
        Self { window_secs }
    }

    /// New expiry for an extension request: `max(current, now) + window`.
    ///
    /// Taking the max keeps an invoice with more remaining time than one
    /// fresh window from being shortened, and restarts a lapsed-but-pending
    /// invoice from now rather than stacking on the past.
    pub fn extended_expiry(&self, current_expires_at_sec: i64, now_sec: i64) -> i64 {
        current_expires_at_sec.max(now_sec) + self.window_secs
    }
}

/// Configuration for the expiry monitor service
#[derive(Debug, Clone)]
pub struct ExpiryMonitorConfig {
    /// How often to sweep for lapsed invoices
    pub sweep_interval: Duration,
}

impl Default for ExpiryMonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Service that expires pending invoices once their validity window lapses.
///
/// Each lapsed invoice gets one bounded verification pass before expiry, so
/// a payment the webhook never delivered is rescued rather than orphaned.
/// The paid/expired tie-break itself lives in the store's atomic update;
/// this service is just one of the racing callers.
pub struct ExpiryMonitor {
    store: Arc<dyn InvoiceStore>,
    verifier: Arc<ChainVerifier>,
    config: ExpiryMonitorConfig,
    shutdown_tx: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl ExpiryMonitor {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        verifier: Arc<ChainVerifier>,
        config: ExpiryMonitorConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            config,
            shutdown_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background sweep task
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel(1);
        {
            let mut tx_guard = self.shutdown_tx.lock().await;
            *tx_guard = Some(shutdown_tx.clone());
        }

        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "Starting expiry monitor service"
        );

        let store = self.store.clone();
        let verifier = self.verifier.clone();
        let sweep_interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let mut sweep_timer = interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = sweep_timer.tick() => {
                        if let Err(e) = Self::sweep(&store, &verifier).await {
                            error!(error = ?e, "Error during expiry sweep");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Expiry monitor received shutdown signal");
                        break;
                    }
                }
            }

            info!("Expiry monitor service stopped");
        });

        Ok(())
    }

    /// Stop the background sweep task
    pub async fn stop(&self) -> Result<()> {
        let tx_guard = self.shutdown_tx.lock().await;
        if let Some(shutdown_tx) = tx_guard.as_ref() {
            let _ = shutdown_tx.send(());
        }
        Ok(())
    }

    /// Run one sweep immediately; the background task calls this on a timer.
    pub async fn sweep_now(&self) -> Result<()> {
        Self::sweep(&self.store, &self.verifier).await
    }

    async fn sweep(store: &Arc<dyn InvoiceStore>, verifier: &Arc<ChainVerifier>) -> Result<()> {
        let now = unix_now_sec();
        let due = store.pending_due(now).await?;

        if due.is_empty() {
            return Ok(());
        }

        debug!(due = due.len(), "Sweeping lapsed pending invoices");

        for invoice in due {
            // Last verification before expiring: a payment may have landed
            // without its webhook ever arriving.
            let verification = match verifier.verify(&invoice).await {
                Ok(result) => result,
                Err(e) => {
                    // Provider trouble is not an invoice state; leave the
                    // invoice pending and let the next sweep retry.
                    warn!(
                        invoice_id = %invoice.id,
                        error = %e,
                        "Verification failed during expiry sweep, leaving pending"
                    );
                    continue;
                }
            };

            let mutation = match verification.into_proof() {
                Some(proof) => InvoiceMutation::MarkPaid(proof),
                None => InvoiceMutation::MarkExpired { now_sec: now },
            };

            match store.update(&invoice.id, mutation).await {
                Ok(outcome) => {
                    if outcome.changed() {
                        info!(
                            invoice_id = %invoice.id,
                            status = %outcome.invoice().status,
                            "Lapsed invoice settled by expiry sweep"
                        );
                    }
                }
                Err(e) => {
                    error!(invoice_id = %invoice.id, error = %e, "Failed to update lapsed invoice");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::chain::{
        LedgerRpc, SignatureInfo, TokenAmount, TokenBalance, TransactionDetail, VerifierConfig,
    };
    use crate::error::AppError;
    use crate::events::EventBus;
    use crate::invoice::{Invoice, InvoiceStatus, MemoryInvoiceStore};
    use crate::types::Pubkey;

    fn key(n: u8) -> Pubkey {
        Pubkey::new(bs58::encode([n; 32]).into_string()).unwrap()
    }

    #[test]
    fn extension_stacks_on_remaining_time() {
        let policy = ExpiryPolicy::new(120);
        let now = 1_000_000;

        // 30 seconds left: extension counts from the current expiry
        assert_eq!(policy.extended_expiry(now + 30, now), now + 150);
        // Already lapsed: extension counts from now
        assert_eq!(policy.extended_expiry(now - 30, now), now + 120);
        // Exactly at the boundary
        assert_eq!(policy.extended_expiry(now, now), now + 120);
    }

    struct ScriptedRpc {
        signatures: Vec<SignatureInfo>,
        transactions: HashMap<String, TransactionDetail>,
    }

    #[async_trait]
    impl LedgerRpc for ScriptedRpc {
        async fn signatures_for_address(
            &self,
            _address: &Pubkey,
            _limit: usize,
        ) -> Result<Vec<SignatureInfo>, AppError> {
            Ok(self.signatures.clone())
        }

        async fn transaction(
            &self,
            signature: &str,
        ) -> Result<Option<TransactionDetail>, AppError> {
            Ok(self.transactions.get(signature).cloned())
        }

        async fn health(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    struct DownRpc;

    #[async_trait]
    impl LedgerRpc for DownRpc {
        async fn signatures_for_address(
            &self,
            _address: &Pubkey,
            _limit: usize,
        ) -> Result<Vec<SignatureInfo>, AppError> {
            Err(AppError::upstream_unavailable("provider down"))
        }

        async fn transaction(
            &self,
            _signature: &str,
        ) -> Result<Option<TransactionDetail>, AppError> {
            Err(AppError::upstream_unavailable("provider down"))
        }

        async fn health(&self) -> Result<(), AppError> {
            Err(AppError::upstream_unavailable("provider down"))
        }
    }

    fn monitor_with_rpc(rpc: impl LedgerRpc + 'static) -> (Arc<dyn InvoiceStore>, ExpiryMonitor) {
        let bus = Arc::new(EventBus::new(64));
        let store: Arc<dyn InvoiceStore> = Arc::new(MemoryInvoiceStore::new(bus));
        let verifier = Arc::new(ChainVerifier::new(
            Arc::new(rpc),
            VerifierConfig::new(key(5)),
        ));
        let monitor = ExpiryMonitor::new(
            store.clone(),
            verifier,
            ExpiryMonitorConfig::default(),
        );
        (store, monitor)
    }

    #[tokio::test]
    async fn sweep_expires_lapsed_unpaid_invoices() {
        let (store, monitor) = monitor_with_rpc(ScriptedRpc {
            signatures: vec![],
            transactions: HashMap::new(),
        });

        let lapsed = store
            .create(Invoice::new(key(1), key(2), Some(Decimal::new(1000, 2)), -60))
            .await
            .unwrap();
        let fresh = store
            .create(Invoice::new(key(1), key(3), Some(Decimal::new(1000, 2)), 300))
            .await
            .unwrap();

        monitor.sweep_now().await.unwrap();

        assert_eq!(
            store.get(&lapsed.id).await.unwrap().unwrap().status,
            InvoiceStatus::Expired
        );
        assert_eq!(
            store.get(&fresh.id).await.unwrap().unwrap().status,
            InvoiceStatus::Pending
        );
    }

    #[tokio::test]
    async fn sweep_rescues_payment_that_landed_in_time() {
        let merchant = key(1);
        let mint = key(5);

        // Invoice lapsed 60 seconds ago; the matching transfer landed while
        // the window was still open but its webhook never arrived.
        let lapsed_invoice = Invoice::new(merchant.clone(), key(2), Some(Decimal::new(1000, 2)), -60);
        let paid_in_window = lapsed_invoice.expires_at_sec - 10;

        let rpc = ScriptedRpc {
            signatures: vec![SignatureInfo {
                signature: "sig-quiet".to_string(),
                slot: 42,
                block_time: Some(paid_in_window),
                err: None,
            }],
            transactions: HashMap::from([(
                "sig-quiet".to_string(),
                TransactionDetail {
                    slot: 42,
                    block_time: Some(paid_in_window),
                    err: None,
                    fee_payer: Some(key(8).as_str().to_string()),
                    pre_token_balances: vec![],
                    post_token_balances: vec![TokenBalance {
                        account_index: 1,
                        mint: mint.as_str().to_string(),
                        owner: Some(merchant.as_str().to_string()),
                        ui_token_amount: TokenAmount {
                            amount: "10000000".to_string(),
                            decimals: 6,
                        },
                    }],
                },
            )]),
        };

        let (store, monitor) = monitor_with_rpc(rpc);
        let invoice = store.create(lapsed_invoice).await.unwrap();

        monitor.sweep_now().await.unwrap();

        let stored = store.get(&invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(stored.paid_tx_sig.as_deref(), Some("sig-quiet"));
        assert_eq!(stored.paid_at_sec, Some(paid_in_window));
    }

    #[tokio::test]
    async fn provider_outage_leaves_invoices_pending() {
        let (store, monitor) = monitor_with_rpc(DownRpc);

        let lapsed = store
            .create(Invoice::new(key(1), key(2), Some(Decimal::new(1000, 2)), -60))
            .await
            .unwrap();

        monitor.sweep_now().await.unwrap();

        // An unreachable provider is never an invoice state
        assert_eq!(
            store.get(&lapsed.id).await.unwrap().unwrap().status,
            InvoiceStatus::Pending
        );
    }
}
