use async_trait::async_trait;
use tracing::{info, warn};

use crate::events::{EventHandler, InvoiceEvent};

/// Event handler that logs all invoice events with appropriate levels
pub struct LoggingEventHandler;

impl LoggingEventHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, event: InvoiceEvent) -> anyhow::Result<()> {
        match event {
            InvoiceEvent::InvoiceCreated {
                invoice_id,
                reference,
                amount_usd,
                timestamp,
            } => {
                info!(
                    event_type = "invoice_created",
                    invoice_id = %invoice_id,
                    reference = %reference,
                    amount_usd = ?amount_usd,
                    timestamp = %timestamp,
                    "Invoice created"
                );
            }
            InvoiceEvent::InvoicePaid {
                invoice_id,
                payer,
                tx_signature,
                amount_usd,
                timestamp,
            } => {
                info!(
                    event_type = "invoice_paid",
                    invoice_id = %invoice_id,
                    payer = ?payer,
                    tx_signature = %tx_signature,
                    amount_usd = ?amount_usd,
                    timestamp = %timestamp,
                    "Invoice paid"
                );
            }
            InvoiceEvent::InvoiceExpired {
                invoice_id,
                timestamp,
            } => {
                warn!(
                    event_type = "invoice_expired",
                    invoice_id = %invoice_id,
                    timestamp = %timestamp,
                    "Invoice expired without payment"
                );
            }
            InvoiceEvent::InvoiceDeclined {
                invoice_id,
                timestamp,
            } => {
                warn!(
                    event_type = "invoice_declined",
                    invoice_id = %invoice_id,
                    timestamp = %timestamp,
                    "Invoice declined"
                );
            }
            InvoiceEvent::ExpiryExtended {
                invoice_id,
                expires_at_sec,
                timestamp,
            } => {
                info!(
                    event_type = "expiry_extended",
                    invoice_id = %invoice_id,
                    expires_at_sec = expires_at_sec,
                    timestamp = %timestamp,
                    "Invoice validity window extended"
                );
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "logging_handler"
    }
}
