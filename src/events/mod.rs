use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::invoice::InvoiceStatus;
use crate::types::Pubkey;

pub mod handlers;

/// Invoice lifecycle notifications carried by the [`EventBus`].
///
/// Stream subscribers treat these as "something changed" signals and re-read
/// the invoice from the store; the payload is for handlers (logging, metrics,
/// outbound webhooks) that do not need read-your-writes consistency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvoiceEvent {
    InvoiceCreated {
        invoice_id: String,
        reference: Pubkey,
        amount_usd: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },
    InvoicePaid {
        invoice_id: String,
        payer: Option<Pubkey>,
        tx_signature: String,
        amount_usd: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },
    InvoiceExpired {
        invoice_id: String,
        timestamp: DateTime<Utc>,
    },
    InvoiceDeclined {
        invoice_id: String,
        timestamp: DateTime<Utc>,
    },
    ExpiryExtended {
        invoice_id: String,
        expires_at_sec: i64,
        timestamp: DateTime<Utc>,
    },
}

impl InvoiceEvent {
    /// Generate a unique event ID
    pub fn event_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn invoice_id(&self) -> &str {
        match self {
            InvoiceEvent::InvoiceCreated { invoice_id, .. } => invoice_id,
            InvoiceEvent::InvoicePaid { invoice_id, .. } => invoice_id,
            InvoiceEvent::InvoiceExpired { invoice_id, .. } => invoice_id,
            InvoiceEvent::InvoiceDeclined { invoice_id, .. } => invoice_id,
            InvoiceEvent::ExpiryExtended { invoice_id, .. } => invoice_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated { timestamp, .. } => *timestamp,
            InvoiceEvent::InvoicePaid { timestamp, .. } => *timestamp,
            InvoiceEvent::InvoiceExpired { timestamp, .. } => *timestamp,
            InvoiceEvent::InvoiceDeclined { timestamp, .. } => *timestamp,
            InvoiceEvent::ExpiryExtended { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated { .. } => "invoice_created",
            InvoiceEvent::InvoicePaid { .. } => "invoice_paid",
            InvoiceEvent::InvoiceExpired { .. } => "invoice_expired",
            InvoiceEvent::InvoiceDeclined { .. } => "invoice_declined",
            InvoiceEvent::ExpiryExtended { .. } => "expiry_extended",
        }
    }

    /// The status the invoice moved to, when this event is a status change.
    pub fn status(&self) -> Option<InvoiceStatus> {
        match self {
            InvoiceEvent::InvoiceCreated { .. } => Some(InvoiceStatus::Pending),
            InvoiceEvent::InvoicePaid { .. } => Some(InvoiceStatus::Paid),
            InvoiceEvent::InvoiceExpired { .. } => Some(InvoiceStatus::Expired),
            InvoiceEvent::InvoiceDeclined { .. } => Some(InvoiceStatus::Declined),
            InvoiceEvent::ExpiryExtended { .. } => None,
        }
    }
}

/// Trait for handling events asynchronously
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event
    async fn handle(&self, event: InvoiceEvent) -> anyhow::Result<()>;

    /// Get the name of this handler for identification
    fn name(&self) -> &str;

    /// Whether this handler should block event publishing on failure
    fn is_critical(&self) -> bool {
        false
    }
}

/// Event bus distributing invoice notifications to registered handlers and
/// to live per-invoice subscriptions.
pub struct EventBus {
    sender: broadcast::Sender<InvoiceEvent>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    max_capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("max_capacity", &self.max_capacity)
            .field(
                "handlers_count",
                &self.handlers.try_read().map(|h| h.len()).unwrap_or(0),
            )
            .finish()
    }
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(Vec::new())),
            max_capacity: capacity,
        }
    }

    /// Register an event handler
    pub async fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        let handler_name = handler.name().to_string();
        handlers.push(handler);
        info!(
            handler_name = %handler_name,
            total_handlers = handlers.len(),
            "Event handler registered"
        );
    }

    /// Publish an event to all subscribers and registered handlers
    pub async fn publish(&self, event: InvoiceEvent) -> anyhow::Result<()> {
        let event_id = event.event_id();
        let event_type = event.event_type();

        debug!(
            event_id = %event_id,
            event_type = %event_type,
            invoice_id = %event.invoice_id(),
            "Publishing event"
        );

        // Send to broadcast channel for live subscribers (non-blocking)
        match self.sender.send(event.clone()) {
            Ok(subscriber_count) => {
                debug!(
                    event_id = %event_id,
                    event_type = %event_type,
                    subscriber_count = subscriber_count,
                    "Event broadcast to subscribers"
                );
            }
            Err(broadcast::error::SendError(_)) => {
                // No active receivers, this is not an error
                debug!(
                    event_id = %event_id,
                    event_type = %event_type,
                    "Event published but no active subscribers"
                );
            }
        }

        let handlers = self.handlers.read().await;

        // Critical handlers are awaited; the rest run in the background.
        let mut critical_handler_futures = Vec::new();

        for handler in handlers.iter() {
            let handler_clone = handler.clone();
            let event_clone = event.clone();
            let event_id_clone = event_id.clone();

            if handler.is_critical() {
                critical_handler_futures.push(async move {
                    let handler_name = handler_clone.name();
                    if let Err(e) = handler_clone.handle(event_clone).await {
                        error!(
                            event_id = %event_id_clone,
                            handler_name = %handler_name,
                            error = ?e,
                            "Critical event handler failed"
                        );
                    }
                });
            } else {
                tokio::spawn(async move {
                    let handler_name = handler_clone.name();
                    if let Err(e) = handler_clone.handle(event_clone).await {
                        warn!(
                            event_id = %event_id_clone,
                            handler_name = %handler_name,
                            error = ?e,
                            "Event handler failed"
                        );
                    }
                });
            }
        }

        for future in critical_handler_futures {
            future.await;
        }

        Ok(())
    }

    /// Subscribe to the full event stream
    pub fn subscribe(&self) -> broadcast::Receiver<InvoiceEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events for a single invoice id.
    ///
    /// Dropping the returned subscription releases the underlying broadcast
    /// registration; there is nothing else to clean up on the bus side.
    pub fn subscribe_invoice(&self, invoice_id: impl Into<String>) -> InvoiceSubscription {
        InvoiceSubscription {
            invoice_id: invoice_id.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the current number of registered handlers
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Get statistics about the event bus
    pub async fn stats(&self) -> EventBusStats {
        let handlers = self.handlers.read().await;
        EventBusStats {
            capacity: self.max_capacity,
            handler_count: handlers.len(),
            critical_handler_count: handlers.iter().filter(|h| h.is_critical()).count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBusStats {
    pub capacity: usize,
    pub handler_count: usize,
    pub critical_handler_count: usize,
}

/// A broadcast subscription narrowed to one invoice id.
pub struct InvoiceSubscription {
    invoice_id: String,
    receiver: broadcast::Receiver<InvoiceEvent>,
}

impl InvoiceSubscription {
    pub fn invoice_id(&self) -> &str {
        &self.invoice_id
    }

    /// Receive the next event for this invoice, skipping events for others.
    ///
    /// `Lagged` is surfaced to the caller: a lagging subscriber may have
    /// missed an event for its invoice and should re-read the store.
    pub async fn recv(&mut self) -> Result<InvoiceEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.invoice_id() == self.invoice_id {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/event_bus_tests.rs"]
mod tests;
