use async_trait::async_trait;
use metrics::counter;

use crate::events::{EventHandler, InvoiceEvent};
use crate::metrics::{
    EVENT_BUS_EVENTS_TOTAL, INVOICES_CREATED_TOTAL, INVOICES_DECLINED_TOTAL,
    INVOICES_EXPIRED_TOTAL, INVOICES_PAID_TOTAL,
};

/// Event handler that records invoice lifecycle counters
pub struct MetricsEventHandler;

impl MetricsEventHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MetricsEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for MetricsEventHandler {
    async fn handle(&self, event: InvoiceEvent) -> anyhow::Result<()> {
        counter!(EVENT_BUS_EVENTS_TOTAL, "type" => event.event_type()).increment(1);

        match event {
            InvoiceEvent::InvoiceCreated { .. } => {
                counter!(INVOICES_CREATED_TOTAL).increment(1);
            }
            InvoiceEvent::InvoicePaid { .. } => {
                counter!(INVOICES_PAID_TOTAL).increment(1);
            }
            InvoiceEvent::InvoiceExpired { .. } => {
                counter!(INVOICES_EXPIRED_TOTAL).increment(1);
            }
            InvoiceEvent::InvoiceDeclined { .. } => {
                counter!(INVOICES_DECLINED_TOTAL).increment(1);
            }
            InvoiceEvent::ExpiryExtended { .. } => {}
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "metrics_handler"
    }
}
