//! Durable keyed storage for invoices; the sole source of truth for invoice
//! state. All writes are linearized per invoice through one atomic
//! read-modify-write, and every applied status change is published on the
//! event bus only after the new state is visible to `get`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::events::{EventBus, InvoiceEvent};
use crate::invoice::{apply_mutation, Invoice, InvoiceMutation, InvoiceStatus, UpdateOutcome};
use crate::types::Pubkey;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Persist a new invoice. Fails with `DuplicateReference` if the
    /// reference key is already bound to another invoice.
    async fn create(&self, invoice: Invoice) -> Result<Invoice, AppError>;

    async fn get(&self, id: &str) -> Result<Option<Invoice>, AppError>;

    /// Resolve an invoice by its reference key (the webhook path).
    async fn find_by_reference(&self, reference: &Pubkey) -> Result<Option<Invoice>, AppError>;

    /// Atomically apply a mutation. Returns `Unchanged` when the mutation is
    /// a legal no-op (e.g. any transition attempted on a terminal invoice).
    async fn update(&self, id: &str, mutation: InvoiceMutation) -> Result<UpdateOutcome, AppError>;

    /// Pending invoices whose validity window has lapsed as of `now_sec`.
    async fn pending_due(&self, now_sec: i64) -> Result<Vec<Invoice>, AppError>;

    async fn count(&self) -> usize;
}

#[derive(Default)]
struct StoreInner {
    invoices: HashMap<String, Invoice>,
    /// reference key -> invoice id, for O(1) webhook resolution
    by_reference: HashMap<Pubkey, String>,
}

pub struct MemoryInvoiceStore {
    event_bus: Arc<EventBus>,
    inner: RwLock<StoreInner>,
}

impl MemoryInvoiceStore {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    async fn publish(&self, event: InvoiceEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            warn!(error = ?e, "Failed to publish invoice event");
        }
    }

    fn status_event(invoice: &Invoice) -> Option<InvoiceEvent> {
        match invoice.status {
            InvoiceStatus::Paid => Some(InvoiceEvent::InvoicePaid {
                invoice_id: invoice.id.clone(),
                payer: invoice.payer.clone(),
                tx_signature: invoice.paid_tx_sig.clone().unwrap_or_default(),
                amount_usd: invoice.amount_usd,
                timestamp: Utc::now(),
            }),
            InvoiceStatus::Expired => Some(InvoiceEvent::InvoiceExpired {
                invoice_id: invoice.id.clone(),
                timestamp: Utc::now(),
            }),
            InvoiceStatus::Declined => Some(InvoiceEvent::InvoiceDeclined {
                invoice_id: invoice.id.clone(),
                timestamp: Utc::now(),
            }),
            InvoiceStatus::Pending => None,
        }
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn create(&self, invoice: Invoice) -> Result<Invoice, AppError> {
        {
            let mut inner = self.inner.write().await;
            if inner.by_reference.contains_key(&invoice.reference) {
                return Err(AppError::duplicate_reference(format!(
                    "Reference {} is already bound to an invoice",
                    invoice.reference
                )));
            }
            inner
                .by_reference
                .insert(invoice.reference.clone(), invoice.id.clone());
            inner.invoices.insert(invoice.id.clone(), invoice.clone());
        }

        debug!(invoice_id = %invoice.id, reference = %invoice.reference, "Invoice stored");
        self.publish(InvoiceEvent::InvoiceCreated {
            invoice_id: invoice.id.clone(),
            reference: invoice.reference.clone(),
            amount_usd: invoice.amount_usd,
            timestamp: Utc::now(),
        })
        .await;

        Ok(invoice)
    }

    async fn get(&self, id: &str) -> Result<Option<Invoice>, AppError> {
        Ok(self.inner.read().await.invoices.get(id).cloned())
    }

    async fn find_by_reference(&self, reference: &Pubkey) -> Result<Option<Invoice>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_reference
            .get(reference)
            .and_then(|id| inner.invoices.get(id))
            .cloned())
    }

    async fn update(&self, id: &str, mutation: InvoiceMutation) -> Result<UpdateOutcome, AppError> {
        // The write lock is the linearization point: the mutation is decided
        // against the freshest state, never a caller's stale read.
        let (outcome, event) = {
            let mut inner = self.inner.write().await;
            let invoice = inner
                .invoices
                .get_mut(id)
                .ok_or_else(|| AppError::not_found(format!("No invoice with id {}", id)))?;

            let status_before = invoice.status;
            let changed = apply_mutation(invoice, &mutation)?;
            let snapshot = invoice.clone();

            if !changed {
                (UpdateOutcome::Unchanged(snapshot), None)
            } else if snapshot.status != status_before {
                let event = Self::status_event(&snapshot);
                (UpdateOutcome::Applied(snapshot), event)
            } else if let InvoiceMutation::ExtendExpiry { .. } = mutation {
                let event = InvoiceEvent::ExpiryExtended {
                    invoice_id: snapshot.id.clone(),
                    expires_at_sec: snapshot.expires_at_sec,
                    timestamp: Utc::now(),
                };
                (UpdateOutcome::Applied(snapshot), Some(event))
            } else {
                (UpdateOutcome::Applied(snapshot), None)
            }
        };

        // Publish after the lock is dropped: a subscriber that re-reads on
        // this notification is guaranteed to observe the new state.
        if let Some(event) = event {
            self.publish(event).await;
        }

        Ok(outcome)
    }

    async fn pending_due(&self, now_sec: i64) -> Result<Vec<Invoice>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .invoices
            .values()
            .filter(|i| i.status == InvoiceStatus::Pending && i.expires_at_sec < now_sec)
            .cloned()
            .collect())
    }

    async fn count(&self) -> usize {
        self.inner.read().await.invoices.len()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use tokio::time::{timeout, Duration};

    use super::*;
    use crate::error::ErrorCategory;
    use crate::invoice::PaymentProof;
    use crate::types::unix_now_sec;

    fn key(n: u8) -> Pubkey {
        Pubkey::new(bs58::encode([n; 32]).into_string()).unwrap()
    }

    fn store() -> (Arc<EventBus>, MemoryInvoiceStore) {
        let bus = Arc::new(EventBus::new(64));
        let store = MemoryInvoiceStore::new(bus.clone());
        (bus, store)
    }

    fn pending_invoice(reference: u8, validity_secs: i64) -> Invoice {
        Invoice::new(
            key(1),
            key(reference),
            Some(Decimal::new(1000, 2)),
            validity_secs,
        )
    }

    fn proof(paid_at_sec: i64) -> PaymentProof {
        PaymentProof {
            tx_signature: "4xqsTestSignature".to_string(),
            payer: Some(key(3)),
            amount: Decimal::new(1000, 2),
            paid_at_sec,
            needs_review: false,
        }
    }

    #[tokio::test]
    async fn create_get_and_reference_lookup() {
        let (_bus, store) = store();
        let invoice = store.create(pending_invoice(10, 300)).await.unwrap();

        let by_id = store.get(&invoice.id).await.unwrap().unwrap();
        assert_eq!(by_id.id, invoice.id);

        let by_ref = store.find_by_reference(&key(10)).await.unwrap().unwrap();
        assert_eq!(by_ref.id, invoice.id);

        assert!(store.find_by_reference(&key(99)).await.unwrap().is_none());
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected() {
        let (_bus, store) = store();
        store.create(pending_invoice(10, 300)).await.unwrap();

        let err = store.create(pending_invoice(10, 300)).await.unwrap_err();
        assert!(matches!(err.category, ErrorCategory::DuplicateReference));
    }

    #[tokio::test]
    async fn paid_transition_sets_fields_once() {
        let (_bus, store) = store();
        let invoice = store.create(pending_invoice(10, 300)).await.unwrap();

        let now = unix_now_sec();
        let outcome = store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof(now)))
            .await
            .unwrap();
        assert!(outcome.changed());
        let paid = outcome.into_invoice();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.paid_at_sec, Some(now));
        assert_eq!(paid.payer, Some(key(3)));
        assert!(paid.paid_tx_sig.is_some());

        // A second settlement attempt is a no-op and the fields keep their
        // original values
        let second = store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof(now + 5)))
            .await
            .unwrap();
        assert!(!second.changed());
        assert_eq!(second.invoice().paid_at_sec, Some(now));
    }

    #[tokio::test]
    async fn terminal_states_are_sticky() {
        let (_bus, store) = store();
        let invoice = store.create(pending_invoice(10, 300)).await.unwrap();
        let now = unix_now_sec();

        store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof(now)))
            .await
            .unwrap();

        let expired = store
            .update(&invoice.id, InvoiceMutation::MarkExpired { now_sec: now + 600 })
            .await
            .unwrap();
        assert!(!expired.changed());
        assert_eq!(expired.invoice().status, InvoiceStatus::Paid);

        let declined = store
            .update(&invoice.id, InvoiceMutation::MarkDeclined)
            .await
            .unwrap();
        assert!(!declined.changed());
        assert_eq!(declined.invoice().status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn paid_wins_over_expired_when_payment_was_in_time() {
        let (_bus, store) = store();
        let invoice = store.create(pending_invoice(10, 60)).await.unwrap();
        let expires_at = invoice.expires_at_sec;

        // Expiry check runs first
        let outcome = store
            .update(
                &invoice.id,
                InvoiceMutation::MarkExpired {
                    now_sec: expires_at + 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.invoice().status, InvoiceStatus::Expired);

        // ... but the payment landed on-chain before the window closed
        let rescued = store
            .update(
                &invoice.id,
                InvoiceMutation::MarkPaid(proof(expires_at - 1)),
            )
            .await
            .unwrap();
        assert!(rescued.changed());
        assert_eq!(rescued.invoice().status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn late_payment_does_not_resurrect_expired_invoice() {
        let (_bus, store) = store();
        let invoice = store.create(pending_invoice(10, 60)).await.unwrap();
        let expires_at = invoice.expires_at_sec;

        store
            .update(
                &invoice.id,
                InvoiceMutation::MarkExpired {
                    now_sec: expires_at + 10,
                },
            )
            .await
            .unwrap();

        let late = store
            .update(
                &invoice.id,
                InvoiceMutation::MarkPaid(proof(expires_at + 5)),
            )
            .await
            .unwrap();
        assert!(!late.changed());
        assert_eq!(late.invoice().status, InvoiceStatus::Expired);
    }

    #[tokio::test]
    async fn expiry_check_before_window_closes_is_a_noop() {
        let (_bus, store) = store();
        let invoice = store.create(pending_invoice(10, 300)).await.unwrap();

        let outcome = store
            .update(
                &invoice.id,
                InvoiceMutation::MarkExpired {
                    now_sec: unix_now_sec(),
                },
            )
            .await
            .unwrap();
        assert!(!outcome.changed());
        assert_eq!(outcome.invoice().status, InvoiceStatus::Pending);
    }

    #[tokio::test]
    async fn extend_takes_max_of_expiry_and_now() {
        let (_bus, store) = store();
        let now = unix_now_sec();

        // Plenty of time left: the extension stacks on the current expiry
        let invoice = store.create(pending_invoice(10, 300)).await.unwrap();
        let outcome = store
            .update(
                &invoice.id,
                InvoiceMutation::ExtendExpiry {
                    now_sec: now,
                    window_secs: 120,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.invoice().expires_at_sec,
            invoice.expires_at_sec + 120
        );

        // Window already lapsed (but not yet swept): extend from now, which
        // acknowledges the lapse instead of silently stacking on the past
        let lapsed = store.create(pending_invoice(11, -60)).await.unwrap();
        let outcome = store
            .update(
                &lapsed.id,
                InvoiceMutation::ExtendExpiry {
                    now_sec: now,
                    window_secs: 120,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.invoice().expires_at_sec, now + 120);
    }

    #[tokio::test]
    async fn extend_fails_for_terminal_invoice() {
        let (_bus, store) = store();
        let invoice = store.create(pending_invoice(10, 60)).await.unwrap();
        let now = invoice.expires_at_sec + 10;

        store
            .update(&invoice.id, InvoiceMutation::MarkExpired { now_sec: now })
            .await
            .unwrap();

        let err = store
            .update(
                &invoice.id,
                InvoiceMutation::ExtendExpiry {
                    now_sec: now,
                    window_secs: 120,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err.category, ErrorCategory::InvalidState));
    }

    #[tokio::test]
    async fn unknown_invoice_is_not_found() {
        let (_bus, store) = store();
        let err = store
            .update("missing", InvoiceMutation::MarkDeclined)
            .await
            .unwrap_err();
        assert!(matches!(err.category, ErrorCategory::NotFound));
    }

    #[tokio::test]
    async fn status_changes_publish_exactly_one_event() {
        let (bus, store) = store();
        let invoice = store.create(pending_invoice(10, 300)).await.unwrap();

        let mut subscription = bus.subscribe_invoice(&invoice.id);
        let now = unix_now_sec();

        store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof(now)))
            .await
            .unwrap();
        // Redelivery: no-op, must not publish a second paid event
        store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof(now)))
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(100), subscription.recv())
            .await
            .expect("timed out")
            .expect("bus closed");
        assert_eq!(event.event_type(), "invoice_paid");

        assert!(
            timeout(Duration::from_millis(50), subscription.recv())
                .await
                .is_err(),
            "duplicate settlement must not publish a second event"
        );
    }

    #[tokio::test]
    async fn flag_review_records_diagnostics_without_status_change() {
        let (bus, store) = store();
        let invoice = store.create(pending_invoice(10, 300)).await.unwrap();
        let mut subscription = bus.subscribe_invoice(&invoice.id);

        let outcome = store
            .update(
                &invoice.id,
                InvoiceMutation::FlagReview {
                    tx_signature: "ambiguous-sig".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(outcome.changed());
        assert_eq!(outcome.invoice().status, InvoiceStatus::Pending);
        assert!(outcome.invoice().needs_review);
        assert_eq!(
            outcome.invoice().matched_tx_sig.as_deref(),
            Some("ambiguous-sig")
        );

        // Diagnostics are not a state change: nothing on the bus
        assert!(
            timeout(Duration::from_millis(50), subscription.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn pending_due_only_returns_lapsed_pending_invoices() {
        let (_bus, store) = store();
        let now = unix_now_sec();

        store.create(pending_invoice(10, -30)).await.unwrap();
        store.create(pending_invoice(11, 300)).await.unwrap();
        let paid = store.create(pending_invoice(12, -30)).await.unwrap();
        store
            .update(&paid.id, InvoiceMutation::MarkPaid(proof(now)))
            .await
            .unwrap();

        let due = store.pending_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].reference, key(10));
    }
}
