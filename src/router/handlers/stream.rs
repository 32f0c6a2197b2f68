//! Live invoice status stream over server-sent events.
//!
//! Contract: the subscriber gets the current snapshot immediately, then one
//! push per store change, each freshly re-read from the store. The stream
//! closes on a terminal state, client disconnect, or the hard ceiling.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::error::AppError;
use crate::events::InvoiceSubscription;
use crate::invoice::{Invoice, InvoiceStore};
use crate::metrics::{stream_closed, stream_opened};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    /// Client-requested ceiling in seconds; capped by the configured one
    pub timeout_secs: Option<u64>,
}

/// Decrements the active-stream gauge however the stream ends, including
/// client disconnect dropping the generator mid-await.
struct StreamGuard;

impl StreamGuard {
    fn open() -> Self {
        stream_opened();
        Self
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        stream_closed();
    }
}

/// Core of the stream manager, SSE framing left to the handler.
fn invoice_updates(
    store: Arc<dyn InvoiceStore>,
    mut subscription: InvoiceSubscription,
    snapshot: Invoice,
    ceiling: Duration,
) -> impl Stream<Item = Invoice> {
    async_stream::stream! {
        let _guard = StreamGuard::open();
        let invoice_id = snapshot.id.clone();
        let terminal = snapshot.status.is_terminal();

        // A subscriber never waits for the next event to learn the current
        // state; and an already-settled invoice gets exactly one push.
        yield snapshot;
        if terminal {
            return;
        }

        let deadline = tokio::time::sleep(ceiling);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        invoice_id = %invoice_id,
                        ceiling_secs = ceiling.as_secs(),
                        "Status stream hit hard ceiling, closing"
                    );
                    break;
                }
                received = subscription.recv() => {
                    match received {
                        // Re-read on every notification: the store is the
                        // source of truth, the event only says "changed".
                        // A lagged subscriber may have missed its event, so
                        // it re-reads too.
                        Ok(_) | Err(RecvError::Lagged(_)) => {
                            match store.get(&invoice_id).await {
                                Ok(Some(current)) => {
                                    let terminal = current.status.is_terminal();
                                    yield current;
                                    if terminal {
                                        break;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(
                                        invoice_id = %invoice_id,
                                        error = %e,
                                        "Failed to re-read invoice for stream"
                                    );
                                }
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}

#[axum_macros::debug_handler]
pub async fn handle_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, AppError> {
    // Subscribe before the snapshot read: a transition landing in between
    // is then delivered as a notification instead of being missed.
    let subscription = state.event_bus().subscribe_invoice(&id);

    let snapshot = state
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No invoice with id {}", id)))?;

    let configured_ceiling = state.stream_ceiling();
    let ceiling = query
        .timeout_secs
        .map(Duration::from_secs)
        .filter(|requested| *requested < configured_ceiling)
        .unwrap_or(configured_ceiling);
    let keepalive = state.stream_keepalive();

    info!(
        invoice_id = %id,
        status = %snapshot.status,
        ceiling_secs = ceiling.as_secs(),
        "Starting invoice status stream"
    );

    let updates = invoice_updates(state.store().clone(), subscription, snapshot, ceiling);
    let sse_stream = updates.map(|invoice| {
        let data = serde_json::to_string(&invoice).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize invoice for stream");
            "{}".to_string()
        });
        Ok::<_, Infallible>(Event::default().data(data))
    });

    let sse = Sse::new(sse_stream).keep_alive(
        KeepAlive::new()
            .interval(keepalive)
            .text("keep-alive"),
    );

    Ok(sse.into_response())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use tokio::time::timeout;

    use super::*;
    use crate::events::EventBus;
    use crate::invoice::{InvoiceMutation, InvoiceStatus, MemoryInvoiceStore, PaymentProof};
    use crate::types::{unix_now_sec, Pubkey};

    fn key(n: u8) -> Pubkey {
        Pubkey::new(bs58::encode([n; 32]).into_string()).unwrap()
    }

    fn proof() -> PaymentProof {
        PaymentProof {
            tx_signature: "sig-stream".to_string(),
            payer: Some(key(8)),
            amount: Decimal::new(1000, 2),
            paid_at_sec: unix_now_sec(),
            needs_review: false,
        }
    }

    async fn setup() -> (Arc<EventBus>, Arc<dyn InvoiceStore>, Invoice) {
        let bus = Arc::new(EventBus::new(64));
        let store: Arc<dyn InvoiceStore> = Arc::new(MemoryInvoiceStore::new(bus.clone()));
        let invoice = store
            .create(Invoice::new(
                key(1),
                key(2),
                Some(Decimal::new(1000, 2)),
                300,
            ))
            .await
            .unwrap();
        (bus, store, invoice)
    }

    #[tokio::test]
    async fn snapshot_is_pushed_first_then_updates_until_terminal() {
        let (bus, store, invoice) = setup().await;

        let subscription = bus.subscribe_invoice(&invoice.id);
        let mut stream = Box::pin(invoice_updates(
            store.clone(),
            subscription,
            invoice.clone(),
            Duration::from_secs(5),
        ));

        let first = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended early");
        assert_eq!(first.status, InvoiceStatus::Pending);

        store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof()))
            .await
            .unwrap();

        let second = timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended early");
        assert_eq!(second.status, InvoiceStatus::Paid);
        assert_eq!(second.paid_tx_sig.as_deref(), Some("sig-stream"));

        // Terminal state closes the stream
        assert!(timeout(Duration::from_millis(200), stream.next())
            .await
            .expect("timed out waiting for close")
            .is_none());
    }

    #[tokio::test]
    async fn terminal_snapshot_closes_after_single_push() {
        let (bus, store, invoice) = setup().await;
        store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof()))
            .await
            .unwrap();
        let settled = store.get(&invoice.id).await.unwrap().unwrap();

        let subscription = bus.subscribe_invoice(&invoice.id);
        let mut stream = Box::pin(invoice_updates(
            store.clone(),
            subscription,
            settled,
            Duration::from_secs(5),
        ));

        let first = stream.next().await.expect("missing snapshot");
        assert_eq!(first.status, InvoiceStatus::Paid);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn hard_ceiling_closes_an_idle_stream() {
        let (bus, store, invoice) = setup().await;

        let subscription = bus.subscribe_invoice(&invoice.id);
        let mut stream = Box::pin(invoice_updates(
            store.clone(),
            subscription,
            invoice.clone(),
            Duration::from_millis(100),
        ));

        let first = stream.next().await.expect("missing snapshot");
        assert_eq!(first.status, InvoiceStatus::Pending);

        // No updates arrive; the ceiling must end the stream on its own
        assert!(timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("ceiling did not fire")
            .is_none());
    }

    #[tokio::test]
    async fn extension_pushes_a_fresh_snapshot_without_closing() {
        let (bus, store, invoice) = setup().await;

        let subscription = bus.subscribe_invoice(&invoice.id);
        let mut stream = Box::pin(invoice_updates(
            store.clone(),
            subscription,
            invoice.clone(),
            Duration::from_secs(5),
        ));

        stream.next().await.expect("missing snapshot");

        store
            .update(
                &invoice.id,
                InvoiceMutation::ExtendExpiry {
                    now_sec: unix_now_sec(),
                    window_secs: 120,
                },
            )
            .await
            .unwrap();

        let update = timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended early");
        assert_eq!(update.status, InvoiceStatus::Pending);
        assert!(update.expires_at_sec > invoice.expires_at_sec);
    }
}
