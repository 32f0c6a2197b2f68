//! Inbound "transaction observed" notifications from the indexing provider.
//!
//! The provider pushes enhanced transaction events for transfers touching
//! watched addresses. Most chain traffic is unrelated to this daemon, so an
//! event resolving to no invoice is dropped silently; redeliveries and
//! out-of-order arrivals are absorbed by the store's no-op semantics.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::AppError;
use crate::invoice::{
    Invoice, InvoiceMutation, InvoiceStatus, InvoiceStore, PaymentProof, UpdateOutcome,
};
use crate::types::{unix_now_sec, Pubkey};

/// One enhanced-transaction event as delivered by the provider's webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTransactionEvent {
    pub signature: String,
    /// Block time of the transaction in unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub transaction_error: Option<serde_json::Value>,
    /// Every account touched by the transaction; the invoice reference key
    /// appears here when the paying wallet attached it.
    #[serde(default)]
    pub account_data: Vec<AccountData>,
    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    #[serde(default)]
    pub from_user_account: Option<String>,
    #[serde(default)]
    pub to_user_account: Option<String>,
    pub mint: String,
    pub token_amount: Decimal,
}

/// What [`WebhookIngestor::handle`] did with one event. Used for logging,
/// metrics and tests; the provider gets a 200 either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event did not reference any known invoice.
    NoMatch,
    /// The referenced invoice is already terminal; redelivery is a safe
    /// no-op, never a duplicate payment record.
    AlreadySettled,
    /// The reference matched but the transfer details did not validate;
    /// recorded for operator review without a status change.
    FlaggedForReview,
    Paid,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::AlreadySettled => "already_settled",
            Self::FlaggedForReview => "flagged_for_review",
            Self::Paid => "paid",
        }
    }
}

pub struct WebhookIngestor {
    store: Arc<dyn InvoiceStore>,
    token_mint: Pubkey,
    amount_tolerance: Decimal,
}

impl WebhookIngestor {
    pub fn new(store: Arc<dyn InvoiceStore>, token_mint: Pubkey, amount_tolerance: Decimal) -> Self {
        Self {
            store,
            token_mint,
            amount_tolerance,
        }
    }

    /// Process one provider event, driving `pending -> paid` when it carries
    /// a valid payment for a known invoice.
    #[instrument(skip(self, event), fields(signature = %event.signature))]
    pub async fn handle(&self, event: &ProviderTransactionEvent) -> Result<IngestOutcome, AppError> {
        if event.transaction_error.is_some() {
            debug!("Ignoring failed transaction");
            return Ok(IngestOutcome::NoMatch);
        }

        let Some(invoice) = self.resolve_invoice(event).await? else {
            debug!("No invoice references this transaction");
            return Ok(IngestOutcome::NoMatch);
        };

        match invoice.status {
            InvoiceStatus::Paid | InvoiceStatus::Declined => {
                debug!(
                    invoice_id = %invoice.id,
                    status = %invoice.status,
                    "Invoice already settled, dropping redelivery"
                );
                return Ok(IngestOutcome::AlreadySettled);
            }
            // An expired invoice still goes through: if the transaction's
            // on-chain time falls inside the validity window, the store's
            // tie-break resolves the race in favor of the payment.
            InvoiceStatus::Expired | InvoiceStatus::Pending => {}
        }

        let received = self.received_amount(event, &invoice);
        let amount_ok = received > Decimal::ZERO
            && match invoice.amount_usd {
                Some(expected) => (received - expected).abs() <= self.amount_tolerance,
                None => true,
            };

        if !amount_ok {
            warn!(
                invoice_id = %invoice.id,
                received = %received,
                expected = ?invoice.amount_usd,
                "Referenced transaction does not validate, flagging for review"
            );
            self.store
                .update(
                    &invoice.id,
                    InvoiceMutation::FlagReview {
                        tx_signature: event.signature.clone(),
                    },
                )
                .await?;
            return Ok(IngestOutcome::FlaggedForReview);
        }

        let payer = event
            .token_transfers
            .iter()
            .find(|t| self.transfer_matches(t, &invoice))
            .and_then(|t| t.from_user_account.as_deref())
            .and_then(|account| Pubkey::new(account).ok());

        let proof = PaymentProof {
            tx_signature: event.signature.clone(),
            payer,
            amount: received,
            paid_at_sec: event.timestamp.unwrap_or_else(unix_now_sec),
            needs_review: false,
        };

        match self
            .store
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof))
            .await?
        {
            UpdateOutcome::Applied(updated) => {
                info!(
                    invoice_id = %updated.id,
                    amount_usd = ?updated.amount_usd,
                    "Invoice paid via provider webhook"
                );
                Ok(IngestOutcome::Paid)
            }
            // Lost the race against another delivery, or the payment landed
            // after the window closed
            UpdateOutcome::Unchanged(_) => Ok(IngestOutcome::AlreadySettled),
        }
    }

    /// O(1) per touched account via the store's reference index.
    async fn resolve_invoice(
        &self,
        event: &ProviderTransactionEvent,
    ) -> Result<Option<Invoice>, AppError> {
        for account in &event.account_data {
            let Ok(key) = Pubkey::new(&account.account) else {
                continue;
            };
            if let Some(invoice) = self.store.find_by_reference(&key).await? {
                return Ok(Some(invoice));
            }
        }
        Ok(None)
    }

    fn transfer_matches(&self, transfer: &TokenTransfer, invoice: &Invoice) -> bool {
        transfer.mint == self.token_mint.as_str()
            && transfer.to_user_account.as_deref() == Some(invoice.recipient.as_str())
    }

    fn received_amount(&self, event: &ProviderTransactionEvent, invoice: &Invoice) -> Decimal {
        event
            .token_transfers
            .iter()
            .filter(|t| self.transfer_matches(t, invoice))
            .map(|t| t.token_amount)
            .sum()
    }
}
