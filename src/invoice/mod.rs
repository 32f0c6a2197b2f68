//! Invoice domain model and status state machine.
//!
//! Every change to a stored invoice flows through [`InvoiceMutation`] so the
//! transition rules (monotone terminal states, write-once payment fields,
//! the paid/expired tie-break) live in exactly one place and are applied
//! under the store's per-invoice atomic update.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::types::{unix_now_sec, Pubkey};

pub mod store;

pub use store::{InvoiceStore, MemoryInvoiceStore};

/// Invoice lifecycle states. Everything other than `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Declined,
    Expired,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Declined => "declined",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    /// Merchant wallet the customer pays to.
    pub recipient: Pubkey,
    /// One-time key attached to the on-chain transfer by the paying wallet;
    /// the sole correlation key between this invoice and a transaction.
    pub reference: Pubkey,
    /// `None` means the customer enters the amount in their wallet.
    pub amount_usd: Option<Decimal>,
    pub status: InvoiceStatus,
    pub created_at_sec: i64,
    pub expires_at_sec: i64,
    pub paid_at_sec: Option<i64>,
    pub payer: Option<Pubkey>,
    pub paid_tx_sig: Option<String>,
    /// A transaction that referenced this invoice but did not validate
    /// cleanly, kept for operator inspection.
    pub matched_tx_sig: Option<String>,
    pub needs_review: bool,
}

impl Invoice {
    pub fn new(
        recipient: Pubkey,
        reference: Pubkey,
        amount_usd: Option<Decimal>,
        validity_secs: i64,
    ) -> Self {
        let now = unix_now_sec();
        Self {
            id: Uuid::new_v4().to_string(),
            recipient,
            reference,
            amount_usd,
            status: InvoiceStatus::Pending,
            created_at_sec: now,
            expires_at_sec: now + validity_secs,
            paid_at_sec: None,
            payer: None,
            paid_tx_sig: None,
            matched_tx_sig: None,
            needs_review: false,
        }
    }
}

/// A positive payment match produced by the webhook ingestor or the chain
/// verifier. Carries everything the `pending -> paid` transition writes.
#[derive(Debug, Clone)]
pub struct PaymentProof {
    pub tx_signature: String,
    pub payer: Option<Pubkey>,
    /// Observed transferred amount.
    pub amount: Decimal,
    /// On-chain block time of the paying transaction.
    pub paid_at_sec: i64,
    pub needs_review: bool,
}

/// Mutations applied through [`InvoiceStore::update`].
#[derive(Debug, Clone)]
pub enum InvoiceMutation {
    MarkPaid(PaymentProof),
    MarkExpired { now_sec: i64 },
    MarkDeclined,
    ExtendExpiry { now_sec: i64, window_secs: i64 },
    /// Record an ambiguous reference match for operator follow-up without
    /// changing the invoice status.
    FlagReview { tx_signature: String },
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The mutation changed the invoice.
    Applied(Invoice),
    /// The mutation was legal but a no-op, e.g. a redelivered webhook for an
    /// invoice that already settled.
    Unchanged(Invoice),
}

impl UpdateOutcome {
    pub fn invoice(&self) -> &Invoice {
        match self {
            Self::Applied(invoice) | Self::Unchanged(invoice) => invoice,
        }
    }

    pub fn into_invoice(self) -> Invoice {
        match self {
            Self::Applied(invoice) | Self::Unchanged(invoice) => invoice,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Apply a mutation to an invoice record, returning whether anything changed.
///
/// Invariants enforced here:
/// - terminal states accept no further transitions, except the tie-break
///   below; attempts are no-ops, not errors
/// - `expired -> paid` is applied iff the paying transaction's on-chain time
///   is within the invoice's validity window (the payment landed in time and
///   the expiry check observed stale state)
/// - `paid_at_sec`, `payer` and `paid_tx_sig` are only ever written by the
///   transition into `paid`, so they are write-once
/// - extension is only legal while pending and never shortens the window
pub(crate) fn apply_mutation(
    invoice: &mut Invoice,
    mutation: &InvoiceMutation,
) -> Result<bool, AppError> {
    match mutation {
        InvoiceMutation::MarkPaid(proof) => match invoice.status {
            InvoiceStatus::Pending => {
                settle(invoice, proof);
                Ok(true)
            }
            InvoiceStatus::Expired if proof.paid_at_sec <= invoice.expires_at_sec => {
                settle(invoice, proof);
                Ok(true)
            }
            _ => Ok(false),
        },
        InvoiceMutation::MarkExpired { now_sec } => match invoice.status {
            InvoiceStatus::Pending if *now_sec > invoice.expires_at_sec => {
                invoice.status = InvoiceStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        },
        InvoiceMutation::MarkDeclined => match invoice.status {
            InvoiceStatus::Pending => {
                invoice.status = InvoiceStatus::Declined;
                Ok(true)
            }
            _ => Ok(false),
        },
        InvoiceMutation::ExtendExpiry {
            now_sec,
            window_secs,
        } => {
            if invoice.status != InvoiceStatus::Pending {
                return Err(AppError::invalid_state(format!(
                    "Cannot extend invoice in status {}",
                    invoice.status
                )));
            }
            invoice.expires_at_sec = invoice.expires_at_sec.max(*now_sec) + window_secs;
            Ok(true)
        }
        InvoiceMutation::FlagReview { tx_signature } => {
            if invoice.matched_tx_sig.as_deref() == Some(tx_signature.as_str()) {
                return Ok(false);
            }
            invoice.matched_tx_sig = Some(tx_signature.clone());
            invoice.needs_review = true;
            Ok(true)
        }
    }
}

fn settle(invoice: &mut Invoice, proof: &PaymentProof) {
    invoice.status = InvoiceStatus::Paid;
    invoice.paid_at_sec = Some(proof.paid_at_sec);
    invoice.payer = proof.payer.clone();
    invoice.paid_tx_sig = Some(proof.tx_signature.clone());
    invoice.needs_review |= proof.needs_review;
    if invoice.amount_usd.is_none() {
        // Custom-amount invoice: record what the customer actually sent
        invoice.amount_usd = Some(proof.amount);
    }
}
