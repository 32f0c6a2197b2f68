//! Solana Pay payment-request construction and parsing.
//!
//! The reference key is the only unforgeable correlation between a request
//! and an on-chain transfer: amounts repeat across invoices and the merchant
//! address is reused, so neither identifies a payment on its own.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::AppError;
use crate::types::Pubkey;

pub const URI_SCHEME: &str = "solana";

/// A merchant-facing payment request, rendered as a `solana:` URI for the
/// customer's wallet. Ephemeral: carries no state of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub recipient: Pubkey,
    /// Mint of the token the payment must arrive in.
    pub token: Pubkey,
    /// Requested amount; `None` means the customer enters the amount.
    pub amount: Option<Decimal>,
    pub reference: Pubkey,
    pub label: Option<String>,
    pub message: Option<String>,
    pub memo: Option<String>,
}

impl PaymentRequest {
    pub fn new(
        recipient: &str,
        token: &str,
        amount: Option<Decimal>,
        reference: &str,
    ) -> Result<Self, AppError> {
        let recipient = Pubkey::new(recipient)
            .map_err(|e| AppError::validation_error(format!("Invalid recipient: {}", e)))?;
        let token = Pubkey::new(token)
            .map_err(|e| AppError::validation_error(format!("Invalid token mint: {}", e)))?;
        let reference = Pubkey::new(reference)
            .map_err(|e| AppError::validation_error(format!("Invalid reference: {}", e)))?;

        Ok(Self {
            recipient,
            token,
            amount,
            reference,
            label: None,
            message: None,
            memo: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Render the request as a payment URI.
    pub fn encode(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("token", self.token.as_str());
        if let Some(amount) = &self.amount {
            query.append_pair("amount", &amount.to_string());
        }
        query.append_pair("reference", self.reference.as_str());
        if let Some(label) = &self.label {
            query.append_pair("label", label);
        }
        if let Some(message) = &self.message {
            query.append_pair("message", message);
        }
        if let Some(memo) = &self.memo {
            query.append_pair("memo", memo);
        }

        format!("{}:{}?{}", URI_SCHEME, self.recipient, query.finish())
    }

    /// Parse a payment URI back into its fields.
    ///
    /// Returns `None` on any structural mismatch: a foreign scheme, an
    /// invalid key, a missing reference. Malformed input is an expected,
    /// non-exceptional case for this debug/validation utility.
    pub fn decode(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("solana:")?;
        let (recipient_raw, query) = match rest.split_once('?') {
            Some((recipient, query)) => (recipient, query),
            None => (rest, ""),
        };
        let recipient = Pubkey::new(recipient_raw).ok()?;

        let mut token = None;
        let mut amount = None;
        let mut reference = None;
        let mut label = None;
        let mut message = None;
        let mut memo = None;

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "token" => token = Some(Pubkey::new(value.as_ref()).ok()?),
                "amount" => amount = Some(value.parse::<Decimal>().ok()?),
                "reference" => reference = Some(Pubkey::new(value.as_ref()).ok()?),
                "label" => label = Some(value.into_owned()),
                "message" => message = Some(value.into_owned()),
                "memo" => memo = Some(value.into_owned()),
                // Unknown parameters are tolerated, wallets add their own
                _ => {}
            }
        }

        Some(Self {
            recipient,
            token: token?,
            amount,
            reference: reference?,
            label,
            message,
            memo,
        })
    }

    /// Decode-and-validate self check; not on the payment-critical path.
    pub fn is_valid(uri: &str) -> bool {
        Self::decode(uri).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    const RECIPIENT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

    fn reference() -> String {
        bs58::encode([42u8; 32]).into_string()
    }

    #[test]
    fn encode_decode_round_trip() {
        let request = PaymentRequest::new(
            RECIPIENT,
            MINT,
            Some(Decimal::new(1000, 2)),
            &reference(),
        )
        .unwrap()
        .with_label("Coffee Shop")
        .with_message("Order #42 (two espressos)")
        .with_memo("till-3");

        let uri = request.encode();
        assert!(uri.starts_with("solana:"));
        assert!(uri.contains("amount=10.00"));
        assert!(uri.contains("reference="));

        let decoded = PaymentRequest::decode(&uri).expect("decode failed");
        assert_eq!(decoded, request);
    }

    #[test]
    fn custom_amount_omits_the_amount_parameter() {
        let request = PaymentRequest::new(RECIPIENT, MINT, None, &reference()).unwrap();
        let uri = request.encode();
        assert!(!uri.contains("amount="));

        let decoded = PaymentRequest::decode(&uri).unwrap();
        assert_eq!(decoded.amount, None);
    }

    #[test]
    fn invalid_keys_fail_construction() {
        let err = PaymentRequest::new("not-a-key", MINT, None, &reference()).unwrap_err();
        assert!(matches!(err.category, ErrorCategory::ValidationError));

        let err = PaymentRequest::new(RECIPIENT, MINT, None, "short").unwrap_err();
        assert!(matches!(err.category, ErrorCategory::ValidationError));
    }

    #[test]
    fn decode_rejects_foreign_schemes_and_structural_garbage() {
        assert!(PaymentRequest::decode("bitcoin:1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2").is_none());
        assert!(PaymentRequest::decode("solana:").is_none());
        assert!(PaymentRequest::decode("").is_none());

        // Missing mandatory reference
        let uri = format!("solana:{}?token={}&amount=1", RECIPIENT, MINT);
        assert!(PaymentRequest::decode(&uri).is_none());

        // Invalid reference key
        let uri = format!("solana:{}?token={}&reference=zzz", RECIPIENT, MINT);
        assert!(PaymentRequest::decode(&uri).is_none());
    }

    #[test]
    fn is_valid_mirrors_decode() {
        let request = PaymentRequest::new(RECIPIENT, MINT, None, &reference()).unwrap();
        assert!(PaymentRequest::is_valid(&request.encode()));
        assert!(!PaymentRequest::is_valid("solana:nope"));
    }
}
