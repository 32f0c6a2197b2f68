// Common primitives shared across the library and API

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Standard result type used throughout the library
pub type SpaydResult<T> = anyhow::Result<T>;

/// A base58-encoded Solana public key (32 bytes).
///
/// Used for merchant recipients, invoice reference keys and token mints.
/// The base58 text is kept verbatim; validation happens once at
/// construction, so a `Pubkey` in hand is always syntactically valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pubkey(String);

impl Pubkey {
    pub fn new(key: impl Into<String>) -> Result<Self, PubkeyError> {
        let key = key.into();
        let bytes = bs58::decode(&key)
            .into_vec()
            .map_err(|_| PubkeyError::NotBase58)?;
        if bytes.len() != 32 {
            return Err(PubkeyError::BadLength(bytes.len()));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Pubkey {
    type Err = PubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Pubkey {
    type Error = PubkeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Pubkey> for String {
    fn from(key: Pubkey) -> Self {
        key.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubkeyError {
    NotBase58,
    BadLength(usize),
}

impl fmt::Display for PubkeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PubkeyError::NotBase58 => write!(f, "not valid base58"),
            PubkeyError::BadLength(len) => {
                write!(f, "decodes to {} bytes, expected 32", len)
            }
        }
    }
}

impl std::error::Error for PubkeyError {}

/// Current wall-clock time in unix seconds.
pub fn unix_now_sec() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_keys() {
        // System program: 32 zero bytes
        let key = Pubkey::new("11111111111111111111111111111111").unwrap();
        assert_eq!(key.as_str(), "11111111111111111111111111111111");

        // USDC mint on mainnet
        assert!(Pubkey::new("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").is_ok());
    }

    #[test]
    fn rejects_non_base58() {
        assert_eq!(
            Pubkey::new("not a key!").unwrap_err(),
            PubkeyError::NotBase58
        );
        // 0, I, O and l are not in the base58 alphabet
        assert!(Pubkey::new("O0O0O0O0O0O0O0O0O0O0O0O0O0O0O0O0").is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Pubkey::new("abc").unwrap_err(),
            PubkeyError::BadLength(_)
        ));
    }

    #[test]
    fn serde_round_trip_validates() {
        let key = Pubkey::new(bs58::encode([7u8; 32]).into_string()).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let back: Pubkey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);

        assert!(serde_json::from_str::<Pubkey>("\"garbage!\"").is_err());
    }
}
