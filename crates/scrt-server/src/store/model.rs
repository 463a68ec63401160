use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use super::crypto::Sealed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretType {
    Text,
    Url,
    Neogram,
}

impl SecretType {
    pub const ALL: [SecretType; 3] = [Self::Text, Self::Url, Self::Neogram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
            Self::Neogram => "neogram",
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored in redb as bincode-encoded bytes, keyed by alias.
/// Every user-supplied string is sealed; only the type, flags and timeout are plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub secret_type: SecretType,
    pub message: Sealed,
    pub is_encrypted_with_user_password: bool,
    pub neogram_destruction_message: Option<Sealed>,
    pub neogram_destruction_timeout: Option<u32>,
    pub receipt_email: Option<Sealed>,
    /// Digits only, without the leading `+`.
    pub receipt_phone_number: Option<Sealed>,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
}

/// Plaintext input for a new secret. Sealed by the store before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSecret {
    pub secret_type: SecretType,
    pub message: String,
    pub is_encrypted_with_user_password: bool,
    pub neogram_destruction_message: Option<String>,
    pub neogram_destruction_timeout: Option<u32>,
    pub receipt_email: Option<String>,
    pub receipt_phone_number: Option<String>,
}

impl NewSecret {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            secret_type: SecretType::Text,
            message: message.into(),
            is_encrypted_with_user_password: false,
            neogram_destruction_message: None,
            neogram_destruction_timeout: None,
            receipt_email: None,
            receipt_phone_number: None,
        }
    }
}

/// A secret that has been taken out of the store and decrypted.
/// Only ever lives for the duration of one response.
#[derive(Debug, ZeroizeOnDrop)]
pub struct RevealedSecret {
    #[zeroize(skip)]
    pub secret_type: SecretType,
    pub message: String,
    pub is_encrypted_with_user_password: bool,
    pub neogram_destruction_message: Option<String>,
    pub neogram_destruction_timeout: Option<u32>,
    pub receipt_email: Option<String>,
    pub receipt_phone_number: Option<String>,
}

/// Maximum accepted alias length.
pub const ALIAS_MAX_LEN: usize = 64;

/// Length of server-generated aliases.
pub const GENERATED_ALIAS_LEN: usize = 22;

const ALIAS_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// An alias is 1..=64 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias.len() <= ALIAS_MAX_LEN
        && alias
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Generate a random URL-safe alias.
pub fn generate_alias() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..GENERATED_ALIAS_LEN)
        .map(|_| ALIAS_ALPHABET[rng.gen_range(0..ALIAS_ALPHABET.len())] as char)
        .collect()
}
