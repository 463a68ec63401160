use anyhow::{Context, Result};
use argon2::{password_hash::SaltString, Argon2, Params, PasswordHasher};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// 32-byte server key used for every encrypted field at rest.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A single field sealed with ChaCha20Poly1305.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sealed {
    /// Ciphertext (value + tag).
    pub ciphertext: Vec<u8>,
    /// Per-field random 12-byte nonce.
    pub nonce: [u8; 12],
}

impl Sealed {
    pub fn seal(key: &EncryptionKey, plaintext: &str) -> Result<Self> {
        let (ciphertext, nonce) = encrypt(key, plaintext.as_bytes())?;
        Ok(Self { ciphertext, nonce })
    }

    pub fn open(&self, key: &EncryptionKey) -> Result<String> {
        let plaintext = decrypt(key, &self.ciphertext, &self.nonce)?;
        String::from_utf8(plaintext).context("sealed field is not valid UTF-8")
    }
}

/// Derive a 32-byte encryption key from `master_key` and `salt` using Argon2id.
/// The salt is persisted (`scrt.salt`) and reused across restarts.
pub fn derive_key(master_key: &str, salt: &[u8; 32]) -> Result<EncryptionKey> {
    let salt_string =
        SaltString::encode_b64(salt).map_err(|e| anyhow::anyhow!("invalid salt for argon2: {e}"))?;

    let params = Params::new(
        65536, // m_cost: 64 MiB
        3,     // t_cost: 3 iterations
        1,     // p_cost: 1 lane
        Some(32),
    )
    .map_err(|e| anyhow::anyhow!("argon2 params: {e}"))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let hash = argon2
        .hash_password(master_key.as_bytes(), &salt_string)
        .map_err(|e| anyhow::anyhow!("argon2 hash: {e}"))?;

    let binding = hash.hash.context("no hash output")?;
    let hash_bytes = binding.as_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash_bytes[..32]);

    Ok(EncryptionKey(key))
}

/// Generate a fresh random key (used when no master key is configured).
pub fn generate_key() -> EncryptionKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    EncryptionKey(key)
}

/// Load a key from raw bytes. Returns `None` unless exactly 32 bytes are given.
pub fn load_key(bytes: &[u8]) -> Option<EncryptionKey> {
    let key: [u8; 32] = bytes.try_into().ok()?;
    Some(EncryptionKey(key))
}

/// Encrypt `plaintext` with `key`, returning `(ciphertext, nonce)`.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12])> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("encrypt: {e}"))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt `ciphertext` with `key` and `nonce`, returning plaintext.
pub fn decrypt(key: &EncryptionKey, ciphertext: &[u8], nonce_bytes: &[u8; 12]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = Nonce::from(*nonce_bytes);

    let plaintext = cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|e| anyhow::anyhow!("decrypt: {e}"))?;

    Ok(plaintext)
}

/// Generate a fresh 32-byte random salt.
pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    salt
}
