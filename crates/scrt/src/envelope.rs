//! Client-side password layer for `--password` secrets.
//!
//! Format: `scrt1:` followed by base64 of `salt (16) | nonce (12) | ciphertext`.
//! The server never sees the password; it only stores the envelope and the
//! `isEncryptedWithUserPassword` flag.

use anyhow::{anyhow, bail, Context, Result};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

const PREFIX: &str = "scrt1:";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

fn cipher(password: &str, salt: &[u8]) -> Result<ChaCha20Poly1305> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow!("derive key from password: {e}"))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

pub fn seal(password: &str, plaintext: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher(password, &salt)?
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| anyhow!("encryption failed"))?;

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(format!("{PREFIX}{}", STANDARD.encode(out)))
}

pub fn open(password: &str, envelope: &str) -> Result<String> {
    let encoded = envelope
        .trim()
        .strip_prefix(PREFIX)
        .context("not a password-protected message")?;
    let raw = STANDARD.decode(encoded).context("malformed envelope")?;
    if raw.len() < SALT_LEN + NONCE_LEN {
        bail!("malformed envelope: too short");
    }
    let (salt, rest) = raw.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let plaintext = cipher(password, salt)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("wrong password"))?;
    String::from_utf8(plaintext).context("decrypted message is not UTF-8")
}
