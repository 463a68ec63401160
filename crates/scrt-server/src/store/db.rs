use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::crypto::{EncryptionKey, Sealed};
use super::model::{NewSecret, RevealedSecret, SecretRecord};

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Leading byte of every stored record, bumped when the layout changes.
const RECORD_FORMAT: u8 = 0x01;

/// Thread-safe handle to the redb store.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
    key: Arc<EncryptionKey>,
}

impl Store {
    /// Open (or create) the database at `path`, using `key` for encryption.
    pub fn open(path: &Path, key: EncryptionKey) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.open_table(super::stats::COUNTERS)?;
        write_txn.open_table(super::settings::USER_SETTINGS)?;
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            key: Arc::new(key),
        })
    }

    pub(crate) fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Seal and insert a secret under `alias`.
    /// Returns `false` without writing anything if the alias is already taken.
    pub fn insert_secret(&self, alias: &str, secret: &NewSecret) -> Result<bool> {
        let record = self.seal(secret).context("encrypt secret")?;
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(SECRETS)?;
            let taken = table.get(alias)?.is_some();
            if !taken {
                table.insert(alias, bytes.as_slice())?;
            }
            !taken
        };
        write_txn.commit()?;

        if inserted {
            debug!(alias, secret_type = %secret.secret_type, "stored secret");
        }
        Ok(inserted)
    }

    /// Remove the secret stored under `alias` and return it decrypted.
    ///
    /// The removal and the decryption share one write transaction: a second
    /// caller racing on the same alias blocks until this one commits and then
    /// sees nothing. If decryption fails the transaction is dropped uncommitted
    /// and the record stays in place.
    pub fn take_secret(&self, alias: &str) -> Result<Option<RevealedSecret>> {
        let write_txn = self.db.begin_write()?;
        let revealed = {
            let mut table = write_txn.open_table(SECRETS)?;
            let raw_bytes: Option<Vec<u8>> =
                table.remove(alias)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => None,
                Some(bytes) => {
                    let record = decode(&bytes)?;
                    Some(self.reveal(&record).context("decrypt secret")?)
                }
            }
        };
        write_txn.commit()?;

        if revealed.is_some() {
            debug!(alias, "secret taken and destroyed");
        }
        Ok(revealed)
    }

    fn seal(&self, secret: &NewSecret) -> Result<SecretRecord> {
        let seal_opt = |value: &Option<String>| -> Result<Option<Sealed>> {
            value.as_deref().map(|v| Sealed::seal(&self.key, v)).transpose()
        };

        Ok(SecretRecord {
            secret_type: secret.secret_type,
            message: Sealed::seal(&self.key, &secret.message)?,
            is_encrypted_with_user_password: secret.is_encrypted_with_user_password,
            neogram_destruction_message: seal_opt(&secret.neogram_destruction_message)?,
            neogram_destruction_timeout: secret.neogram_destruction_timeout,
            receipt_email: seal_opt(&secret.receipt_email)?,
            receipt_phone_number: seal_opt(&secret.receipt_phone_number)?,
            created_at: Self::now(),
        })
    }

    fn reveal(&self, record: &SecretRecord) -> Result<RevealedSecret> {
        let open_opt = |value: &Option<Sealed>| -> Result<Option<String>> {
            value.as_ref().map(|v| v.open(&self.key)).transpose()
        };

        Ok(RevealedSecret {
            secret_type: record.secret_type,
            message: record.message.open(&self.key)?,
            is_encrypted_with_user_password: record.is_encrypted_with_user_password,
            neogram_destruction_message: open_opt(&record.neogram_destruction_message)?,
            neogram_destruction_timeout: record.neogram_destruction_timeout,
            receipt_email: open_opt(&record.receipt_email)?,
            receipt_phone_number: open_opt(&record.receipt_phone_number)?,
        })
    }
}

/// Encode a SecretRecord as `[RECORD_FORMAT] + bincode(record)`.
fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode")?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_FORMAT);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    match bytes.split_first() {
        Some((&RECORD_FORMAT, payload)) => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .context("bincode decode")?;
            Ok(record)
        }
        Some((other, _)) => anyhow::bail!("unknown record format {other:#04x}"),
        None => anyhow::bail!("empty record"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::SecretType;
    use tempfile::tempdir;

    fn make_store() -> (Store, tempfile::TempDir) {
        let key = super::super::crypto::generate_key();
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(&path, key).unwrap();
        (store, dir)
    }

    fn neogram() -> NewSecret {
        NewSecret {
            secret_type: SecretType::Neogram,
            message: "wake up neo".into(),
            is_encrypted_with_user_password: true,
            neogram_destruction_message: Some("poof".into()),
            neogram_destruction_timeout: Some(5),
            receipt_email: Some("trinity@example.com".into()),
            receipt_phone_number: Some("41791234567".into()),
        }
    }

    #[test]
    fn take_returns_secret_once() {
        let (s, _dir) = make_store();
        assert!(s.insert_secret("abc123", &NewSecret::text("hello")).unwrap());

        let revealed = s.take_secret("abc123").unwrap().unwrap();
        assert_eq!(revealed.secret_type, SecretType::Text);
        assert_eq!(revealed.message, "hello");
        assert!(!revealed.is_encrypted_with_user_password);

        assert!(s.take_secret("abc123").unwrap().is_none());
    }

    #[test]
    fn take_unknown_alias_is_none() {
        let (s, _dir) = make_store();
        assert!(s.take_secret("nonexistent").unwrap().is_none());
    }

    #[test]
    fn all_fields_survive_round_trip() {
        let (s, _dir) = make_store();
        s.insert_secret("neo", &neogram()).unwrap();
        let r = s.take_secret("neo").unwrap().unwrap();
        assert_eq!(r.secret_type, SecretType::Neogram);
        assert_eq!(r.message, "wake up neo");
        assert!(r.is_encrypted_with_user_password);
        assert_eq!(r.neogram_destruction_message.as_deref(), Some("poof"));
        assert_eq!(r.neogram_destruction_timeout, Some(5));
        assert_eq!(r.receipt_email.as_deref(), Some("trinity@example.com"));
        assert_eq!(r.receipt_phone_number.as_deref(), Some("41791234567"));
    }

    #[test]
    fn stored_bytes_do_not_contain_plaintext() {
        let (s, _dir) = make_store();
        s.insert_secret("neo", &neogram()).unwrap();

        let read_txn = s.db.begin_read().unwrap();
        let table = read_txn.open_table(SECRETS).unwrap();
        let raw = table.get("neo").unwrap().unwrap().value().to_vec();
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("wake up neo"));
        assert!(!haystack.contains("trinity@example.com"));
        assert!(!haystack.contains("41791234567"));
    }

    #[test]
    fn duplicate_alias_is_rejected_and_first_kept() {
        let (s, _dir) = make_store();
        assert!(s.insert_secret("dup", &NewSecret::text("first")).unwrap());
        assert!(!s.insert_secret("dup", &NewSecret::text("second")).unwrap());
        assert_eq!(s.take_secret("dup").unwrap().unwrap().message, "first");
    }

    #[test]
    fn failed_decryption_keeps_the_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let s = Store::open(&path, super::super::crypto::generate_key()).unwrap();
            s.insert_secret("keep", &NewSecret::text("v")).unwrap();
        }
        let s = Store::open(&path, super::super::crypto::generate_key()).unwrap();
        assert!(s.take_secret("keep").is_err());

        let read_txn = s.db.begin_read().unwrap();
        let table = read_txn.open_table(SECRETS).unwrap();
        assert!(table.get("keep").unwrap().is_some());
    }

    #[test]
    fn concurrent_takes_yield_one_winner() {
        let (s, _dir) = make_store();
        s.insert_secret("race", &NewSecret::text("only once")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                std::thread::spawn(move || s.take_secret("race").unwrap())
            })
            .collect();
        let winners: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].message, "only once");
    }

    #[test]
    fn counters_track_created_and_viewed() {
        let (s, _dir) = make_store();
        s.record_created(SecretType::Text).unwrap();
        s.record_created(SecretType::Text).unwrap();
        s.record_created(SecretType::Neogram).unwrap();
        s.record_viewed(SecretType::Url).unwrap();

        let stats = s.stats().unwrap();
        assert_eq!(stats.total_secrets_count, 3);
        assert_eq!(stats.secrets_count.text, 2);
        assert_eq!(stats.secrets_count.neogram, 1);
        assert_eq!(stats.secrets_count.url, 0);
        assert_eq!(stats.total_secrets_view_count, 1);
        assert_eq!(stats.secrets_view_count.url, 1);
    }

    #[test]
    fn settings_upsert_preserves_created_at() {
        let (s, _dir) = make_store();
        assert!(s.get_settings("neo@example.com").unwrap().is_none());

        let first = s.upsert_settings("neo@example.com", "Neo", "bye").unwrap();
        let second = s
            .upsert_settings("neo@example.com", "Thomas", "gone")
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.name, "Thomas");

        let stored = s.get_settings("neo@example.com").unwrap().unwrap();
        assert_eq!(stored, second);
        assert!(s.get_settings("other@example.com").unwrap().is_none());
    }

    #[test]
    fn decode_rejects_unknown_format() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x7f, 0, 0]).is_err());
    }
}
