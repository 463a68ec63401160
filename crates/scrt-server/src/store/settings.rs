use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

pub(crate) const USER_SETTINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("user_settings");

pub const NAME_MAX_LEN: usize = 100;
pub const DESTRUCTION_MESSAGE_MAX_LEN: usize = 280;

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub user_id: String,
    pub name: String,
    /// Stored percent-encoded.
    pub neogram_destruction_message: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Trim both fields, bound their lengths, and percent-encode the destruction message.
/// Returns `(name, neogram_destruction_message)` or a human-readable reason.
pub fn normalize_input(
    name: &str,
    neogram_destruction_message: &str,
) -> std::result::Result<(String, String), String> {
    let name = name.trim();
    let message = neogram_destruction_message.trim();
    if name.chars().count() > NAME_MAX_LEN {
        return Err(format!("name must be at most {NAME_MAX_LEN} characters"));
    }
    if message.chars().count() > DESTRUCTION_MESSAGE_MAX_LEN {
        return Err(format!(
            "neogramDestructionMessage must be at most {DESTRUCTION_MESSAGE_MAX_LEN} characters"
        ));
    }
    Ok((
        name.to_owned(),
        utf8_percent_encode(message, URI_COMPONENT).to_string(),
    ))
}

impl super::Store {
    pub fn get_settings(&self, user_id: &str) -> Result<Option<UserSettings>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USER_SETTINGS)?;
        let raw_bytes: Option<Vec<u8>> = table.get(user_id)?.map(|guard| guard.value().to_vec());
        raw_bytes.as_deref().map(decode_settings).transpose()
    }

    /// Insert or update the settings for `user_id`. `created_at` survives updates.
    pub fn upsert_settings(
        &self,
        user_id: &str,
        name: &str,
        neogram_destruction_message: &str,
    ) -> Result<UserSettings> {
        let now = Self::now();
        let write_txn = self.db.begin_write()?;
        let settings = {
            let mut table = write_txn.open_table(USER_SETTINGS)?;
            let raw_bytes: Option<Vec<u8>> =
                table.get(user_id)?.map(|guard| guard.value().to_vec());
            let existing = raw_bytes.as_deref().map(decode_settings).transpose()?;

            let settings = UserSettings {
                user_id: user_id.to_owned(),
                name: name.to_owned(),
                neogram_destruction_message: neogram_destruction_message.to_owned(),
                created_at: existing.map(|s| s.created_at).unwrap_or(now),
                updated_at: now,
            };
            let bytes = bincode::serde::encode_to_vec(&settings, bincode::config::standard())
                .context("bincode encode user settings")?;
            table.insert(user_id, bytes.as_slice())?;
            settings
        };
        write_txn.commit()?;
        Ok(settings)
    }
}

fn decode_settings(bytes: &[u8]) -> Result<UserSettings> {
    let (settings, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode user settings")?;
    Ok(settings)
}
