use anyhow::Result;
use redb::{ReadableTable, TableDefinition};
use serde::Serialize;

use super::model::SecretType;

pub(crate) const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const CREATED_TOTAL: &str = "created.total";
const VIEWED_TOTAL: &str = "viewed.total";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountByType {
    pub text: u64,
    pub url: u64,
    pub neogram: u64,
}

impl CountByType {
    fn set(&mut self, secret_type: SecretType, n: u64) {
        match secret_type {
            SecretType::Text => self.text = n,
            SecretType::Url => self.url = n,
            SecretType::Neogram => self.neogram = n,
        }
    }
}

/// Global counters, shaped the way the web client renders them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_secrets_count: u64,
    pub secrets_count: CountByType,
    pub total_secrets_view_count: u64,
    pub secrets_view_count: CountByType,
}

fn created_key(secret_type: SecretType) -> String {
    format!("created.{secret_type}")
}

fn viewed_key(secret_type: SecretType) -> String {
    format!("viewed.{secret_type}")
}

impl super::Store {
    /// Bump `created.total` and `created.<type>` in one transaction.
    pub fn record_created(&self, secret_type: SecretType) -> Result<()> {
        self.increment(&[CREATED_TOTAL, &created_key(secret_type)])
    }

    /// Bump `viewed.total` and `viewed.<type>` in one transaction.
    pub fn record_viewed(&self, secret_type: SecretType) -> Result<()> {
        self.increment(&[VIEWED_TOTAL, &viewed_key(secret_type)])
    }

    pub fn stats(&self) -> Result<Stats> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COUNTERS)?;
        let read = |key: &str| -> Result<u64> { Ok(table.get(key)?.map(|g| g.value()).unwrap_or(0)) };

        let mut stats = Stats {
            total_secrets_count: read(CREATED_TOTAL)?,
            total_secrets_view_count: read(VIEWED_TOTAL)?,
            ..Default::default()
        };
        for secret_type in SecretType::ALL {
            stats
                .secrets_count
                .set(secret_type, read(&created_key(secret_type))?);
            stats
                .secrets_view_count
                .set(secret_type, read(&viewed_key(secret_type))?);
        }
        Ok(stats)
    }

    fn increment(&self, keys: &[&str]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut counters = write_txn.open_table(COUNTERS)?;
            for key in keys {
                let n = counters.get(*key)?.map(|g| g.value()).unwrap_or(0) + 1;
                counters.insert(*key, n)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
