use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;
use tokio::sync::Mutex;

use super::{AccessFlag, AccessLedger, AccessRecord, LedgerError};

/// What's stored per user in the file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    is_premium: bool,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    fn to_record(self, user_id: UserId) -> AccessRecord {
        AccessRecord {
            user_id,
            is_verified: self.is_verified,
            is_premium: self.is_premium,
            updated_at: self.updated_at,
        }
    }
}

type Records = BTreeMap<u64, StoredRecord>;

/// Ledger kept as one JSON object on disk, `{"<user id>": {...}, ...}`.
///
/// The whole thing lives in memory; every grant rewrites the file through a
/// temporary file and a rename, so a crash mid-write leaves the old file intact.
pub struct JsonFileLedger {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonFileLedger {
    /// Load the ledger from `path`. A missing or empty file is an empty ledger;
    /// the file gets created on the first grant.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Records::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::new(),
            Err(e) => return Err(e.into()),
        };

        log::debug!("Loaded {} ledger records from {}", records.len(), path.display());

        Ok(JsonFileLedger {
            path,
            records: Mutex::new(records),
        })
    }

    async fn persist(&self, records: &Records) -> Result<(), LedgerError> {
        let data = serde_json::to_vec_pretty(records)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let mut temp = tempfile::NamedTempFile::new_in(dir)?;
            temp.write_all(&data)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(())
    }
}

#[async_trait]
impl AccessLedger for JsonFileLedger {
    async fn grant(&self, user: UserId, flag: AccessFlag) -> Result<(), LedgerError> {
        let mut records = self.records.lock().await;

        let previous = records.get(&user.0).copied();
        let mut record = previous.unwrap_or_default().to_record(user);
        record.set(flag, Utc::now());
        records.insert(
            user.0,
            StoredRecord {
                is_verified: record.is_verified,
                is_premium: record.is_premium,
                updated_at: record.updated_at,
            },
        );

        if let Err(e) = self.persist(&records).await {
            // Don't claim a grant in memory that isn't on disk.
            match previous {
                Some(previous) => records.insert(user.0, previous),
                None => records.remove(&user.0),
            };
            return Err(e);
        }

        log::debug!("Granted {flag} to {user}");
        Ok(())
    }

    async fn check(&self, user: UserId, flag: AccessFlag) -> Result<bool, LedgerError> {
        Ok(self.record(user).await?.has(flag))
    }

    async fn record(&self, user: UserId) -> Result<AccessRecord, LedgerError> {
        Ok(self
            .records
            .lock()
            .await
            .get(&user.0)
            .map_or_else(|| AccessRecord::empty(user), |r| r.to_record(user)))
    }
}
