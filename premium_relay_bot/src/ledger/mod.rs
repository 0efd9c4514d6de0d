//! Per-user access flags: who has verified, who has paid.
//!
//! One trait, [`AccessLedger`], and a few storage backends for it. Which one
//! is used is decided by configuration, once, at startup.

mod json_file;
mod memory;
mod sqlite;

use std::{fmt::Display, str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

pub use json_file::JsonFileLedger;
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// A single entitlement a user can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessFlag {
    /// Passed the `/verify` step.
    Verified,
    /// Paid.
    Premium,
}

impl AccessFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessFlag::Verified => "verified",
            AccessFlag::Premium => "premium",
        }
    }
}

impl Display for AccessFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verified" => Ok(AccessFlag::Verified),
            "premium" => Ok(AccessFlag::Premium),
            other => Err(format!("unknown access flag: {other}")),
        }
    }
}

/// Everything the ledger knows about one user.
///
/// A user the ledger has never seen gets [`AccessRecord::empty`]: not
/// verified, not premium, never updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    pub user_id: UserId,
    pub is_verified: bool,
    pub is_premium: bool,
    /// When a flag was last granted. `None` if there is no record at all.
    pub updated_at: Option<DateTime<Utc>>,
}

impl AccessRecord {
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        AccessRecord {
            user_id,
            is_verified: false,
            is_premium: false,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn has(&self, flag: AccessFlag) -> bool {
        match flag {
            AccessFlag::Verified => self.is_verified,
            AccessFlag::Premium => self.is_premium,
        }
    }

    /// Sets the flag and bumps `updated_at`. Doesn't touch the other flag.
    pub fn set(&mut self, flag: AccessFlag, now: DateTime<Utc>) {
        match flag {
            AccessFlag::Verified => self.is_verified = true,
            AccessFlag::Premium => self.is_premium = true,
        }
        self.updated_at = Some(now);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("ledger file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable mapping from a user to their access flags.
///
/// Grants are upserts and idempotent. There is no way to revoke anything.
/// Concurrent grants for the same user are last-write-wins per row.
#[async_trait]
pub trait AccessLedger: Send + Sync {
    /// Set `flag` for `user`, creating their record if needed.
    /// The other flag is left as it was.
    async fn grant(&self, user: UserId, flag: AccessFlag) -> Result<(), LedgerError>;

    /// Current value of `flag` for `user`. Unknown users are simply `false`.
    async fn check(&self, user: UserId, flag: AccessFlag) -> Result<bool, LedgerError>;

    /// The whole record of `user`, or [`AccessRecord::empty`] if there is none.
    async fn record(&self, user: UserId) -> Result<AccessRecord, LedgerError>;
}

/// Storage backend for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Sqlite,
    Json,
    Memory,
}

impl LedgerBackend {
    /// Where the backend keeps its stuff unless told otherwise.
    pub fn default_path(self) -> &'static str {
        match self {
            LedgerBackend::Sqlite => "sqlite:access_ledger.sqlite",
            LedgerBackend::Json => "access_ledger.json",
            LedgerBackend::Memory => "",
        }
    }
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(LedgerBackend::Sqlite),
            "json" => Ok(LedgerBackend::Json),
            "memory" => Ok(LedgerBackend::Memory),
            other => Err(format!("unknown ledger backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// SQLite connection string for [`LedgerBackend::Sqlite`],
    /// file path for [`LedgerBackend::Json`], ignored for memory.
    pub path: String,
}

/// Open the configured ledger. Call this once per process.
pub async fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn AccessLedger>, LedgerError> {
    log::info!(
        "Opening {:?} access ledger at {:?}",
        config.backend,
        config.path
    );
    Ok(match config.backend {
        LedgerBackend::Sqlite => Arc::new(SqliteLedger::open(&config.path).await?),
        LedgerBackend::Json => Arc::new(JsonFileLedger::open(&config.path).await?),
        LedgerBackend::Memory => {
            log::warn!("Using the in-memory ledger. All grants are lost on restart!");
            Arc::new(MemoryLedger::new())
        }
    })
}
