use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite,
};
use teloxide::types::UserId;

use super::{AccessFlag, AccessLedger, AccessRecord, LedgerError};

type Pool = sqlx::Pool<Sqlite>;

/// Ledger in an SQLite database file. The default backend.
pub struct SqliteLedger {
    pool: Pool,
}

impl SqliteLedger {
    /// Open (and create, if needed) the database at `db_path`,
    /// which is an SQLite connection string like `sqlite:access_ledger.sqlite`.
    pub async fn open(db_path: &str) -> Result<Self, LedgerError> {
        if !Sqlite::database_exists(db_path).await.unwrap_or(false) {
            Sqlite::create_database(db_path).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(
                SqliteConnectOptions::from_str(db_path)?
                    .busy_timeout(std::time::Duration::from_secs(30)),
            )
            .await?;

        // ACCESS_LEDGER:
        // userid (key, u64 bit-cast into i64 because sqlite doesn't do u64)
        // is_verified (0 for no, 1 for yes)
        // is_premium (0 for no, 1 for yes)
        // updated_at (date+time in UTC of the last grant)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS access_ledger (
                userid INTEGER PRIMARY KEY NOT NULL,
                is_verified INTEGER NOT NULL DEFAULT 0,
                is_premium INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NULL
            ) STRICT;",
        ))
        .await?;

        Ok(SqliteLedger { pool })
    }

    fn record_from_row(user: UserId, row: &SqliteRow) -> AccessRecord {
        AccessRecord {
            user_id: user,
            is_verified: row.get::<i64, _>("is_verified") != 0,
            is_premium: row.get::<i64, _>("is_premium") != 0,
            updated_at: row.get::<Option<DateTime<Utc>>, _>("updated_at"),
        }
    }
}

#[async_trait]
impl AccessLedger for SqliteLedger {
    #[allow(clippy::cast_possible_wrap)]
    async fn grant(&self, user: UserId, flag: AccessFlag) -> Result<(), LedgerError> {
        let verified = flag == AccessFlag::Verified;
        let premium = flag == AccessFlag::Premium;

        // MAX() so that a grant of one flag never clears the other.
        sqlx::query(
            "INSERT INTO access_ledger(userid, is_verified, is_premium, updated_at)
            VALUES (?, ?, ?, ?)
        ON CONFLICT(userid) DO
            UPDATE SET is_verified=MAX(is_verified, excluded.is_verified),
                is_premium=MAX(is_premium, excluded.is_premium),
                updated_at=excluded.updated_at;",
        )
        .bind(user.0 as i64)
        .bind(i64::from(verified))
        .bind(i64::from(premium))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        log::debug!("Granted {flag} to {user}");
        Ok(())
    }

    async fn check(&self, user: UserId, flag: AccessFlag) -> Result<bool, LedgerError> {
        Ok(self.record(user).await?.has(flag))
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn record(&self, user: UserId) -> Result<AccessRecord, LedgerError> {
        let record = sqlx::query(
            "SELECT is_verified, is_premium, updated_at FROM access_ledger WHERE userid=?;",
        )
        .bind(user.0 as i64)
        .map(|row: SqliteRow| Self::record_from_row(user, &row))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.unwrap_or_else(|| AccessRecord::empty(user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::contract;

    fn db_path(dir: &tempfile::TempDir) -> String {
        format!("sqlite:{}", dir.path().join("ledger.sqlite").display())
    }

    #[tokio::test]
    async fn holds_the_contract() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(&db_path(&dir)).await.unwrap();
        contract::all(&ledger).await;
    }

    #[tokio::test]
    async fn grants_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = SqliteLedger::open(&db_path(&dir)).await.unwrap();
            ledger.grant(UserId(42), AccessFlag::Premium).await.unwrap();
            ledger.pool.close().await;
        }

        let ledger = SqliteLedger::open(&db_path(&dir)).await.unwrap();
        assert!(ledger.check(UserId(42), AccessFlag::Premium).await.unwrap());
        assert!(!ledger.check(UserId(42), AccessFlag::Verified).await.unwrap());
    }

    #[tokio::test]
    async fn one_row_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::open(&db_path(&dir)).await.unwrap();
        ledger.grant(UserId(5), AccessFlag::Premium).await.unwrap();
        ledger.grant(UserId(5), AccessFlag::Premium).await.unwrap();
        ledger.grant(UserId(5), AccessFlag::Verified).await.unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM access_ledger;")
            .map(|row: SqliteRow| row.get(0))
            .fetch_one(&ledger.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
