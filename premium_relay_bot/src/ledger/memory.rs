use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use teloxide::types::UserId;
use tokio::sync::RwLock;

use super::{AccessFlag, AccessLedger, AccessRecord, LedgerError};

/// Ledger that only lives as long as the process. Never fails.
#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<UserId, AccessRecord>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessLedger for MemoryLedger {
    async fn grant(&self, user: UserId, flag: AccessFlag) -> Result<(), LedgerError> {
        self.records
            .write()
            .await
            .entry(user)
            .or_insert_with(|| AccessRecord::empty(user))
            .set(flag, Utc::now());
        Ok(())
    }

    async fn check(&self, user: UserId, flag: AccessFlag) -> Result<bool, LedgerError> {
        Ok(self.record(user).await?.has(flag))
    }

    async fn record(&self, user: UserId) -> Result<AccessRecord, LedgerError> {
        Ok(self
            .records
            .read()
            .await
            .get(&user)
            .copied()
            .unwrap_or_else(|| AccessRecord::empty(user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::contract;

    #[tokio::test]
    async fn holds_the_contract() {
        contract::all(&MemoryLedger::new()).await;
    }

    #[tokio::test]
    async fn scenario_premium_only() {
        let ledger = MemoryLedger::new();
        ledger.grant(UserId(42), AccessFlag::Premium).await.unwrap();
        assert!(ledger.check(UserId(42), AccessFlag::Premium).await.unwrap());
        assert!(!ledger.check(UserId(42), AccessFlag::Verified).await.unwrap());
    }
}
