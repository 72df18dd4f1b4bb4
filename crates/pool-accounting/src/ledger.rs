use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{
    BalanceRecord, BalanceStatus, BalanceTotals, Store, WindowId, WithdrawalRecord,
};
use crate::error::{PoolError, Result};
use crate::metrics::{AMOUNT_CREDITED, AMOUNT_WITHDRAWN};

/// Append-only record of balance entries per miner.
///
/// Entry status only moves forward, pending to confirmed to withdrawn. Routine
/// accounting uses `credit` and `confirm`; `withdraw` is reserved for explicit
/// withdrawal requests.
pub struct BalanceLedger<S: Store> {
    store: Arc<S>,
    withdraw_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: Store> BalanceLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            withdraw_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a pending entry for `miner` from `window_id`.
    ///
    /// A miner has at most one entry per window; crediting again returns the
    /// existing entry unchanged.
    pub async fn credit(&self, miner: &str, amount: u64, window_id: WindowId) -> Result<BalanceRecord> {
        let entry = BalanceRecord::pending(miner.to_string(), window_id, amount);

        if self.store.insert_balance(&entry).await? {
            AMOUNT_CREDITED.inc_by(amount);
            debug!("Credited {} to {} from window {}", amount, miner, window_id);
            return Ok(entry);
        }

        debug!("Window {} already credited {}, keeping existing entry", window_id, miner);
        self.store
            .get_balance(&entry.id)
            .await?
            .ok_or(PoolError::BalanceNotFound(entry.id))
    }

    /// Advances a pending entry to confirmed. Entries already past pending are left as they are.
    pub async fn confirm(&self, entry_id: &str) -> Result<BalanceRecord> {
        let mut entry = self
            .store
            .get_balance(entry_id)
            .await?
            .ok_or_else(|| PoolError::BalanceNotFound(entry_id.to_string()))?;

        if entry.status != BalanceStatus::Pending {
            return Ok(entry);
        }

        entry.status = entry.status.transition(BalanceStatus::Confirmed)?;
        entry.updated_at = Utc::now();
        self.store.update_balance(&entry).await?;
        Ok(entry)
    }

    /// Moves every confirmed entry of `miner` to withdrawn and returns the withdrawal.
    ///
    /// Pending entries are untouched. Fails with `NoConfirmedBalance` when nothing is payable.
    pub async fn withdraw(&self, miner: &str) -> Result<WithdrawalRecord> {
        let lock = self.miner_lock(miner).await;
        let _guard = lock.lock().await;

        let confirmed: Vec<BalanceRecord> = self
            .store
            .miner_balances(miner)
            .await?
            .into_iter()
            .filter(|entry| entry.status == BalanceStatus::Confirmed)
            .collect();

        let requested_at = Utc::now();
        let mut claimed = Vec::with_capacity(confirmed.len());
        for entry in confirmed {
            // Re-read so an entry claimed by another process is not paid twice
            let Some(mut current) = self.store.get_balance(&entry.id).await? else {
                continue;
            };
            if current.status != BalanceStatus::Confirmed {
                continue;
            }

            current.status = current.status.transition(BalanceStatus::Withdrawn)?;
            current.updated_at = requested_at;
            claimed.push(current);
        }

        let amount: u64 = claimed.iter().map(|entry| entry.amount).sum();
        if claimed.is_empty() || amount == 0 {
            return Err(PoolError::NoConfirmedBalance(miner.to_string()));
        }

        let withdrawal = WithdrawalRecord {
            id: Uuid::new_v4(),
            miner_address: miner.to_string(),
            amount,
            entries: claimed.iter().map(|entry| entry.id.clone()).collect(),
            requested_at,
        };

        // Entry statuses and the withdrawal record land together or not at all
        self.store.apply_withdrawal(&withdrawal, &claimed).await?;
        AMOUNT_WITHDRAWN.inc_by(withdrawal.amount);
        info!(
            "Withdrawal {} for {}: {} from {} entries",
            withdrawal.id,
            miner,
            withdrawal.amount,
            withdrawal.entries.len()
        );

        Ok(withdrawal)
    }

    pub async fn totals(&self, miner: &str) -> Result<BalanceTotals> {
        let entries = self.store.miner_balances(miner).await?;
        Ok(BalanceTotals::from_entries(&entries))
    }

    pub async fn entries(&self, miner: &str) -> Result<Vec<BalanceRecord>> {
        self.store.miner_balances(miner).await
    }

    pub async fn withdrawals(&self, miner: &str) -> Result<Vec<WithdrawalRecord>> {
        self.store.miner_withdrawals(miner).await
    }

    async fn miner_lock(&self, miner: &str) -> Arc<Mutex<()>> {
        self.withdraw_locks
            .lock()
            .await
            .entry(miner.to_string())
            .or_default()
            .clone()
    }
}
