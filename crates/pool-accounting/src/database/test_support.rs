use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MemoryStore, Store};
use super::schema::*;
use crate::error::{PoolError, Result};

/// `MemoryStore` that fails chosen operations after a number of successful calls.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    // operation name -> calls left before it fails once
    armed: Mutex<HashMap<&'static str, usize>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the call to `op` after `skip` successful ones fail.
    pub fn fail_after(&self, op: &'static str, skip: usize) {
        self.armed.lock().unwrap().insert(op, skip);
    }

    fn check(&self, op: &'static str) -> Result<()> {
        let mut armed = self.armed.lock().unwrap();
        match armed.get(op).copied() {
            Some(0) => {
                armed.remove(op);
                Err(PoolError::Database(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "injected failure",
                ))))
            }
            Some(left) => {
                armed.insert(op, left - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn get_miner(&self, address: &str) -> Result<Option<MinerRecord>> {
        self.check("get_miner")?;
        self.inner.get_miner(address).await
    }

    async fn save_miner(&self, miner: &MinerRecord) -> Result<()> {
        self.check("save_miner")?;
        self.inner.save_miner(miner).await
    }

    async fn list_miners(&self) -> Result<Vec<MinerRecord>> {
        self.check("list_miners")?;
        self.inner.list_miners().await
    }

    async fn record_nonce(&self, nonce: &str) -> Result<bool> {
        self.check("record_nonce")?;
        self.inner.record_nonce(nonce).await
    }

    async fn forget_nonce(&self, nonce: &str) -> Result<()> {
        self.check("forget_nonce")?;
        self.inner.forget_nonce(nonce).await
    }

    async fn next_share_id(&self) -> Result<ShareId> {
        self.check("next_share_id")?;
        self.inner.next_share_id().await
    }

    async fn save_share(&self, share: &ShareRecord) -> Result<()> {
        self.check("save_share")?;
        self.inner.save_share(share).await
    }

    async fn next_window_id(&self) -> Result<WindowId> {
        self.check("next_window_id")?;
        self.inner.next_window_id().await
    }

    async fn save_window(&self, window: &WindowRecord) -> Result<()> {
        self.check("save_window")?;
        self.inner.save_window(window).await
    }

    async fn get_window(&self, id: WindowId) -> Result<Option<WindowRecord>> {
        self.check("get_window")?;
        self.inner.get_window(id).await
    }

    async fn list_windows(&self) -> Result<Vec<WindowRecord>> {
        self.check("list_windows")?;
        self.inner.list_windows().await
    }

    async fn open_window_id(&self) -> Result<Option<WindowId>> {
        self.check("open_window_id")?;
        self.inner.open_window_id().await
    }

    async fn rotate_window(&self, closed: &WindowRecord, opened: &WindowRecord) -> Result<()> {
        self.check("rotate_window")?;
        self.inner.rotate_window(closed, opened).await
    }

    async fn append_window_share(&self, window_id: WindowId, share_id: ShareId) -> Result<()> {
        self.check("append_window_share")?;
        self.inner.append_window_share(window_id, share_id).await
    }

    async fn window_shares(&self, window_id: WindowId) -> Result<Vec<ShareRecord>> {
        self.check("window_shares")?;
        self.inner.window_shares(window_id).await
    }

    async fn insert_balance(&self, entry: &BalanceRecord) -> Result<bool> {
        self.check("insert_balance")?;
        self.inner.insert_balance(entry).await
    }

    async fn update_balance(&self, entry: &BalanceRecord) -> Result<()> {
        self.check("update_balance")?;
        self.inner.update_balance(entry).await
    }

    async fn get_balance(&self, id: &str) -> Result<Option<BalanceRecord>> {
        self.check("get_balance")?;
        self.inner.get_balance(id).await
    }

    async fn miner_balances(&self, address: &str) -> Result<Vec<BalanceRecord>> {
        self.check("miner_balances")?;
        self.inner.miner_balances(address).await
    }

    async fn window_balances(&self, window_id: WindowId) -> Result<Vec<BalanceRecord>> {
        self.check("window_balances")?;
        self.inner.window_balances(window_id).await
    }

    async fn apply_withdrawal(
        &self,
        withdrawal: &WithdrawalRecord,
        entries: &[BalanceRecord],
    ) -> Result<()> {
        self.check("apply_withdrawal")?;
        self.inner.apply_withdrawal(withdrawal, entries).await
    }

    async fn miner_withdrawals(&self, address: &str) -> Result<Vec<WithdrawalRecord>> {
        self.check("miner_withdrawals")?;
        self.inner.miner_withdrawals(address).await
    }
}
