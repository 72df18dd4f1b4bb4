use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::schema::*;
use super::Store;
use crate::error::Result;

#[derive(Default)]
struct Inner {
    miners: BTreeMap<String, MinerRecord>,
    nonces: HashSet<String>,
    share_seq: ShareId,
    shares: HashMap<ShareId, ShareRecord>,
    window_seq: WindowId,
    windows: BTreeMap<WindowId, WindowRecord>,
    open_window: Option<WindowId>,
    window_members: HashMap<WindowId, Vec<ShareId>>,
    balances: BTreeMap<String, BalanceRecord>,
    withdrawals: Vec<WithdrawalRecord>,
}

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_miner(&self, address: &str) -> Result<Option<MinerRecord>> {
        Ok(self.inner.read().await.miners.get(address).cloned())
    }

    async fn save_miner(&self, miner: &MinerRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .miners
            .insert(miner.address.clone(), miner.clone());
        Ok(())
    }

    async fn list_miners(&self) -> Result<Vec<MinerRecord>> {
        Ok(self.inner.read().await.miners.values().cloned().collect())
    }

    async fn record_nonce(&self, nonce: &str) -> Result<bool> {
        Ok(self.inner.write().await.nonces.insert(nonce.to_string()))
    }

    async fn forget_nonce(&self, nonce: &str) -> Result<()> {
        self.inner.write().await.nonces.remove(nonce);
        Ok(())
    }

    async fn next_share_id(&self) -> Result<ShareId> {
        let mut inner = self.inner.write().await;
        inner.share_seq += 1;
        Ok(inner.share_seq)
    }

    async fn save_share(&self, share: &ShareRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .shares
            .insert(share.id, share.clone());
        Ok(())
    }

    async fn next_window_id(&self) -> Result<WindowId> {
        let mut inner = self.inner.write().await;
        inner.window_seq += 1;
        Ok(inner.window_seq)
    }

    async fn save_window(&self, window: &WindowRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if window.state == WindowState::Open {
            inner.open_window = Some(window.id);
        }
        inner.windows.insert(window.id, window.clone());
        Ok(())
    }

    async fn get_window(&self, id: WindowId) -> Result<Option<WindowRecord>> {
        Ok(self.inner.read().await.windows.get(&id).cloned())
    }

    async fn list_windows(&self) -> Result<Vec<WindowRecord>> {
        Ok(self.inner.read().await.windows.values().cloned().collect())
    }

    async fn open_window_id(&self) -> Result<Option<WindowId>> {
        Ok(self.inner.read().await.open_window)
    }

    async fn rotate_window(&self, closed: &WindowRecord, opened: &WindowRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.windows.insert(closed.id, closed.clone());
        inner.windows.insert(opened.id, opened.clone());
        inner.open_window = Some(opened.id);
        Ok(())
    }

    async fn append_window_share(&self, window_id: WindowId, share_id: ShareId) -> Result<()> {
        self.inner
            .write()
            .await
            .window_members
            .entry(window_id)
            .or_default()
            .push(share_id);
        Ok(())
    }

    async fn window_shares(&self, window_id: WindowId) -> Result<Vec<ShareRecord>> {
        let inner = self.inner.read().await;
        let shares = inner
            .window_members
            .get(&window_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.shares.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(shares)
    }

    async fn insert_balance(&self, entry: &BalanceRecord) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.balances.contains_key(&entry.id) {
            return Ok(false);
        }
        inner.balances.insert(entry.id.clone(), entry.clone());
        Ok(true)
    }

    async fn update_balance(&self, entry: &BalanceRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .balances
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get_balance(&self, id: &str) -> Result<Option<BalanceRecord>> {
        Ok(self.inner.read().await.balances.get(id).cloned())
    }

    async fn miner_balances(&self, address: &str) -> Result<Vec<BalanceRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .balances
            .values()
            .filter(|b| b.miner_address == address)
            .cloned()
            .collect())
    }

    async fn window_balances(&self, window_id: WindowId) -> Result<Vec<BalanceRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .balances
            .values()
            .filter(|b| b.window_id == window_id)
            .cloned()
            .collect())
    }

    async fn apply_withdrawal(
        &self,
        withdrawal: &WithdrawalRecord,
        entries: &[BalanceRecord],
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        for entry in entries {
            inner.balances.insert(entry.id.clone(), entry.clone());
        }
        inner.withdrawals.push(withdrawal.clone());
        Ok(())
    }

    async fn miner_withdrawals(&self, address: &str) -> Result<Vec<WithdrawalRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .withdrawals
            .iter()
            .filter(|w| w.miner_address == address)
            .cloned()
            .collect())
    }
}
