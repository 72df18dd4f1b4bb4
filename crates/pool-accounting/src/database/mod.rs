pub mod memory_store;
pub mod redis_store;
pub mod schema;
#[cfg(test)]
pub(crate) mod test_support;

use async_trait::async_trait;

use crate::error::Result;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use schema::*;

/// Durable storage for miners, shares, windows and balance entries.
///
/// Callers serialize writes that must be atomic with respect to each other
/// (window rotation, settlement, withdrawal); the store only guarantees that
/// each single call is applied whole.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_miner(&self, address: &str) -> Result<Option<MinerRecord>>;
    async fn save_miner(&self, miner: &MinerRecord) -> Result<()>;
    async fn list_miners(&self) -> Result<Vec<MinerRecord>>;

    /// Records a nonce. Returns `false` when it had already been recorded.
    async fn record_nonce(&self, nonce: &str) -> Result<bool>;
    /// Releases a nonce whose share could not be stored.
    async fn forget_nonce(&self, nonce: &str) -> Result<()>;
    async fn next_share_id(&self) -> Result<ShareId>;
    async fn save_share(&self, share: &ShareRecord) -> Result<()>;

    async fn next_window_id(&self) -> Result<WindowId>;
    async fn save_window(&self, window: &WindowRecord) -> Result<()>;
    async fn get_window(&self, id: WindowId) -> Result<Option<WindowRecord>>;
    /// All windows, oldest first.
    async fn list_windows(&self) -> Result<Vec<WindowRecord>>;
    async fn open_window_id(&self) -> Result<Option<WindowId>>;
    /// Persists the closed window, the newly opened one and the open pointer in one step.
    async fn rotate_window(&self, closed: &WindowRecord, opened: &WindowRecord) -> Result<()>;
    async fn append_window_share(&self, window_id: WindowId, share_id: ShareId) -> Result<()>;
    /// Member shares of a window in submission order.
    async fn window_shares(&self, window_id: WindowId) -> Result<Vec<ShareRecord>>;

    /// Inserts a balance entry unless one with the same id exists, and indexes it
    /// either way. Returns whether it was inserted.
    async fn insert_balance(&self, entry: &BalanceRecord) -> Result<bool>;
    async fn update_balance(&self, entry: &BalanceRecord) -> Result<()>;
    async fn get_balance(&self, id: &str) -> Result<Option<BalanceRecord>>;
    async fn miner_balances(&self, address: &str) -> Result<Vec<BalanceRecord>>;
    async fn window_balances(&self, window_id: WindowId) -> Result<Vec<BalanceRecord>>;

    /// Stores the withdrawn entries and the withdrawal record in one step.
    async fn apply_withdrawal(
        &self,
        withdrawal: &WithdrawalRecord,
        entries: &[BalanceRecord],
    ) -> Result<()>;
    async fn miner_withdrawals(&self, address: &str) -> Result<Vec<WithdrawalRecord>>;
}
