use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::schema::*;
use super::Store;
use crate::error::Result;

const MINERS_KEY: &str = "miners";
const NONCES_KEY: &str = "shares:nonces";
const SHARE_SEQ_KEY: &str = "share:next_id";
const WINDOW_SEQ_KEY: &str = "window:next_id";
const WINDOWS_KEY: &str = "windows";
const OPEN_WINDOW_KEY: &str = "window:open";

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self { conn })
    }

    fn miner_key(address: &str) -> String {
        format!("miner:{}", address)
    }

    fn share_key(id: ShareId) -> String {
        format!("share:{}", id)
    }

    fn window_key(id: WindowId) -> String {
        format!("window:{}", id)
    }

    fn window_members_key(id: WindowId) -> String {
        format!("window:{}:shares", id)
    }

    fn window_balances_key(id: WindowId) -> String {
        format!("window:{}:balances", id)
    }

    fn balance_key(id: &str) -> String {
        format!("balance:{}", id)
    }

    fn miner_balances_key(address: &str) -> String {
        format!("miner:{}:balances", address)
    }

    fn miner_withdrawals_key(address: &str) -> String {
        format!("miner:{}:withdrawals", address)
    }

    // Nonces are opaque and unbounded in length, so the set stores their digest.
    fn nonce_digest(nonce: &str) -> String {
        hex::encode(Sha256::digest(nonce.as_bytes()))
    }

    // SADD is idempotent, so a retried insert repairs indexes a crashed one left out.
    fn insert_balance_pipe(entry: &BalanceRecord, json: String) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_nx(Self::balance_key(&entry.id), json)
            .sadd(Self::miner_balances_key(&entry.miner_address), &entry.id)
            .ignore()
            .sadd(Self::window_balances_key(entry.window_id), &entry.id)
            .ignore();
        pipe
    }

    fn withdrawal_pipe(
        withdrawal: &WithdrawalRecord,
        entries: &[BalanceRecord],
    ) -> Result<redis::Pipeline> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for entry in entries {
            pipe.set(Self::balance_key(&entry.id), serde_json::to_string(entry)?)
                .ignore();
        }
        pipe.rpush(
            Self::miner_withdrawals_key(&withdrawal.miner_address),
            serde_json::to_string(withdrawal)?,
        )
        .ignore();
        Ok(pipe)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(key).await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.set(key, json).await?;
        Ok(())
    }

    async fn mget_json<T: DeserializeOwned>(&self, keys: Vec<String>) -> Result<Vec<T>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let data: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut records = Vec::with_capacity(data.len());
        for json in data.into_iter().flatten() {
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl Store for RedisStore {
    // Miner operations
    async fn get_miner(&self, address: &str) -> Result<Option<MinerRecord>> {
        self.get_json(&Self::miner_key(address)).await
    }

    async fn save_miner(&self, miner: &MinerRecord) -> Result<()> {
        self.set_json(&Self::miner_key(&miner.address), miner).await?;

        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(MINERS_KEY, &miner.address).await?;
        Ok(())
    }

    async fn list_miners(&self) -> Result<Vec<MinerRecord>> {
        let mut conn = self.conn.clone();
        let mut addresses: Vec<String> = conn.smembers(MINERS_KEY).await?;
        addresses.sort();

        self.mget_json(addresses.iter().map(|a| Self::miner_key(a)).collect())
            .await
    }

    // Share operations
    async fn record_nonce(&self, nonce: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(NONCES_KEY, Self::nonce_digest(nonce)).await?;
        Ok(added == 1)
    }

    async fn forget_nonce(&self, nonce: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(NONCES_KEY, Self::nonce_digest(nonce)).await?;
        Ok(())
    }

    async fn next_share_id(&self) -> Result<ShareId> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(SHARE_SEQ_KEY, 1u64).await?;
        Ok(id)
    }

    async fn save_share(&self, share: &ShareRecord) -> Result<()> {
        self.set_json(&Self::share_key(share.id), share).await
    }

    // Window operations
    async fn next_window_id(&self) -> Result<WindowId> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(WINDOW_SEQ_KEY, 1u64).await?;
        Ok(id)
    }

    async fn save_window(&self, window: &WindowRecord) -> Result<()> {
        let json = serde_json::to_string(window)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(Self::window_key(window.id), json)
            .ignore()
            .zadd(WINDOWS_KEY, window.id, window.id)
            .ignore();
        if window.state == WindowState::Open {
            pipe.set(OPEN_WINDOW_KEY, window.id).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_window(&self, id: WindowId) -> Result<Option<WindowRecord>> {
        self.get_json(&Self::window_key(id)).await
    }

    async fn list_windows(&self) -> Result<Vec<WindowRecord>> {
        let mut conn = self.conn.clone();
        let ids: Vec<WindowId> = conn.zrange(WINDOWS_KEY, 0, -1).await?;

        self.mget_json(ids.into_iter().map(Self::window_key).collect())
            .await
    }

    async fn open_window_id(&self) -> Result<Option<WindowId>> {
        let mut conn = self.conn.clone();
        let id: Option<WindowId> = conn.get(OPEN_WINDOW_KEY).await?;
        Ok(id)
    }

    async fn rotate_window(&self, closed: &WindowRecord, opened: &WindowRecord) -> Result<()> {
        let closed_json = serde_json::to_string(closed)?;
        let opened_json = serde_json::to_string(opened)?;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(Self::window_key(closed.id), closed_json)
            .ignore()
            .set(Self::window_key(opened.id), opened_json)
            .ignore()
            .zadd(WINDOWS_KEY, opened.id, opened.id)
            .ignore()
            .set(OPEN_WINDOW_KEY, opened.id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!("Rotated window {} -> {}", closed.id, opened.id);
        Ok(())
    }

    async fn append_window_share(&self, window_id: WindowId, share_id: ShareId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .rpush(Self::window_members_key(window_id), share_id)
            .await?;
        Ok(())
    }

    async fn window_shares(&self, window_id: WindowId) -> Result<Vec<ShareRecord>> {
        let mut conn = self.conn.clone();
        let ids: Vec<ShareId> = conn
            .lrange(Self::window_members_key(window_id), 0, -1)
            .await?;

        self.mget_json(ids.into_iter().map(Self::share_key).collect())
            .await
    }

    // Balance operations
    async fn insert_balance(&self, entry: &BalanceRecord) -> Result<bool> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();

        let (inserted,): (bool,) = Self::insert_balance_pipe(entry, json)
            .query_async(&mut conn)
            .await?;
        Ok(inserted)
    }

    async fn update_balance(&self, entry: &BalanceRecord) -> Result<()> {
        self.set_json(&Self::balance_key(&entry.id), entry).await
    }

    async fn get_balance(&self, id: &str) -> Result<Option<BalanceRecord>> {
        self.get_json(&Self::balance_key(id)).await
    }

    async fn miner_balances(&self, address: &str) -> Result<Vec<BalanceRecord>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(Self::miner_balances_key(address)).await?;
        ids.sort();

        self.mget_json(ids.iter().map(|id| Self::balance_key(id)).collect())
            .await
    }

    async fn window_balances(&self, window_id: WindowId) -> Result<Vec<BalanceRecord>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn
            .smembers(Self::window_balances_key(window_id))
            .await?;
        ids.sort();

        self.mget_json(ids.iter().map(|id| Self::balance_key(id)).collect())
            .await
    }

    // Withdrawal operations
    async fn apply_withdrawal(
        &self,
        withdrawal: &WithdrawalRecord,
        entries: &[BalanceRecord],
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = Self::withdrawal_pipe(withdrawal, entries)?
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn miner_withdrawals(&self, address: &str) -> Result<Vec<WithdrawalRecord>> {
        let mut conn = self.conn.clone();
        let data: Vec<String> = conn
            .lrange(Self::miner_withdrawals_key(address), 0, -1)
            .await?;

        let mut withdrawals = Vec::with_capacity(data.len());
        for json in data {
            withdrawals.push(serde_json::from_str(&json)?);
        }
        Ok(withdrawals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_digest_is_stable_and_distinct() {
        let a = RedisStore::nonce_digest("00ff");
        assert_eq!(a, RedisStore::nonce_digest("00ff"));
        assert_ne!(a, RedisStore::nonce_digest("00fe"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_balance_keys_are_scoped() {
        let id = BalanceRecord::entry_id(4, "9fAbc");
        assert_eq!(RedisStore::balance_key(&id), "balance:4:9fAbc");
        assert_eq!(RedisStore::miner_balances_key("9fAbc"), "miner:9fAbc:balances");
        assert_eq!(RedisStore::window_balances_key(4), "window:4:balances");
    }

    fn count(haystack: &[u8], needle: &str) -> usize {
        haystack
            .windows(needle.len())
            .filter(|w| *w == needle.as_bytes())
            .count()
    }

    #[test]
    fn test_balance_insert_indexes_in_same_transaction() {
        let entry = BalanceRecord::pending("alice".into(), 4, 10);
        let packed = RedisStore::insert_balance_pipe(&entry, "{}".into()).get_packed_pipeline();

        assert_eq!(count(&packed, "MULTI"), 1);
        assert_eq!(count(&packed, "SETNX"), 1);
        assert_eq!(count(&packed, "SADD"), 2);
        assert_eq!(count(&packed, "EXEC"), 1);
        assert_eq!(count(&packed, "miner:alice:balances"), 1);
        assert_eq!(count(&packed, "window:4:balances"), 1);
    }

    #[test]
    fn test_withdrawal_is_one_transaction() {
        let mut a = BalanceRecord::pending("alice".into(), 1, 10);
        let mut b = BalanceRecord::pending("alice".into(), 2, 20);
        a.status = BalanceStatus::Withdrawn;
        b.status = BalanceStatus::Withdrawn;
        let withdrawal = WithdrawalRecord {
            id: uuid::Uuid::new_v4(),
            miner_address: "alice".into(),
            amount: 30,
            entries: vec![a.id.clone(), b.id.clone()],
            requested_at: chrono::Utc::now(),
        };

        let packed = RedisStore::withdrawal_pipe(&withdrawal, &[a, b])
            .unwrap()
            .get_packed_pipeline();
        assert_eq!(count(&packed, "MULTI"), 1);
        assert_eq!(count(&packed, "RPUSH"), 1);
        assert_eq!(count(&packed, "balance:1:alice"), 1);
        assert_eq!(count(&packed, "balance:2:alice"), 1);
        assert_eq!(count(&packed, "EXEC"), 1);
    }
}
