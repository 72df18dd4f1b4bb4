#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pool_accounting::database::{MemoryStore, ShareRecord};
use pool_accounting::oracle::{BlockDepth, ChainOracle};
use pool_accounting::payout::RewardAlgorithm;
use pool_accounting::shares::ShareSubmission;
use pool_accounting::{PoolConfig, PoolCoordinator, PoolError, Result};

pub type TestCoordinator = PoolCoordinator<MemoryStore, ScriptedOracle>;

/// Oracle whose answers are set by the test. Unknown blocks sit at `default` depth.
pub struct ScriptedOracle {
    default: Mutex<BlockDepth>,
    blocks: Mutex<HashMap<String, BlockDepth>>,
    unavailable: AtomicBool,
}

impl ScriptedOracle {
    pub fn new(default: BlockDepth) -> Self {
        Self {
            default: Mutex::new(default),
            blocks: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_default(&self, depth: BlockDepth) {
        *self.default.lock().unwrap() = depth;
    }

    pub fn set(&self, block: &str, depth: BlockDepth) {
        self.blocks.lock().unwrap().insert(block.to_string(), depth);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainOracle for ScriptedOracle {
    async fn block_confirmation_depth(&self, block_ref: &str) -> Result<BlockDepth> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PoolError::OracleUnavailable("node offline".to_string()));
        }
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .get(block_ref)
            .copied()
            .unwrap_or(*self.default.lock().unwrap()))
    }
}

pub struct Harness {
    pub coordinator: Arc<TestCoordinator>,
    pub store: Arc<MemoryStore>,
    pub oracle: Arc<ScriptedOracle>,
}

/// Confirms every block on the first pass unless told otherwise.
pub fn config(algorithm: RewardAlgorithm) -> PoolConfig {
    PoolConfig {
        algorithm,
        block_reward: 100,
        pps_rate: 10,
        pplns_n: 4,
        confirmations_required: 10,
        ..Default::default()
    }
}

pub async fn harness(config: PoolConfig, miners: &[&str]) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new(BlockDepth::Confirmed(10)));
    let coordinator = Arc::new(PoolCoordinator::new(store.clone(), oracle.clone(), config).unwrap());

    for miner in miners {
        coordinator.register_miner(miner, miner).await.unwrap();
    }

    Harness {
        coordinator,
        store,
        oracle,
    }
}

impl Harness {
    pub async fn valid(&self, miner: &str, nonce: &str) -> ShareRecord {
        self.coordinator
            .submit_share(ShareSubmission::new(miner, &format!("h-{}", nonce), nonce, "valid"))
            .await
            .unwrap()
    }

    pub async fn invalid(&self, miner: &str, nonce: &str) -> ShareRecord {
        self.coordinator
            .submit_share(ShareSubmission::new(miner, &format!("h-{}", nonce), nonce, "invalid"))
            .await
            .unwrap()
    }

    /// Submits a solved share whose block reference is `block`.
    pub async fn solve(&self, miner: &str, nonce: &str, block: &str) -> ShareRecord {
        self.coordinator
            .submit_share(ShareSubmission::new(miner, block, nonce, "solved"))
            .await
            .unwrap()
    }

    pub async fn credits(&self, miner: &str) -> u64 {
        let totals = self.coordinator.balance_totals(miner).await.unwrap();
        totals.pending + totals.confirmed + totals.withdrawn
    }
}
