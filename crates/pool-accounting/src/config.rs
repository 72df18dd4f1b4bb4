use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::payout::{RewardAlgorithm, RewardParams, ShareWeighting};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub pool_name: String,
    pub algorithm: RewardAlgorithm,
    /// Reward per found block, in atomic units.
    pub block_reward: u64,
    pub pps_rate: u64,
    pub pplns_n: usize,
    pub share_weighting: ShareWeighting,
    pub penalize_invalid: bool,
    pub pool_fee_bps: u32,
    pub max_reward_per_miner: Option<u64>,
    pub confirmations_required: u64,
    pub confirmation_poll_secs: u64,
    /// Default sweep threshold for miners without their own.
    pub withdraw_threshold: u64,
    /// Bounds for thresholds miners choose themselves.
    pub min_withdraw_threshold: u64,
    pub max_withdraw_threshold: u64,
    pub auto_register_miners: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "Mining Pool".to_string(),
            algorithm: RewardAlgorithm::Prop,
            block_reward: 67_500_000_000,
            pps_rate: 1_000_000,
            pplns_n: 1_000,
            share_weighting: ShareWeighting::Count,
            penalize_invalid: false,
            pool_fee_bps: 0,
            max_reward_per_miner: None,
            confirmations_required: 720,
            confirmation_poll_secs: 60,
            withdraw_threshold: 1_000_000_000,
            min_withdraw_threshold: 100_000_000,
            max_withdraw_threshold: 10_000_000_000_000,
            auto_register_miners: false,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pplns_n == 0 {
            return Err(PoolError::Configuration("pplns_n must be positive".to_string()));
        }
        if self.pool_fee_bps > 10_000 {
            return Err(PoolError::Configuration(format!(
                "pool fee of {} bps exceeds 100%",
                self.pool_fee_bps
            )));
        }
        if self.confirmation_poll_secs == 0 {
            return Err(PoolError::Configuration(
                "confirmation poll interval must be positive".to_string(),
            ));
        }
        if self.min_withdraw_threshold > self.max_withdraw_threshold {
            return Err(PoolError::Configuration(format!(
                "withdraw threshold bounds {}..{} are inverted",
                self.min_withdraw_threshold, self.max_withdraw_threshold
            )));
        }
        self.check_withdraw_threshold(self.withdraw_threshold)?;
        if self.max_reward_per_miner == Some(0) {
            return Err(PoolError::Configuration(
                "max reward per miner must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks a per-miner sweep threshold against the configured bounds.
    pub fn check_withdraw_threshold(&self, threshold: u64) -> Result<()> {
        if threshold < self.min_withdraw_threshold || threshold > self.max_withdraw_threshold {
            return Err(PoolError::Configuration(format!(
                "withdraw threshold {} must be between {} and {}",
                threshold, self.min_withdraw_threshold, self.max_withdraw_threshold
            )));
        }
        Ok(())
    }

    pub fn reward_params(&self) -> RewardParams {
        RewardParams {
            block_reward: self.block_reward,
            pps_rate: self.pps_rate,
            pplns_n: self.pplns_n,
            weighting: self.share_weighting,
            penalize_invalid: self.penalize_invalid,
            pool_fee_bps: self.pool_fee_bps,
            max_reward_per_miner: self.max_reward_per_miner,
        }
    }
}
