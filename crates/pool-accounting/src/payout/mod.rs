mod pplns;
mod pps;
mod prop;
pub mod split;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::database::{ShareRecord, ShareStatus, WindowRecord};
use crate::error::{PoolError, Result};

pub use pplns::Pplns;
pub use pps::Pps;
pub use prop::Prop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RewardAlgorithm {
    Prop,
    Pps,
    Pplns,
}

impl fmt::Display for RewardAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardAlgorithm::Prop => f.write_str("PROP"),
            RewardAlgorithm::Pps => f.write_str("PPS"),
            RewardAlgorithm::Pplns => f.write_str("PPLNS"),
        }
    }
}

impl FromStr for RewardAlgorithm {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROP" => Ok(RewardAlgorithm::Prop),
            "PPS" => Ok(RewardAlgorithm::Pps),
            "PPLNS" => Ok(RewardAlgorithm::Pplns),
            _ => Err(PoolError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// How much a single share weighs in a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareWeighting {
    #[default]
    Count,
    Difficulty,
}

impl FromStr for ShareWeighting {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(ShareWeighting::Count),
            "difficulty" => Ok(ShareWeighting::Difficulty),
            other => Err(PoolError::Configuration(format!(
                "unknown share weighting '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardParams {
    /// Reward for one found block, in atomic units.
    pub block_reward: u64,
    /// PPS payment per unit of share weight.
    pub pps_rate: u64,
    /// Number of trailing shares a PPLNS split covers.
    pub pplns_n: usize,
    pub weighting: ShareWeighting,
    /// Counts invalid shares in PROP/PPLNS denominators; their part is retained by the pool.
    pub penalize_invalid: bool,
    pub pool_fee_bps: u32,
    pub max_reward_per_miner: Option<u64>,
}

impl Default for RewardParams {
    fn default() -> Self {
        Self {
            block_reward: 0,
            pps_rate: 0,
            pplns_n: 1,
            weighting: ShareWeighting::Count,
            penalize_invalid: false,
            pool_fee_bps: 0,
            max_reward_per_miner: None,
        }
    }
}

impl RewardParams {
    pub fn weight(&self, share: &ShareRecord) -> u64 {
        match self.weighting {
            ShareWeighting::Count => 1,
            ShareWeighting::Difficulty => share.difficulty,
        }
    }

    /// Whether a share takes part in a proportional split at all, as payee or as penalty.
    pub fn counts_in_split(&self, share: &ShareRecord) -> bool {
        match share.status {
            ShareStatus::Valid => true,
            ShareStatus::Invalid => self.penalize_invalid,
            ShareStatus::Solved | ShareStatus::Repetitious => false,
        }
    }
}

/// A closed window together with its member shares in submission order.
#[derive(Debug, Clone)]
pub struct WindowShares {
    pub window: WindowRecord,
    pub shares: Vec<ShareRecord>,
}

/// Per-miner credits for one window plus whatever the pool keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardSplit {
    pub credits: BTreeMap<String, u64>,
    pub retained: u64,
}

impl RewardSplit {
    pub fn credited(&self) -> u64 {
        self.credits.values().sum()
    }
}

/// A reward-sharing policy.
pub trait RewardScheme: Send + Sync {
    fn algorithm(&self) -> RewardAlgorithm;

    /// `history` holds previously settled windows, newest first.
    fn compute(
        &self,
        window: &WindowShares,
        params: &RewardParams,
        history: &[WindowShares],
    ) -> Result<RewardSplit>;

    fn needs_history(&self) -> bool {
        false
    }
}

pub fn scheme_for(algorithm: RewardAlgorithm) -> Box<dyn RewardScheme> {
    match algorithm {
        RewardAlgorithm::Prop => Box::new(Prop),
        RewardAlgorithm::Pps => Box::new(Pps),
        RewardAlgorithm::Pplns => Box::new(Pplns),
    }
}

/// Computes the balance deltas for `window` under the named algorithm.
pub fn compute(
    window: &WindowShares,
    algorithm: &str,
    params: &RewardParams,
    history: &[WindowShares],
) -> Result<RewardSplit> {
    let algorithm: RewardAlgorithm = algorithm.parse()?;
    scheme_for(algorithm).compute(window, params, history)
}

/// The configured scheme and its parameters.
pub struct RewardEngine {
    scheme: Box<dyn RewardScheme>,
    params: RewardParams,
}

impl RewardEngine {
    pub fn new(algorithm: RewardAlgorithm, params: RewardParams) -> Self {
        Self {
            scheme: scheme_for(algorithm),
            params,
        }
    }

    pub fn algorithm(&self) -> RewardAlgorithm {
        self.scheme.algorithm()
    }

    pub fn params(&self) -> &RewardParams {
        &self.params
    }

    pub fn needs_history(&self) -> bool {
        self.scheme.needs_history()
    }

    pub fn compute(&self, window: &WindowShares, history: &[WindowShares]) -> Result<RewardSplit> {
        self.scheme.compute(window, &self.params, history)
    }
}

/// Share weight per miner, plus the weight of invalid shares when they are penalized.
#[derive(Debug, Default)]
struct Tally {
    miners: BTreeMap<String, u64>,
    penalty: u64,
}

impl Tally {
    fn collect<'a>(shares: impl IntoIterator<Item = &'a ShareRecord>, params: &RewardParams) -> Self {
        let mut tally = Tally::default();
        for share in shares {
            match share.status {
                ShareStatus::Valid => {
                    *tally.miners.entry(share.miner_address.clone()).or_insert(0) +=
                        params.weight(share)
                }
                ShareStatus::Invalid if params.penalize_invalid => {
                    tally.penalty += params.weight(share)
                }
                _ => {}
            }
        }
        tally
    }

    fn is_empty(&self) -> bool {
        self.miners.values().all(|w| *w == 0)
    }
}

/// Shared PROP/PPLNS tail: fee, proportional split, penalty bucket and per-miner cap.
fn distribute(window_id: u64, tally: Tally, params: &RewardParams) -> Result<RewardSplit> {
    if tally.is_empty() {
        return Err(PoolError::EmptyWindow(window_id));
    }

    if params.pool_fee_bps > 10_000 {
        return Err(PoolError::Configuration(format!(
            "pool fee of {} bps exceeds 100%",
            params.pool_fee_bps
        )));
    }
    let fee = (params.block_reward as u128 * params.pool_fee_bps as u128 / 10_000) as u64;
    let distributable = params.block_reward - fee;

    // `None` is the pool's bucket for penalized invalid shares
    let mut weights: Vec<(Option<String>, u64)> = tally
        .miners
        .into_iter()
        .map(|(miner, weight)| (Some(miner), weight))
        .collect();
    if tally.penalty > 0 {
        weights.push((None, tally.penalty));
    }

    let mut reward = RewardSplit {
        credits: BTreeMap::new(),
        retained: fee,
    };
    for (payee, amount) in split::largest_remainder(distributable, &weights) {
        match payee {
            Some(miner) if amount > 0 => {
                reward.credits.insert(miner, amount);
            }
            Some(_) => {}
            None => reward.retained += amount,
        }
    }

    if let Some(cap) = params.max_reward_per_miner {
        for amount in reward.credits.values_mut() {
            if *amount > cap {
                reward.retained += *amount - cap;
                *amount = cap;
            }
        }
    }

    Ok(reward)
}
