use std::collections::BTreeMap;

use super::{RewardAlgorithm, RewardParams, RewardScheme, RewardSplit, WindowShares};
use crate::database::ShareStatus;
use crate::error::{PoolError, Result};

/// Pay-per-share: a fixed rate per unit of valid share weight, regardless of the block reward.
pub struct Pps;

impl RewardScheme for Pps {
    fn algorithm(&self) -> RewardAlgorithm {
        RewardAlgorithm::Pps
    }

    fn compute(
        &self,
        window: &WindowShares,
        params: &RewardParams,
        _history: &[WindowShares],
    ) -> Result<RewardSplit> {
        let mut credits: BTreeMap<String, u64> = BTreeMap::new();
        for share in window.shares.iter().filter(|s| s.status == ShareStatus::Valid) {
            let pay = params.weight(share).saturating_mul(params.pps_rate);
            let entry = credits.entry(share.miner_address.clone()).or_insert(0);
            *entry = entry.saturating_add(pay);
        }

        if credits.is_empty() {
            return Err(PoolError::EmptyWindow(window.window.id));
        }
        credits.retain(|_, amount| *amount > 0);

        Ok(RewardSplit {
            credits,
            retained: 0,
        })
    }
}
