use super::{distribute, RewardAlgorithm, RewardParams, RewardScheme, RewardSplit, Tally, WindowShares};
use crate::error::Result;

/// Proportional: the block reward is split by valid share weight within the window.
pub struct Prop;

impl RewardScheme for Prop {
    fn algorithm(&self) -> RewardAlgorithm {
        RewardAlgorithm::Prop
    }

    fn compute(
        &self,
        window: &WindowShares,
        params: &RewardParams,
        _history: &[WindowShares],
    ) -> Result<RewardSplit> {
        let tally = Tally::collect(&window.shares, params);
        distribute(window.window.id, tally, params)
    }
}
