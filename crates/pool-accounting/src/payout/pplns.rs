use super::{distribute, RewardAlgorithm, RewardParams, RewardScheme, RewardSplit, Tally, WindowShares};
use crate::error::Result;

/// Pay-per-last-N-shares.
///
/// Walks backwards from the closing solved share through the window and then
/// through `history` (newest first) until `pplns_n` counted shares are collected,
/// and splits the block reward over them. Near genesis the walk simply runs out
/// and the split covers whatever was found.
pub struct Pplns;

impl RewardScheme for Pplns {
    fn algorithm(&self) -> RewardAlgorithm {
        RewardAlgorithm::Pplns
    }

    fn compute(
        &self,
        window: &WindowShares,
        params: &RewardParams,
        history: &[WindowShares],
    ) -> Result<RewardSplit> {
        let trailing = window
            .shares
            .iter()
            .rev()
            .chain(history.iter().flat_map(|w| w.shares.iter().rev()))
            .filter(|share| params.counts_in_split(share))
            .take(params.pplns_n);

        let tally = Tally::collect(trailing, params);
        distribute(window.window.id, tally, params)
    }

    fn needs_history(&self) -> bool {
        true
    }
}
