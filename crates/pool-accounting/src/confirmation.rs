use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::database::{Store, WindowId, WindowRecord, WindowState};
use crate::error::{PoolError, Result};
use crate::ledger::BalanceLedger;
use crate::metrics::{ORACLE_FAILURES, WINDOWS_SETTLED, WINDOWS_VOIDED};
use crate::oracle::{BlockDepth, ChainOracle};
use crate::payout::{RewardEngine, RewardSplit, WindowShares};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Settle,
    Void,
    Wait,
    /// The window was already settled or voided; nothing was done.
    AlreadyFinal,
}

/// Maps an oracle answer onto a settlement decision.
pub fn decide(depth: BlockDepth, confirmations_required: u64) -> Outcome {
    match depth {
        BlockDepth::Orphaned => Outcome::Void,
        BlockDepth::Confirmed(depth) if depth >= confirmations_required => Outcome::Settle,
        BlockDepth::Confirmed(_) => Outcome::Wait,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub settled: usize,
    pub voided: usize,
    /// Windows still pending confirmation after this pass.
    pub pending: usize,
}

/// Holds closed windows until their block is deep enough, then settles or voids them.
///
/// Evaluation is serialized and re-reads the window state under the lock, so a
/// window is settled at most once however often it is evaluated.
pub struct ConfirmationGate<S: Store, O: ChainOracle> {
    store: Arc<S>,
    oracle: Arc<O>,
    engine: RewardEngine,
    ledger: Arc<BalanceLedger<S>>,
    confirmations_required: u64,
    lock: Mutex<()>,
}

impl<S: Store, O: ChainOracle> ConfirmationGate<S, O> {
    pub fn new(
        store: Arc<S>,
        oracle: Arc<O>,
        engine: RewardEngine,
        ledger: Arc<BalanceLedger<S>>,
        confirmations_required: u64,
    ) -> Self {
        Self {
            store,
            oracle,
            engine,
            ledger,
            confirmations_required,
            lock: Mutex::new(()),
        }
    }

    pub async fn evaluate(&self, window_id: WindowId) -> Result<Outcome> {
        let _guard = self.lock.lock().await;

        let window = self
            .store
            .get_window(window_id)
            .await?
            .ok_or(PoolError::WindowNotFound(window_id))?;

        match window.state {
            WindowState::Settled | WindowState::Voided => {
                debug!("Window {} already {:?}", window_id, window.state);
                return Ok(Outcome::AlreadyFinal);
            }
            WindowState::Open => return Ok(Outcome::Wait),
            WindowState::PendingConfirmation => {}
        }

        let block_ref = window.block_ref.clone().ok_or_else(|| {
            PoolError::InvalidShare(format!("window {} closed without a block", window_id))
        })?;

        let depth = match self.oracle.block_confirmation_depth(&block_ref).await {
            Ok(depth) => depth,
            Err(e) => {
                ORACLE_FAILURES.inc();
                warn!("Could not check block {} of window {}: {}", block_ref, window_id, e);
                return Err(e);
            }
        };

        let outcome = decide(depth, self.confirmations_required);
        match outcome {
            Outcome::Settle => self.settle(window).await?,
            Outcome::Void => self.void(window).await?,
            Outcome::Wait => debug!(
                "Window {} waiting: block {} at {:?} of {}",
                window_id, block_ref, depth, self.confirmations_required
            ),
            Outcome::AlreadyFinal => {}
        }

        Ok(outcome)
    }

    /// Evaluates pending windows oldest first.
    ///
    /// A window that has to wait, or whose block cannot be checked, stops the pass
    /// so later windows never settle ahead of it.
    pub async fn poll(&self) -> Result<PollReport> {
        let pending: Vec<WindowId> = self
            .store
            .list_windows()
            .await?
            .into_iter()
            .filter(|w| w.state == WindowState::PendingConfirmation)
            .map(|w| w.id)
            .collect();

        let mut report = PollReport {
            pending: pending.len(),
            ..Default::default()
        };

        for id in pending {
            match self.evaluate(id).await {
                Ok(Outcome::Settle) => report.settled += 1,
                Ok(Outcome::Void) => report.voided += 1,
                Ok(Outcome::AlreadyFinal) => {}
                Ok(Outcome::Wait) => break,
                Err(PoolError::OracleUnavailable(_)) => break,
                Err(e) => return Err(e),
            }
            report.pending -= 1;
        }

        Ok(report)
    }

    async fn settle(&self, mut window: WindowRecord) -> Result<()> {
        let target = WindowShares {
            shares: self.store.window_shares(window.id).await?,
            window: window.clone(),
        };
        let history = if self.engine.needs_history() {
            self.history_before(window.id).await?
        } else {
            Vec::new()
        };

        let split = match self.engine.compute(&target, &history) {
            Ok(split) => split,
            Err(PoolError::EmptyWindow(id)) => {
                warn!("Window {} has no reward-eligible shares, settling without credits", id);
                RewardSplit::default()
            }
            Err(e) => return Err(e),
        };

        // Credits are keyed by window and miner, so a retry after a crash here is safe
        for (miner, amount) in &split.credits {
            let entry = self.ledger.credit(miner, *amount, window.id).await?;
            self.ledger.confirm(&entry.id).await?;
        }

        window.state = window.state.transition(WindowState::Settled)?;
        window.finalized_at = Some(Utc::now());
        window.credited = split.credited();
        window.retained = split.retained;
        self.store.save_window(&window).await?;

        WINDOWS_SETTLED.inc();
        info!(
            "Settled window {} under {}: {} credited to {} miners, {} retained",
            window.id,
            self.engine.algorithm(),
            window.credited,
            split.credits.len(),
            window.retained
        );
        Ok(())
    }

    async fn void(&self, mut window: WindowRecord) -> Result<()> {
        window.state = window.state.transition(WindowState::Voided)?;
        window.finalized_at = Some(Utc::now());
        self.store.save_window(&window).await?;

        WINDOWS_VOIDED.inc();
        info!(
            "Voided window {}: block {} orphaned",
            window.id,
            window.block_ref.as_deref().unwrap_or("?")
        );
        Ok(())
    }

    /// Settled windows before `window_id`, newest first, until enough shares are collected.
    async fn history_before(&self, window_id: WindowId) -> Result<Vec<WindowShares>> {
        let params = self.engine.params();
        let mut windows = self.store.list_windows().await?;
        windows.retain(|w| w.id < window_id && w.state == WindowState::Settled);
        windows.reverse();

        let mut history = Vec::new();
        let mut collected = 0usize;
        for window in windows {
            if collected >= params.pplns_n {
                break;
            }
            let shares = self.store.window_shares(window.id).await?;
            collected += shares.iter().filter(|s| params.counts_in_split(s)).count();
            history.push(WindowShares { window, shares });
        }

        Ok(history)
    }
}
