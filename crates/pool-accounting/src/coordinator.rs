use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::confirmation::{ConfirmationGate, Outcome, PollReport};
use crate::database::{
    BalanceTotals, MinerRecord, ShareRecord, ShareStatus, Store, WindowId, WindowRecord,
    WithdrawalRecord,
};
use crate::error::{PoolError, Result};
use crate::ledger::BalanceLedger;
use crate::oracle::ChainOracle;
use crate::payout::RewardEngine;
use crate::shares::{normalize_address, ShareSubmission, ShareValidator};
use crate::window::WindowManager;

pub struct PoolCoordinator<S: Store, O: ChainOracle> {
    store: Arc<S>,
    windows: Arc<WindowManager<S>>,
    share_validator: ShareValidator<S>,
    gate: ConfirmationGate<S, O>,
    ledger: Arc<BalanceLedger<S>>,
    config: PoolConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MinerRoundStats {
    pub valid_shares: u64,
    /// Invalid and repetitious shares.
    pub invalid_shares: u64,
    pub balances: BalanceTotals,
}

/// Share counts for the open window, pool-wide and per miner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundStats {
    pub window_id: WindowId,
    pub opened_at: DateTime<Utc>,
    pub valid_shares: u64,
    pub invalid_shares: u64,
    pub miners: BTreeMap<String, MinerRoundStats>,
}

impl<S: Store, O: ChainOracle> PoolCoordinator<S, O> {
    pub fn new(store: Arc<S>, oracle: Arc<O>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let windows = Arc::new(WindowManager::new(store.clone()));
        let ledger = Arc::new(BalanceLedger::new(store.clone()));
        let share_validator =
            ShareValidator::new(store.clone(), windows.clone(), config.auto_register_miners);
        let engine = RewardEngine::new(config.algorithm, config.reward_params());
        let gate = ConfirmationGate::new(
            store.clone(),
            oracle,
            engine,
            ledger.clone(),
            config.confirmations_required,
        );

        Ok(Self {
            store,
            windows,
            share_validator,
            gate,
            ledger,
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Creates a miner, or updates the label of an existing one.
    pub async fn register_miner(&self, address: &str, label: &str) -> Result<MinerRecord> {
        let address = normalize_address(address);
        if address.is_empty() {
            return Err(PoolError::InvalidMiner(address));
        }

        let miner = match self.store.get_miner(&address).await? {
            Some(mut miner) => {
                miner.label = label.to_string();
                miner
            }
            None => {
                info!("Registered miner {} as '{}'", address, label);
                MinerRecord::new(address, label.to_string())
            }
        };

        self.store.save_miner(&miner).await?;
        Ok(miner)
    }

    pub async fn get_miner(&self, address: &str) -> Result<MinerRecord> {
        let address = normalize_address(address);
        self.store
            .get_miner(&address)
            .await?
            .ok_or(PoolError::InvalidMiner(address))
    }

    /// Sets the confirmed balance at which the threshold sweep pays `address`.
    /// `None` falls back to the pool default.
    pub async fn set_withdraw_threshold(
        &self,
        address: &str,
        threshold: Option<u64>,
    ) -> Result<MinerRecord> {
        if let Some(threshold) = threshold {
            self.config.check_withdraw_threshold(threshold)?;
        }

        let mut miner = self.get_miner(address).await?;
        miner.withdraw_threshold = threshold;
        self.store.save_miner(&miner).await?;
        Ok(miner)
    }

    pub async fn submit_share(&self, submission: ShareSubmission) -> Result<ShareRecord> {
        let share = self.share_validator.submit(submission).await?;
        debug!(
            "Share {} from {} accepted as {} in window {}",
            share.id, share.miner_address, share.status, share.window_id
        );
        Ok(share)
    }

    pub async fn current_window(&self) -> Result<WindowRecord> {
        self.windows.current_window().await
    }

    pub async fn get_window(&self, id: WindowId) -> Result<WindowRecord> {
        self.store
            .get_window(id)
            .await?
            .ok_or(PoolError::WindowNotFound(id))
    }

    pub async fn evaluate_window(&self, id: WindowId) -> Result<Outcome> {
        self.gate.evaluate(id).await
    }

    /// One pass of the confirmation loop.
    pub async fn poll_confirmations(&self) -> Result<PollReport> {
        let report = self.gate.poll().await?;
        if report.settled > 0 || report.voided > 0 {
            info!(
                "Confirmation pass: {} settled, {} voided, {} pending",
                report.settled, report.voided, report.pending
            );
        }
        Ok(report)
    }

    pub async fn withdraw(&self, miner: &str) -> Result<WithdrawalRecord> {
        let miner = self.get_miner(miner).await?;
        self.ledger.withdraw(&miner.address).await
    }

    /// Withdraws for every miner whose confirmed balance reaches their threshold,
    /// or the pool default for miners without one.
    pub async fn withdraw_above_threshold(&self) -> Result<Vec<WithdrawalRecord>> {
        let mut withdrawals = Vec::new();

        for miner in self.store.list_miners().await? {
            let totals = self.ledger.totals(&miner.address).await?;
            let threshold = miner
                .withdraw_threshold
                .unwrap_or(self.config.withdraw_threshold);
            if totals.confirmed == 0 || totals.confirmed < threshold {
                continue;
            }

            match self.ledger.withdraw(&miner.address).await {
                Ok(withdrawal) => withdrawals.push(withdrawal),
                // Raced with another withdrawal for the same miner
                Err(PoolError::NoConfirmedBalance(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !withdrawals.is_empty() {
            info!("Threshold withdrawal for {} miners", withdrawals.len());
        }
        Ok(withdrawals)
    }

    pub async fn balance_totals(&self, miner: &str) -> Result<BalanceTotals> {
        self.ledger.totals(&normalize_address(miner)).await
    }

    /// Statistics for the open window, for all miners or just `miner`.
    pub async fn round_stats(&self, miner: Option<&str>) -> Result<RoundStats> {
        let window = self.windows.current_window().await?;
        let shares = self.store.window_shares(window.id).await?;

        let mut stats = RoundStats {
            window_id: window.id,
            opened_at: window.opened_at,
            valid_shares: 0,
            invalid_shares: 0,
            miners: BTreeMap::new(),
        };

        let miners = match miner {
            Some(address) => vec![self.get_miner(address).await?],
            None => self.store.list_miners().await?,
        };
        for miner in miners {
            let balances = self.ledger.totals(&miner.address).await?;
            stats.miners.insert(
                miner.address,
                MinerRoundStats {
                    balances,
                    ..Default::default()
                },
            );
        }

        for share in &shares {
            let (valid, invalid) = match share.status {
                ShareStatus::Valid => (1, 0),
                ShareStatus::Invalid | ShareStatus::Repetitious => (0, 1),
                ShareStatus::Solved => (0, 0),
            };
            stats.valid_shares += valid;
            stats.invalid_shares += invalid;

            if let Some(entry) = stats.miners.get_mut(&share.miner_address) {
                entry.valid_shares += valid;
                entry.invalid_shares += invalid;
            } else if miner.is_none() {
                warn!("Share {} references unregistered miner {}", share.id, share.miner_address);
            }
        }

        Ok(stats)
    }
}
