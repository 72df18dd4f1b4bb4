use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::types::ShareSubmission;
use crate::database::{MinerRecord, ShareRecord, ShareStatus, Store};
use crate::error::{PoolError, Result};
use crate::metrics::{SHARES_ACCEPTED, SHARES_REJECTED, SHARES_REPETITIOUS, SHARES_SUBMITTED};
use crate::window::{OpenWindow, WindowManager};

/// Checks incoming shares, flags duplicate nonces and hands the result to the window manager.
///
/// Nonces are deduplicated globally: a nonce that was ever accepted before turns
/// every later submission carrying it into a `repetitious` share.
pub struct ShareValidator<S: Store> {
    store: Arc<S>,
    windows: Arc<WindowManager<S>>,
    auto_register_miners: bool,
}

impl<S: Store> ShareValidator<S> {
    pub fn new(store: Arc<S>, windows: Arc<WindowManager<S>>, auto_register_miners: bool) -> Self {
        Self {
            store,
            windows,
            auto_register_miners,
        }
    }

    pub async fn submit(&self, mut submission: ShareSubmission) -> Result<ShareRecord> {
        SHARES_SUBMITTED.inc();
        submission.miner = normalize_address(&submission.miner);

        let claimed = match self.check(&submission).await {
            Ok(status) => status,
            Err(e) => {
                SHARES_REJECTED.inc();
                warn!("Rejected share from {}: {}", submission.miner, e);
                return Err(e);
            }
        };

        // Dedup, id assignment and window placement all happen under the window lock
        let mut window = self.windows.lock().await?;

        let fresh = self.store.record_nonce(&submission.nonce).await?;
        let status = if fresh {
            claimed
        } else {
            debug!(
                "Nonce {} from {} already seen, marking repetitious",
                submission.nonce, submission.miner
            );
            ShareStatus::Repetitious
        };
        let nonce = submission.nonce.clone();

        let placed = self.place(&mut window, submission, status).await;
        let share = match placed {
            Ok(share) => share,
            Err(e) => {
                // The share was never placed, so a retry must not see its nonce as taken
                if fresh {
                    if let Err(release) = self.store.forget_nonce(&nonce).await {
                        error!("Could not release nonce {}: {}", nonce, release);
                    }
                }
                SHARES_REJECTED.inc();
                return Err(e);
            }
        };

        SHARES_ACCEPTED.inc();
        if status == ShareStatus::Repetitious {
            SHARES_REPETITIOUS.inc();
        }

        Ok(share)
    }

    async fn place(
        &self,
        window: &mut OpenWindow<'_, S>,
        submission: ShareSubmission,
        status: ShareStatus,
    ) -> Result<ShareRecord> {
        let share = ShareRecord {
            id: self.store.next_share_id().await?,
            miner_address: submission.miner,
            share: submission.share,
            nonce: submission.nonce,
            status,
            difficulty: submission.difficulty,
            window_id: window.current().id,
            submitted_at: Utc::now(),
        };
        self.store.save_share(&share).await?;

        if status == ShareStatus::Solved {
            window.close(&share).await?;
        } else {
            window.attach(&share).await?;
        }
        Ok(share)
    }

    async fn check(&self, submission: &ShareSubmission) -> Result<ShareStatus> {
        if submission.nonce.trim().is_empty() {
            return Err(PoolError::InvalidShare("empty nonce".to_string()));
        }

        let status: ShareStatus = submission.status.parse()?;

        if status == ShareStatus::Solved && submission.share.trim().is_empty() {
            return Err(PoolError::InvalidShare(
                "solved share without block reference".to_string(),
            ));
        }

        if submission.difficulty == 0 {
            return Err(PoolError::InvalidShare("zero difficulty".to_string()));
        }

        self.resolve_miner(&submission.miner).await?;
        Ok(status)
    }

    async fn resolve_miner(&self, address: &str) -> Result<MinerRecord> {
        if let Some(miner) = self.store.get_miner(address).await? {
            return Ok(miner);
        }

        if !self.auto_register_miners || address.is_empty() {
            return Err(PoolError::InvalidMiner(address.to_string()));
        }

        let miner = MinerRecord::new(address.to_string(), String::new());
        self.store.save_miner(&miner).await?;
        info!("Registered miner {} on first share", address);
        Ok(miner)
    }
}

/// Miner addresses are compared trimmed and lowercased.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}
