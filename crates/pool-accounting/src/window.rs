use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::database::{ShareRecord, ShareStatus, Store, WindowRecord, WindowState};
use crate::error::{PoolError, Result};
use crate::metrics::{BLOCKS_FOUND, OPEN_WINDOW_ID};

/// Owns the single open accounting window.
///
/// All reads and mutations of the open window go through [`WindowManager::lock`],
/// so attaching a share and rotating the window can never interleave.
pub struct WindowManager<S: Store> {
    store: Arc<S>,
    open: Mutex<Option<WindowRecord>>,
}

impl<S: Store> WindowManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            open: Mutex::new(None),
        }
    }

    /// Takes the window lock, loading or creating the open window on first use.
    pub async fn lock(&self) -> Result<OpenWindow<'_, S>> {
        let mut slot = self.open.lock().await;
        let window = match slot.take() {
            Some(window) => window,
            None => self.load_or_create().await?,
        };

        Ok(OpenWindow {
            store: self.store.as_ref(),
            window: MutexGuard::map(slot, |slot| slot.insert(window)),
        })
    }

    pub async fn current_window(&self) -> Result<WindowRecord> {
        Ok(self.lock().await?.current().clone())
    }

    async fn load_or_create(&self) -> Result<WindowRecord> {
        let previous = match self.store.open_window_id().await? {
            Some(id) => self.store.get_window(id).await?,
            None => None,
        };

        if let Some(window) = previous.as_ref().filter(|w| w.state == WindowState::Open) {
            debug!("Resuming open window {}", window.id);
            OPEN_WINDOW_ID.set(window.id as i64);
            return Ok(window.clone());
        }

        let id = self.store.next_window_id().await?;
        let window = WindowRecord::open(id, previous.and_then(|w| w.end_share));
        self.store.save_window(&window).await?;
        OPEN_WINDOW_ID.set(id as i64);
        info!("Opened window {}", id);
        Ok(window)
    }
}

/// Exclusive handle on the open window. Dropping it releases the window lock.
pub struct OpenWindow<'a, S: Store> {
    store: &'a S,
    window: MappedMutexGuard<'a, WindowRecord>,
}

impl<S: Store> OpenWindow<'_, S> {
    pub fn current(&self) -> &WindowRecord {
        &self.window
    }

    /// Adds a non-solved share to the open window.
    ///
    /// Invalid and repetitious shares are attached too; the reward engine decides
    /// what they count for.
    pub async fn attach(&mut self, share: &ShareRecord) -> Result<()> {
        if share.status == ShareStatus::Solved {
            return Err(PoolError::InvalidShare(format!(
                "solved share {} must close the window",
                share.id
            )));
        }
        self.check_membership(share)?;

        self.store.append_window_share(self.window.id, share.id).await?;
        Ok(())
    }

    /// Closes the open window with `solved` as its end marker and opens the next one.
    ///
    /// Returns the closed window, now pending confirmation.
    pub async fn close(&mut self, solved: &ShareRecord) -> Result<WindowRecord> {
        if solved.status != ShareStatus::Solved {
            return Err(PoolError::InvalidShare(format!(
                "share {} is {}, only solved shares close a window",
                solved.id, solved.status
            )));
        }
        self.check_membership(solved)?;

        let mut closed = self.window.clone();
        closed.state = closed.state.transition(WindowState::PendingConfirmation)?;
        closed.end_share = Some(solved.id);
        closed.block_ref = Some(solved.share.clone());
        closed.closed_at = Some(Utc::now());

        let opened = WindowRecord::open(self.store.next_window_id().await?, Some(solved.id));

        self.store.append_window_share(closed.id, solved.id).await?;
        self.store.rotate_window(&closed, &opened).await?;
        *self.window = opened;

        BLOCKS_FOUND.inc();
        OPEN_WINDOW_ID.set(self.window.id as i64);
        info!(
            "Block {} found by {}: window {} closed, window {} opened",
            solved.share, solved.miner_address, closed.id, self.window.id
        );

        Ok(closed)
    }

    fn check_membership(&self, share: &ShareRecord) -> Result<()> {
        if share.window_id != self.window.id {
            return Err(PoolError::InvalidShare(format!(
                "share {} assigned to window {} but window {} is open",
                share.id, share.window_id, self.window.id
            )));
        }
        Ok(())
    }
}
