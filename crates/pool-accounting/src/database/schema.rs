use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PoolError, Result};

pub type ShareId = u64;
pub type WindowId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerRecord {
    pub address: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// Confirmed balance at which the threshold sweep pays this miner; the pool default when unset.
    #[serde(default)]
    pub withdraw_threshold: Option<u64>,
}

impl MinerRecord {
    pub fn new(address: String, label: String) -> Self {
        Self {
            address,
            label,
            created_at: Utc::now(),
            withdraw_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Valid,
    Invalid,
    Solved,
    Repetitious,
}

impl ShareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareStatus::Valid => "valid",
            ShareStatus::Invalid => "invalid",
            ShareStatus::Solved => "solved",
            ShareStatus::Repetitious => "repetitious",
        }
    }
}

impl fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareStatus {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(ShareStatus::Valid),
            "invalid" => Ok(ShareStatus::Invalid),
            "solved" => Ok(ShareStatus::Solved),
            "repetitious" => Ok(ShareStatus::Repetitious),
            other => Err(PoolError::InvalidShare(format!("unknown status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: ShareId,
    pub miner_address: String,
    /// Share hash as reported by the proxy. For a solved share this names the found block.
    pub share: String,
    pub nonce: String,
    pub status: ShareStatus,
    pub difficulty: u64,
    pub window_id: WindowId,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Open,
    PendingConfirmation,
    Settled,
    Voided,
}

impl WindowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WindowState::Settled | WindowState::Voided)
    }

    pub fn can_transition_to(&self, next: WindowState) -> bool {
        matches!(
            (self, next),
            (WindowState::Open, WindowState::PendingConfirmation)
                | (WindowState::PendingConfirmation, WindowState::Settled)
                | (WindowState::PendingConfirmation, WindowState::Voided)
        )
    }

    pub fn transition(self, next: WindowState) -> Result<WindowState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PoolError::IllegalTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub id: WindowId,
    /// Solved share that opened this window, `None` for the genesis window.
    pub start_share: Option<ShareId>,
    /// Solved share that closed this window.
    pub end_share: Option<ShareId>,
    pub block_ref: Option<String>,
    pub state: WindowState,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub credited: u64,
    pub retained: u64,
}

impl WindowRecord {
    pub fn open(id: WindowId, start_share: Option<ShareId>) -> Self {
        Self {
            id,
            start_share,
            end_share: None,
            block_ref: None,
            state: WindowState::Open,
            opened_at: Utc::now(),
            closed_at: None,
            finalized_at: None,
            credited: 0,
            retained: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceStatus {
    Pending,
    Confirmed,
    Withdrawn,
}

impl BalanceStatus {
    pub fn can_transition_to(&self, next: BalanceStatus) -> bool {
        matches!(
            (self, next),
            (BalanceStatus::Pending, BalanceStatus::Confirmed)
                | (BalanceStatus::Confirmed, BalanceStatus::Withdrawn)
        )
    }

    pub fn transition(self, next: BalanceStatus) -> Result<BalanceStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PoolError::IllegalTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub id: String,
    pub miner_address: String,
    pub window_id: WindowId,
    pub amount: u64,
    pub status: BalanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BalanceRecord {
    /// One credit per miner per window, so the id is derived from both.
    pub fn entry_id(window_id: WindowId, miner_address: &str) -> String {
        format!("{}:{}", window_id, miner_address)
    }

    pub fn pending(miner_address: String, window_id: WindowId, amount: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Self::entry_id(window_id, &miner_address),
            miner_address,
            window_id,
            amount,
            status: BalanceStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub id: Uuid,
    pub miner_address: String,
    pub amount: u64,
    pub entries: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTotals {
    pub pending: u64,
    pub confirmed: u64,
    pub withdrawn: u64,
}

impl BalanceTotals {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a BalanceRecord>) -> Self {
        let mut totals = Self::default();
        for entry in entries {
            match entry.status {
                BalanceStatus::Pending => totals.pending += entry.amount,
                BalanceStatus::Confirmed => totals.confirmed += entry.amount,
                BalanceStatus::Withdrawn => totals.withdrawn += entry.amount,
            }
        }
        totals
    }
}
