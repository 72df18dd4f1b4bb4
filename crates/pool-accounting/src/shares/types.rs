use serde::{Deserialize, Serialize};

/// A share as forwarded by a miner's proxy, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSubmission {
    pub miner: String,
    /// Share hash. For a solved share this identifies the block that was found.
    #[serde(default)]
    pub share: String,
    pub nonce: String,
    /// Claimed status, one of `valid`, `invalid`, `solved` or `repetitious`.
    pub status: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u64,
}

fn default_difficulty() -> u64 {
    1
}

impl ShareSubmission {
    pub fn new(miner: &str, share: &str, nonce: &str, status: &str) -> Self {
        Self {
            miner: miner.to_string(),
            share: share.to_string(),
            nonce: nonce.to_string(),
            status: status.to_string(),
            difficulty: default_difficulty(),
        }
    }

    pub fn with_difficulty(mut self, difficulty: u64) -> Self {
        self.difficulty = difficulty;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_defaults_difficulty() {
        let json = r#"{"miner":"9fA","share":"ab12","nonce":"0001","status":"valid"}"#;
        let submission: ShareSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.difficulty, 1);
        assert_eq!(submission.status, "valid");
    }
}
