use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Consumption state of an [`Entry`]. Only `Pending -> Consumed` is ever applied.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    Pending,
    Consumed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "PENDING",
            EntryState::Consumed => "CONSUMED",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EntryState::Pending),
            "CONSUMED" => Ok(EntryState::Consumed),
            other => Err(format!("unknown entry state '{other}'")),
        }
    }
}

/// Persisted record tracking whether a one-time token has been redeemed
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub token: String,
    pub state: EntryState,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds; an entry at or past this instant no longer validates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Entry {
    /// A fresh `PENDING` entry. `ttl_secs == 0` means the entry never expires.
    pub fn pending(token: impl Into<String>, created_at: i64, ttl_secs: u64) -> Self {
        let ttl_secs = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let expires_at = (ttl_secs > 0).then(|| created_at.saturating_add(ttl_secs));

        Self {
            token: token.into(),
            state: EntryState::Pending,
            created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether a consume attempt at `now` is allowed to flip this entry
    pub fn is_redeemable(&self, now: i64) -> bool {
        self.state == EntryState::Pending && !self.is_expired(now)
    }
}

/// Current wall-clock time in unix seconds
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
