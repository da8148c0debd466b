use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// One authenticated login.
///
/// `expires_at` is the identity token expiry as decimal epoch seconds. It is
/// compared as a string against the current time in the same encoding, never
/// parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub owner: String,
    pub identity_token: String,
    #[serde(default)]
    pub previous_identity_token: String,
    #[serde(default)]
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_at: String,
    pub created_epoch: i64,
    pub expiry_epoch: i64,
    #[serde(default)]
    pub refresh_count: i64,
    #[serde(default)]
    pub is_revoked: bool,
    #[serde(default)]
    pub details: String,
}

impl Session {
    /// The live partition this session belongs to at `now` (epoch seconds as a string).
    #[must_use]
    pub fn classify(&self, now: &str) -> Partition {
        if self.is_revoked {
            Partition::Revoked
        } else if self.expires_at.as_str() > now {
            Partition::Active
        } else {
            Partition::Expired
        }
    }

    /// True when the session outlived its maximum length. A zero `expiry_epoch`
    /// means the session has no hard limit.
    #[must_use]
    pub const fn is_past_max_length(&self, now_unix: i64) -> bool {
        self.expiry_epoch != 0 && self.expiry_epoch < now_unix
    }
}

/// Session fields safe to hand back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub owner: String,
    pub expires_at: String,
    pub created_epoch: i64,
    pub expiry_epoch: i64,
    pub refresh_count: i64,
    pub is_revoked: bool,
    pub details: String,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            owner: session.owner.clone(),
            expires_at: session.expires_at.clone(),
            created_epoch: session.created_epoch,
            expiry_epoch: session.expiry_epoch,
            refresh_count: session.refresh_count,
            is_revoked: session.is_revoked,
            details: session.details.clone(),
        }
    }
}

/// Named session bucket. `All` is a superset; every session sits in exactly
/// one of the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    All,
    Active,
    Expired,
    Revoked,
}

impl Partition {
    pub const EVERY: [Self; 4] = [Self::All, Self::Active, Self::Expired, Self::Revoked];
    pub const LIVE: [Self; 3] = [Self::Active, Self::Expired, Self::Revoked];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown session partition: {0}")]
pub struct ParsePartitionError(pub String);

impl FromStr for Partition {
    type Err = ParsePartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            other => Err(ParsePartitionError(other.to_string())),
        }
    }
}
