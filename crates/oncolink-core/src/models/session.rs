use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Anonymous unit of work bound to one access link.
///
/// Only the SHA-256 digest of the access token is kept; the token itself is shown once at
/// issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Session {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session is expired from the instant `expires_at` is reached.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Terminal sessions accept no further uploads; their data stays queryable until erased.
    pub fn is_terminal_at(&self, now: DateTime<Utc>) -> bool {
        self.used || self.is_expired_at(now)
    }
}

/// Plaintext access token. Redacted in `Debug` and `Display` so it never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token, for handing to the patient or reading from a header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Result of issuing an access link.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: AccessToken,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
