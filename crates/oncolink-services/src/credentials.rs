//! Single-use, time-limited access links.
//!
//! A link is a 256-bit random token, URL-safe base64 without padding. Only its SHA-256
//! digest is persisted. The `used` flag moves false to true exactly once, through a
//! conditional update in the session repository.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use oncolink_core::models::{AccessToken, IssuedCredential, Session};
use oncolink_core::{AppError, AppResult, RequestContext};
use oncolink_db::SessionRepository;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// Encoded token length: 32 bytes in unpadded base64.
pub const TOKEN_LEN: usize = 43;

#[derive(Clone)]
pub struct CredentialManager {
    sessions: Arc<dyn SessionRepository>,
    default_ttl: Duration,
}

impl CredentialManager {
    pub fn new(sessions: Arc<dyn SessionRepository>, default_ttl: Duration) -> Self {
        Self {
            sessions,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issue a new access link bound to a fresh session.
    ///
    /// `ttl` of `None` uses the configured default. A zero TTL yields a link that is already
    /// expired.
    #[tracing::instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        ttl: Option<Duration>,
    ) -> AppResult<IssuedCredential> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl < Duration::zero() {
            return Err(AppError::Validation(
                "Access link lifetime must not be negative".to_string(),
            ));
        }

        let token = generate_token();
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            token_hash: hash_token(token.expose()),
            expires_at: now + ttl,
            used: false,
            created_at: now,
        };

        ctx.run("issue_credential", self.sessions.insert_session(&session))
            .await?;

        tracing::info!(
            session_id = %session.id,
            expires_at = %session.expires_at,
            "Access link issued"
        );

        Ok(IssuedCredential {
            token,
            session_id: session.id,
            expires_at: session.expires_at,
        })
    }

    /// Resolve a token to its session for an upload.
    ///
    /// Expiry is checked before the used flag, so a link that is both expired and used
    /// reports `Expired`.
    #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id()))]
    pub async fn validate(&self, ctx: &RequestContext, token: &AccessToken) -> AppResult<Uuid> {
        let session = self.resolve(ctx, token).await?;

        if session.is_expired_at(Utc::now()) {
            tracing::debug!(session_id = %session.id, "Access link expired");
            return Err(AppError::Expired);
        }
        if session.used {
            tracing::debug!(session_id = %session.id, "Access link already used");
            return Err(AppError::AlreadyUsed);
        }

        Ok(session.id)
    }

    /// Mark the link used. Exactly one of any number of concurrent callers succeeds; the
    /// rest get `AlreadyUsed`.
    #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id()))]
    pub async fn invalidate(&self, ctx: &RequestContext, token: &AccessToken) -> AppResult<()> {
        if !is_well_formed(token.expose()) {
            return Err(AppError::NotFound("Access link".to_string()));
        }

        let hash = hash_token(token.expose());
        let transitioned = ctx
            .run("invalidate_credential", self.sessions.mark_used_if_unused(&hash))
            .await?;

        if !transitioned {
            return Err(AppError::AlreadyUsed);
        }

        tracing::info!("Access link invalidated");
        Ok(())
    }

    /// Look up the session behind a token without checking its state.
    ///
    /// Terminal sessions stay readable until erased.
    pub async fn resolve(&self, ctx: &RequestContext, token: &AccessToken) -> AppResult<Session> {
        // Malformed tokens cannot match a stored digest; skip the lookup.
        if !is_well_formed(token.expose()) {
            return Err(AppError::NotFound("Access link".to_string()));
        }

        let hash = hash_token(token.expose());
        ctx.run("resolve_credential", self.sessions.find_by_token_hash(&hash))
            .await?
            .ok_or_else(|| AppError::NotFound("Access link".to_string()))
    }
}

/// Hex-encoded SHA-256 of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> AccessToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    AccessToken::new(URL_SAFE_NO_PAD.encode(bytes))
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
