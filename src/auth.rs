//! Bearer sessions, login throttling and the authenticated-student extractor

use crate::error::TilawaError;
use crate::state::AppState;
use axum::{async_trait, extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use chrono::{DateTime, Duration, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Session {
    student_id: i64,
    expires_at: DateTime<Utc>,
}

/// In-memory bearer tokens. Sessions do not survive a restart.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn issue(&self, student_id: i64) -> Result<String, TilawaError> {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| TilawaError::Other("Session lifetime out of range".to_string()))?;
        let session = Session { student_id, expires_at };

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| TilawaError::Other("Failed to acquire session lock".to_string()))?;
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), session);
        Ok(token)
    }

    /// Student owning `token`, dropping it if expired
    pub fn resolve(&self, token: &str) -> Result<Option<i64>, TilawaError> {
        let session = {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| TilawaError::Other("Failed to acquire session lock".to_string()))?;
            sessions.get(token).cloned()
        };

        match session {
            Some(s) if s.expires_at > Utc::now() => Ok(Some(s.student_id)),
            Some(_) => {
                self.revoke(token)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn revoke(&self, token: &str) -> Result<bool, TilawaError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| TilawaError::Other("Failed to acquire session lock".to_string()))?;
        Ok(sessions.remove(token).is_some())
    }
}

/// Tracked emails above which idle limiter entries are pruned
const PRUNE_THRESHOLD: usize = 1024;

/// Per-email login attempt limit
pub struct LoginThrottle {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl LoginThrottle {
    pub fn per_minute(attempts: u32) -> Self {
        let attempts = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(attempts)),
        }
    }

    pub fn check(&self, email: &str) -> Result<(), TilawaError> {
        if self.limiter.len() > PRUNE_THRESHOLD {
            self.prune();
        }
        self.limiter
            .check_key(&email.trim().to_lowercase())
            .map_err(|_| TilawaError::RateLimited)
    }

    /// Forget emails whose quota has fully replenished. Returns how many are still tracked.
    pub fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let remaining = self.limiter.len();
        debug!(remaining, "Pruned login throttle");
        remaining
    }
}

/// Student resolved from an `Authorization: Bearer <token>` header
#[derive(Debug, Clone)]
pub struct AuthenticatedStudent {
    pub student_id: i64,
    pub token: String,
}

pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedStudent {
    type Rejection = TilawaError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(TilawaError::Unauthorized)?;
        let student_id = state.sessions.resolve(token)?.ok_or(TilawaError::Unauthorized)?;
        Ok(Self {
            student_id,
            token: token.to_string(),
        })
    }
}
