//! Cloud session lifecycle: sign-in, rotating refresh, expiry tracking.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use tokio::sync::{Mutex, RwLock};

use crate::cloud::{ApplianceApi, SessionTokens};

/// One authenticated cloud session.
///
/// Access and refresh tokens are always replaced together; a session with
/// only one of them never exists.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<SystemTime>,
    pub regional_base_url: String,
}

impl Session {
    fn from_tokens(tokens: SessionTokens, now: SystemTime, fallback_base_url: &str) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Some(now + Duration::from_secs(tokens.expires_in)),
            regional_base_url: tokens
                .regional_base_url
                .unwrap_or_else(|| fallback_base_url.to_string()),
        }
    }
}

/// Snapshot of the credentials a data call needs.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub access_token: String,
    pub base_url: String,
}

/// Owned credential state with single-writer mutation.
///
/// The refresh token rotates on every exchange, so the store overwrites the
/// whole session atomically and serializes exchanges behind one mutex: two
/// concurrent refresh attempts must never submit the same token.
pub struct TokenStore {
    cloud: Arc<dyn ApplianceApi>,
    fallback_base_url: String,
    session: RwLock<Option<Session>>,
    // Single-flight guard for sign-in/refresh exchanges.
    exchange: Mutex<()>,
}

impl TokenStore {
    pub fn new(cloud: Arc<dyn ApplianceApi>, fallback_base_url: impl Into<String>) -> Self {
        Self {
            cloud,
            fallback_base_url: fallback_base_url.into(),
            session: RwLock::new(None),
            exchange: Mutex::new(()),
        }
    }

    /// Startup path: a pre-supplied refresh token skips the sign-in flow.
    pub async fn bootstrap(&self, seed_refresh_token: Option<&str>) -> Result<()> {
        match seed_refresh_token {
            Some(token) if !token.is_empty() => {
                let _flight = self.exchange.lock().await;
                let tokens = self
                    .cloud
                    .refresh(token)
                    .await
                    .context("seed token exchange")?;
                self.commit(tokens).await;
                Ok(())
            }
            _ => self.sign_in().await,
        }
    }

    /// Obtains a fresh session via the authorization exchange.
    ///
    /// No partial state is committed on failure.
    pub async fn sign_in(&self) -> Result<()> {
        let _flight = self.exchange.lock().await;
        let tokens = self.cloud.sign_in().await.context("cloud sign-in")?;
        self.commit(tokens).await;
        Ok(())
    }

    /// Exchanges the current refresh token for a new session.
    ///
    /// No-op without a session. On failure the prior session is left
    /// unchanged and the error propagates. The token to submit is read only
    /// after the flight lock is held, so a concurrent exchange that already
    /// rotated it is observed, not raced.
    pub async fn refresh(&self) -> Result<()> {
        let _flight = self.exchange.lock().await;
        let Some(refresh_token) = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
        else {
            return Ok(());
        };

        let tokens = self
            .cloud
            .refresh(&refresh_token)
            .await
            .context("token refresh")?;
        self.commit(tokens).await;
        Ok(())
    }

    /// True when there is no session, no known expiry, or `now` has reached
    /// the expiry instant.
    pub async fn is_expired(&self, now: SystemTime) -> bool {
        match self.session.read().await.as_ref() {
            Some(session) => session.expires_at.is_none_or(|at| now >= at),
            None => true,
        }
    }

    /// Credentials snapshot for a data call, if a session exists.
    pub async fn authorization(&self) -> Option<Authorization> {
        self.session.read().await.as_ref().map(|s| Authorization {
            access_token: s.access_token.clone(),
            base_url: s.regional_base_url.clone(),
        })
    }

    async fn commit(&self, tokens: SessionTokens) {
        let session = Session::from_tokens(tokens, SystemTime::now(), &self.fallback_base_url);
        *self.session.write().await = Some(session);
    }

    #[cfg(test)]
    pub async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }
}
