//! Session token storage and single-flight refresh

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

use super::transport::TransportError;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Tokens {
    /// Build from a token endpoint response, stamping the expiry
    pub fn from_response(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs as i64)),
        }
    }
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// `/auth/login` and `/auth/refresh` response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
}

/// Token file on disk (`None` path keeps tokens in memory only)
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: Option<PathBuf>,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn load(&self) -> Result<Option<Tokens>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;
        let tokens = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
        Ok(Some(tokens))
    }

    pub fn save(&self, tokens: &Tokens) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(tokens)?)
            .with_context(|| format!("Failed to write session file: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("Failed to remove session file: {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// Current tokens plus a gate that lets one refresh run at a time
#[derive(Debug, Default)]
pub struct TokenCell {
    tokens: RwLock<Option<Tokens>>,
    refresh_gate: Mutex<()>,
}

impl TokenCell {
    pub fn new(tokens: Option<Tokens>) -> Self {
        Self {
            tokens: RwLock::new(tokens),
            refresh_gate: Mutex::new(()),
        }
    }

    pub async fn current(&self) -> Option<Tokens> {
        self.tokens.read().await.clone()
    }

    pub async fn set(&self, tokens: Option<Tokens>) {
        *self.tokens.write().await = tokens;
    }

    /// Replace the access token that was rejected as `stale_access`.
    ///
    /// Callers that arrive while a refresh is running wait for it and reuse
    /// its outcome instead of starting another. A refresh the token endpoint
    /// refuses clears the tokens and reports `SessionExpired`; network and
    /// server faults are passed through with the tokens kept.
    pub async fn refresh_with<F, Fut>(&self, stale_access: &str, refresh: F) -> Result<Tokens, TransportError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Tokens, TransportError>>,
    {
        let _gate = self.refresh_gate.lock().await;

        let refresh_token = match self.current().await {
            Some(current) if current.access_token != stale_access => return Ok(current),
            Some(current) => current.refresh_token,
            None => return Err(TransportError::SessionExpired),
        };

        match refresh(refresh_token).await {
            Ok(fresh) => {
                self.set(Some(fresh.clone())).await;
                Ok(fresh)
            }
            Err(TransportError::SessionExpired) => {
                tracing::warn!("Refresh token refused, session expired");
                self.set(None).await;
                Err(TransportError::SessionExpired)
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                Err(e)
            }
        }
    }
}
