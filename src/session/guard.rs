//! Session guard: attaches the bearer token to every API call and
//! transparently refreshes it once when the server answers 401.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::config::{ApiSettings, Settings};

use super::tokens::{TokenCell, TokenResponse, TokenStore, Tokens};
use super::transport::{
    ApiRequest, ApiResponse, AuthorizedTransport, Method, RequestBody, TransportError,
};

pub struct SessionGuard {
    http: Client,
    base_url: String,
    tokens: TokenCell,
    store: TokenStore,
}

impl SessionGuard {
    pub fn new(api: &ApiSettings, store: TokenStore) -> anyhow::Result<Self> {
        let tokens = match env_tokens() {
            Some(tokens) => {
                tracing::debug!("Using session tokens from environment");
                Some(tokens)
            }
            None => store.load()?,
        };

        Ok(Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(api.timeout_secs.max(1)))
                .build()
                .context("Failed to build HTTP client")?,
            base_url: api.base_url.trim().trim_end_matches('/').to_string(),
            tokens: TokenCell::new(tokens),
            store,
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(&settings.api, TokenStore::new(settings.session_path()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn is_signed_in(&self) -> bool {
        self.tokens.current().await.is_some()
    }

    /// Exchange credentials for tokens and persist them
    pub async fn login(&self, email: &str, password: &str) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(network)?;

        // Rejected credentials come back as a status error with the server's detail
        let tokens: TokenResponse = into_api_response(response).await?.json()?;
        self.adopt(Tokens::from_response(tokens)).await;
        tracing::info!("Signed in as {}", email);
        Ok(())
    }

    /// Forget the session locally
    pub async fn logout(&self) -> anyhow::Result<()> {
        self.tokens.set(None).await;
        self.store.clear()
    }

    async fn adopt(&self, tokens: Tokens) {
        if let Err(e) = self.store.save(&tokens) {
            tracing::warn!("Could not persist session: {}", e);
        }
        self.tokens.set(Some(tokens)).await;
    }

    async fn refresh(&self, refresh_token: String) -> Result<Tokens, TransportError> {
        tracing::debug!("Refreshing access token");
        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(network)?;

        let tokens = read_refreshed(response).await?;
        if let Err(e) = self.store.save(&tokens) {
            tracing::warn!("Could not persist refreshed session: {}", e);
        }
        Ok(tokens)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: &ApiRequest, access_token: &str) -> Result<reqwest::Response, TransportError> {
        let url = self.url(&request.path);
        let builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        }
        .bearer_auth(access_token);

        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Upload(upload) => {
                let part = Part::bytes(upload.payload.to_vec())
                    .file_name(upload.file_name.clone())
                    .mime_str(&upload.mime)
                    .map_err(|e| TransportError::Decode(format!("invalid mime type: {}", e)))?;
                let form = upload
                    .fields
                    .iter()
                    .fold(Form::new().part(upload.field.clone(), part), |form, (k, v)| {
                        form.text(k.clone(), v.clone())
                    });
                builder.multipart(form)
            }
        };

        builder.send().await.map_err(network)
    }
}

#[async_trait]
impl AuthorizedTransport for SessionGuard {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let tokens = self
            .tokens
            .current()
            .await
            .ok_or(TransportError::SessionExpired)?;

        let mut response = self.send(&request, &tokens.access_token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let fresh = self
                .tokens
                .refresh_with(&tokens.access_token, |refresh_token| self.refresh(refresh_token))
                .await?;

            response = self.send(&request, &fresh.access_token).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                tracing::warn!("Request rejected after token refresh");
                self.tokens.set(None).await;
                return Err(TransportError::SessionExpired);
            }
        }

        into_api_response(response).await
    }
}

async fn into_api_response(response: reqwest::Response) -> Result<ApiResponse, TransportError> {
    let status = response.status();
    let body = response.bytes().await.map_err(network)?.to_vec();

    if status.is_success() {
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(TransportError::from_status(status.as_u16(), &body))
    }
}

async fn read_refreshed(response: reqwest::Response) -> Result<Tokens, TransportError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
        let body = response.bytes().await.map_err(network)?;
        tracing::debug!("Token endpoint refused: {}", TransportError::from_status(status.as_u16(), &body));
        return Err(TransportError::SessionExpired);
    }

    let response = into_api_response(response).await?;
    let tokens: TokenResponse = response.json()?;
    Ok(Tokens::from_response(tokens))
}

fn network(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Network(format!("request timed out: {}", err))
    } else {
        TransportError::Network(err.to_string())
    }
}

fn env_tokens() -> Option<Tokens> {
    let access = std::env::var("AVILINGO_ACCESS_TOKEN").ok()?;
    if access.trim().is_empty() {
        return None;
    }
    Some(Tokens {
        access_token: access.trim().to_string(),
        refresh_token: std::env::var("AVILINGO_REFRESH_TOKEN")
            .map(|t| t.trim().to_string())
            .unwrap_or_default(),
        expires_at: None,
    })
}
