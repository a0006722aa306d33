//! Token handling for the realtime connection.
//!
//! The WebSocket authenticates with a bearer token passed as a query
//! parameter. Tokens expire, so the transport refreshes before each
//! connect; concurrent refresh calls are coalesced into one HTTP request.

use crate::error::{Result, VoxlinkError};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Source of bearer tokens for the realtime connection.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The last known access token, if any.
    fn current_token(&self) -> Option<String>;

    /// Obtain a fresh access token.
    ///
    /// Implementations must coalesce concurrent calls: a second caller
    /// arriving while a refresh is in flight awaits that refresh instead
    /// of issuing its own.
    async fn refresh(&self) -> Result<String>;
}

/// Fixed-token provider for tests and pre-issued tokens.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn current_token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    async fn refresh(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

type SharedRefresh = Shared<BoxFuture<'static, std::result::Result<String, String>>>;

/// Coalesces concurrent refresh attempts onto one in-flight future.
///
/// The error type is `String` because `Shared` requires `Clone` output;
/// callers map it back into the crate error.
pub(crate) struct Coalescer {
    inflight: tokio::sync::Mutex<Option<SharedRefresh>>,
}

impl Coalescer {
    pub(crate) fn new() -> Self {
        Self {
            inflight: tokio::sync::Mutex::new(None),
        }
    }

    /// Run `make()` unless a previous call is still in flight, in which
    /// case await that one's result instead.
    pub(crate) async fn run<F>(&self, make: F) -> std::result::Result<String, String>
    where
        F: FnOnce() -> BoxFuture<'static, std::result::Result<String, String>>,
    {
        let fut = {
            let mut inflight = self.inflight.lock().await;
            match inflight.as_ref() {
                Some(f) => f.clone(),
                None => {
                    let f = make().shared();
                    *inflight = Some(f.clone());
                    f
                }
            }
        };

        let result = fut.await;

        // Late arrivals already hold a clone; a fresh caller after this
        // point should trigger a new refresh.
        *self.inflight.lock().await = None;

        result
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Default)]
struct TokenCache {
    access: Option<String>,
    refresh: Option<String>,
}

/// Token provider backed by the REST auth endpoint.
pub struct HttpTokenProvider {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<Mutex<TokenCache>>,
    coalescer: Coalescer,
}

impl HttpTokenProvider {
    /// `base_url` is the REST API root, e.g. `https://api.example.com/v1`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, refresh_token: String) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cache: Arc::new(Mutex::new(TokenCache {
                access: None,
                refresh: Some(refresh_token),
            })),
            coalescer: Coalescer::new(),
        }
    }

    async fn do_refresh(
        client: reqwest::Client,
        base_url: String,
        cache: Arc<Mutex<TokenCache>>,
    ) -> std::result::Result<String, String> {
        let refresh_token = cache
            .lock()
            .map_err(|e| format!("token cache poisoned: {}", e))?
            .refresh
            .clone()
            .ok_or_else(|| "no refresh token available".to_string())?;

        let url = format!("{}/auth/refresh", base_url.trim_end_matches('/'));
        let response = client
            .post(&url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| format!("token refresh request failed: {}", e))?
            .error_for_status()
            .map_err(|e| format!("token refresh rejected: {}", e))?;

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed token refresh response: {}", e))?;

        if let Ok(mut cache) = cache.lock() {
            cache.access = Some(body.access_token.clone());
            if body.refresh_token.is_some() {
                cache.refresh = body.refresh_token;
            }
        }

        Ok(body.access_token)
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    fn current_token(&self) -> Option<String> {
        self.cache.lock().ok().and_then(|c| c.access.clone())
    }

    async fn refresh(&self) -> Result<String> {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let cache = Arc::clone(&self.cache);

        self.coalescer
            .run(move || Self::do_refresh(client, base_url, cache).boxed())
            .await
            .map_err(|message| VoxlinkError::Auth { message })
    }
}

#[derive(Debug, Deserialize)]
struct SettingsResponse {
    main_language: String,
}

/// Fetch the account's preferred language from the settings endpoint.
///
/// # Errors
/// Returns `Auth` on HTTP failure or a malformed response.
pub async fn fetch_main_language(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
) -> Result<String> {
    let url = format!("{}/settings", base_url.trim_end_matches('/'));
    let body: SettingsResponse = client
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| VoxlinkError::Auth {
            message: format!("settings request failed: {}", e),
        })?
        .error_for_status()
        .map_err(|e| VoxlinkError::Auth {
            message: format!("settings request rejected: {}", e),
        })?
        .json()
        .await
        .map_err(|e| VoxlinkError::Auth {
            message: format!("malformed settings response: {}", e),
        })?;

    Ok(body.main_language)
}

/// Source of server-side account settings, queried by the transport on
/// every connect so a language changed elsewhere is picked up on reconnect.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn main_language(&self, token: &str) -> Result<String>;
}

/// Settings provider backed by the REST settings endpoint.
pub struct HttpSettingsProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSettingsProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SettingsProvider for HttpSettingsProvider {
    async fn main_language(&self, token: &str) -> Result<String> {
        fetch_main_language(&self.client, &self.base_url, token).await
    }
}

#[derive(Debug, Serialize)]
struct PreviewRequest<'a> {
    text: &'a str,
    language: &'a str,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

/// Synthesize `text` with the given session voice settings and return the
/// audio payload. The caller hands it to a playback sink.
///
/// # Errors
/// Returns `Transport` on HTTP failure.
pub async fn fetch_voice_preview(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    config: &crate::transport::protocol::SessionConfig,
    text: &str,
) -> Result<Vec<u8>> {
    let url = format!("{}/voice/preview", base_url.trim_end_matches('/'));
    let request = PreviewRequest {
        text,
        language: &config.language,
        voice: &config.voice,
        role: config.role.as_deref(),
    };
    let bytes = client
        .post(&url)
        .bearer_auth(token)
        .json(&request)
        .send()
        .await
        .map_err(|e| VoxlinkError::Transport {
            message: format!("voice preview request failed: {}", e),
        })?
        .error_for_status()
        .map_err(|e| VoxlinkError::Transport {
            message: format!("voice preview rejected: {}", e),
        })?
        .bytes()
        .await
        .map_err(|e| VoxlinkError::Transport {
            message: format!("voice preview body read failed: {}", e),
        })?;

    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_static_provider_returns_its_token() {
        let provider = StaticTokenProvider::new("tok-123");
        assert_eq!(provider.current_token(), Some("tok-123".to_string()));
        assert_eq!(provider.refresh().await.unwrap(), "tok-123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalescer_runs_concurrent_callers_once() {
        let coalescer = Arc::new(Coalescer::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                coalescer
                    .run(move || {
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok("token".to_string())
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok("token".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coalescer_allows_new_run_after_completion() {
        let coalescer = Coalescer::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let result = coalescer
                .run(move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("t".to_string())
                    }
                    .boxed()
                })
                .await;
            assert!(result.is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_coalescer_propagates_errors() {
        let coalescer = Coalescer::new();
        let result = coalescer
            .run(|| async { Err("refresh rejected".to_string()) }.boxed())
            .await;
        assert_eq!(result, Err("refresh rejected".to_string()));
    }

    #[test]
    fn test_http_provider_starts_with_no_access_token() {
        let provider = HttpTokenProvider::new(
            reqwest::Client::new(),
            "https://api.example.com/v1/",
            "refresh-tok".to_string(),
        );
        assert_eq!(provider.current_token(), None);
    }
}
