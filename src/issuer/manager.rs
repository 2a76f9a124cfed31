use crate::entry::{Entry, EntryStore, EntryStoreResolver, now_unix};
use crate::issuer::error::IssueError;
use crate::issuer::token::{generate_token, token_prefix};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Fresh tokens tried before giving up on key collisions
pub const MAX_COLLISION_ATTEMPTS: u32 = 3;

/// Ceiling for a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Exponential backoff for entry store writes on the issuance path
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuerSettings {
    /// Public address of the distribution, with or without scheme
    pub public_url: String,
    /// Object key every minted URL points at
    pub asset_path: String,
    /// 0 disables expiry
    pub token_ttl_secs: u64,
    pub retry: RetryPolicy,
}

/// A minted one-time URL
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IssuedUrl {
    pub url: String,
    pub token: String,
    pub expires_at: Option<i64>,
}

type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Mints tokens, registers them as pending entries and builds redemption URLs
#[derive(Clone)]
pub struct TokenIssuer {
    resolver: EntryStoreResolver,
    base_url: String,
    asset_path: String,
    token_ttl_secs: u64,
    retry: RetryPolicy,
    token_source: TokenSource,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("base_url", &self.base_url)
            .field("asset_path", &self.asset_path)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(resolver: EntryStoreResolver, settings: IssuerSettings) -> Self {
        let base_url = normalize_public_url(&settings.public_url);
        let asset_path = settings.asset_path.trim_start_matches('/').to_string();
        info!(%base_url, %asset_path, ttl_secs = settings.token_ttl_secs, "Token issuer ready");

        Self {
            resolver,
            base_url,
            asset_path,
            token_ttl_secs: settings.token_ttl_secs,
            retry: settings.retry,
            token_source: Arc::new(generate_token),
        }
    }

    /// Replace the random token generator
    pub fn with_token_source(mut self, source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.token_source = Arc::new(source);
        self
    }

    pub fn url_for(&self, token: &str) -> String {
        format!("{}/{}?token={token}", self.base_url, self.asset_path)
    }

    /// Mint a token, persist it as `PENDING` and return its URL
    pub async fn issue(&self) -> Result<IssuedUrl, IssueError> {
        let store = self
            .resolver
            .resolve()
            .await
            .map_err(IssueError::ConfigUnavailable)?;

        for attempt in 1..=MAX_COLLISION_ATTEMPTS {
            let entry = Entry::pending((self.token_source)(), now_unix(), self.token_ttl_secs);

            if self.create_with_retry(store.as_ref(), &entry).await? {
                debug!(
                    token = token_prefix(&entry.token),
                    attempt,
                    expires_at = ?entry.expires_at,
                    "Token issued"
                );
                return Ok(IssuedUrl {
                    url: self.url_for(&entry.token),
                    expires_at: entry.expires_at,
                    token: entry.token,
                });
            }

            warn!(attempt, "Token already registered, regenerating");
        }

        Err(IssueError::TokenCollision(MAX_COLLISION_ATTEMPTS))
    }

    async fn create_with_retry(
        &self,
        store: &dyn EntryStore,
        entry: &Entry,
    ) -> Result<bool, IssueError> {
        let mut retry = 0;
        loop {
            match store.create_if_absent(entry).await {
                Ok(created) => return Ok(created),
                Err(error) if retry < self.retry.max_retries => {
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        ?error,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "Failed to register token, backing off"
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(source) => {
                    return Err(IssueError::StorageUnavailable {
                        attempts: retry + 1,
                        source,
                    });
                }
            }
        }
    }
}

/// Trim trailing slashes and default a bare host to https
fn normalize_public_url(public_url: &str) -> String {
    let trimmed = public_url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
