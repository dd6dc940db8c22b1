//! VK API integration for the presence tracker.
//!
//! Provides a [`Client`] for the `users.get` method that implements
//! [`pt_core::SnapshotSource`], including the retry policy the live tracker
//! relies on.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pt_core::{
    LastSeen, Platform, PresenceSnapshot, SnapshotSource, SourceError, UserField, UserId,
    UserProfile,
};
use serde::Deserialize;
use thiserror::Error;

/// Default request timeout for API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_API_URL: &str = "https://api.vk.com/method/users.get";
pub const DEFAULT_API_VERSION: &str = "5.199";
pub const DEFAULT_LANG: &str = "en";

/// VK error codes worth retrying: too many requests, flood control, internal error.
const RETRYABLE_API_CODES: &[i64] = &[6, 9, 10];

/// VK client errors.
#[derive(Debug, Error)]
pub enum VkError {
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    /// API returned an error object.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl VkError {
    /// Transport failures, server errors and rate limiting are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Api { code, .. } => RETRYABLE_API_CODES.contains(code),
            Self::ClientBuild(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// How often and how patiently a failed acquisition is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Client settings.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub access_token: Option<String>,
    pub api_version: String,
    pub lang: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            lang: DEFAULT_LANG.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("api_version", &self.api_version)
            .field("lang", &self.lang)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// VK API client.
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new client.
    ///
    /// A blank access token is treated as absent.
    pub fn new(mut config: ClientConfig) -> Result<Self, VkError> {
        config.access_token = config
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        config.retry.max_attempts = config.retry.max_attempts.max(1);

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(VkError::ClientBuild)?;

        Ok(Self { http, config })
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        self.config.retry
    }

    /// Calls `users.get` once, without retrying.
    pub async fn users_get(
        &self,
        user_ids: &[UserId],
        fields: &[UserField],
    ) -> Result<Vec<PresenceSnapshot>, VkError> {
        let user_ids = user_ids
            .iter()
            .map(UserId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let fields = fields
            .iter()
            .filter(|field| **field != UserField::Id)
            .map(UserField::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut query = vec![
            ("user_ids", user_ids.as_str()),
            ("fields", fields.as_str()),
            ("lang", self.config.lang.as_str()),
            ("v", self.config.api_version.as_str()),
        ];
        if let Some(token) = self.config.access_token.as_deref() {
            query.push(("access_token", token));
        }

        let response = self
            .http
            .get(&self.config.api_url)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_users_response(&body, Utc::now())
    }
}

impl SnapshotSource for Client {
    async fn fetch(
        &self,
        user_ids: &[UserId],
        fields: &[UserField],
    ) -> Result<Vec<PresenceSnapshot>, SourceError> {
        let policy = self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.users_get(user_ids, fields).await {
                Ok(snapshots) => return Ok(snapshots),
                Err(err) => err,
            };

            if matches!(err, VkError::InvalidResponse(_)) {
                return Err(SourceError::Malformed(err.to_string()));
            }
            if !err.is_retryable() || attempt >= policy.max_attempts {
                return Err(SourceError::Unavailable {
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }

            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts,
                error = %err,
                "users.get failed, retrying"
            );
            tokio::time::sleep(policy.delay).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: Option<Vec<ApiUser>>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_code: i64,
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    #[serde(alias = "uid")]
    id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    screen_name: Option<String>,
    /// Deactivated users carry no flag.
    #[serde(default)]
    online: u8,
    last_seen: Option<ApiLastSeen>,
}

#[derive(Debug, Deserialize)]
struct ApiLastSeen {
    time: i64,
    platform: Option<u64>,
}

fn parse_last_seen(raw: &ApiLastSeen) -> Result<LastSeen, VkError> {
    let time = DateTime::from_timestamp(raw.time, 0)
        .ok_or_else(|| VkError::InvalidResponse(format!("invalid last_seen time: {}", raw.time)))?;
    let platform = raw.platform.and_then(|code| {
        let platform = Platform::from_code(code);
        if platform.is_none() {
            tracing::debug!(code, "unknown last_seen platform");
        }
        platform
    });
    Ok(LastSeen { time, platform })
}

/// Parses a `users.get` body into snapshots stamped with `observed_at`.
pub fn parse_users_response(
    body: &str,
    observed_at: DateTime<Utc>,
) -> Result<Vec<PresenceSnapshot>, VkError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|err| VkError::InvalidResponse(err.to_string()))?;

    if let Some(error) = envelope.error {
        return Err(VkError::Api {
            code: error.error_code,
            message: error.error_msg,
        });
    }
    let users = envelope
        .response
        .ok_or_else(|| VkError::InvalidResponse("missing response field".to_string()))?;

    users
        .into_iter()
        .map(|user| {
            let user_id = UserId::new(user.id.to_string())
                .map_err(|err| VkError::InvalidResponse(err.to_string()))?;
            let mut snapshot = PresenceSnapshot::new(user_id, observed_at, user.online != 0)
                .with_profile(UserProfile {
                    first_name: user.first_name,
                    last_name: user.last_name,
                    screen_name: user.screen_name,
                });
            if let Some(raw) = &user.last_seen {
                snapshot = snapshot.with_last_seen(parse_last_seen(raw)?);
            }
            Ok(snapshot)
        })
        .collect()
}
