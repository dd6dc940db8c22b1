//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use pt_vk::{ClientConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// `users.get` endpoint.
    pub api_url: String,
    /// VK access token; `users.get` also works without one for public profiles.
    pub access_token: Option<String>,
    pub api_version: String,
    /// Language of returned names.
    pub lang: String,
    /// Default seconds between polls for `pt track`.
    pub poll_interval_secs: u64,
    /// Attempts per acquisition before the tracker gives up.
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_version", &self.api_version)
            .field("lang", &self.lang)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            api_url: pt_vk::DEFAULT_API_URL.to_string(),
            access_token: None,
            api_version: pt_vk::DEFAULT_API_VERSION.to_string(),
            lang: pt_vk::DEFAULT_LANG.to_string(),
            poll_interval_secs: 5,
            max_attempts: retry.max_attempts,
            retry_delay_secs: retry.delay.as_secs(),
            request_timeout_secs: pt_vk::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // PT_ACCESS_TOKEN, PT_POLL_INTERVAL_SECS, ...
        figment = figment.merge(Env::prefixed("PT_"));

        figment.extract()
    }

    /// Settings for the VK client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_url: self.api_url.clone(),
            access_token: self.access_token.clone(),
            api_version: self.api_version.clone(),
            lang: self.lang.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                delay: Duration::from_secs(self.retry_delay_secs),
            },
        }
    }
}

/// Returns the platform-specific config directory for pt.
///
/// On Linux: `~/.config/pt`
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pt"))
}
