//! Provider configuration.
//!
//! Provider block attributes take precedence over the environment:
//!
//! | Setting | Attribute | Environment | Default |
//! |---|---|---|---|
//! | API URL | `api_url` | `CASTAI_API_URL` | `https://api.cast.ai` |
//! | API token | `api_token` | `CASTAI_API_TOKEN` | none, required |
//! | User agent suffix | | `TF_APPEND_USER_AGENT` | none |
//! | Request timeout | `request_timeout_seconds` | | 60 s |

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::attribute::{AttributePath, AttributeTree};
use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use crate::schema::{Attribute, Schema, Validator};

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "https://api.cast.ai";

/// Environment variable overriding the API URL.
pub const API_URL_ENV: &str = "CASTAI_API_URL";

/// Environment variable carrying the API token.
pub const API_TOKEN_ENV: &str = "CASTAI_API_TOKEN";

/// Environment variable appended to the user agent.
pub const USER_AGENT_SUFFIX_ENV: &str = "TF_APPEND_USER_AGENT";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API base URL
    pub api_url: String,
    /// API token
    pub api_token: SecretString,
    /// User agent sent with every request
    pub user_agent: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Backoff settings for the bounded retry loops
    pub retry: RetryConfig,
}

impl ProviderConfig {
    /// Schema of the provider block.
    #[must_use]
    pub fn schema() -> Schema {
        Schema::v0()
            .describe("CAST AI provider")
            .with_attribute(
                "api_url",
                Attribute::optional_string()
                    .describe("CAST AI API URL. Defaults to CASTAI_API_URL, then https://api.cast.ai"),
            )
            .with_attribute(
                "api_token",
                Attribute::optional_string()
                    .sensitive()
                    .describe("CAST AI API token. Defaults to CASTAI_API_TOKEN"),
            )
            .with_attribute(
                "request_timeout_seconds",
                Attribute::optional_int()
                    .validate(Validator::IntRange { min: 1, max: 3600 })
                    .describe("Timeout of a single API request in seconds"),
            )
    }

    /// Resolves the configuration from the environment only.
    ///
    /// # Errors
    ///
    /// See [`ProviderConfig::resolve`].
    pub fn from_env() -> Result<Self> {
        Self::resolve(&AttributeTree::new())
    }

    /// Resolves the configuration from provider attributes, falling back to
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns `MissingApiToken` when no token is configured, and
    /// `ConfigInvalid` for a malformed URL.
    pub fn resolve(attributes: &AttributeTree) -> Result<Self> {
        let api_url = attributes
            .get_non_empty_str("api_url")
            .map(str::to_string)
            .or_else(|| env_non_empty(API_URL_ENV))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let parsed = reqwest::Url::parse(&api_url).map_err(|e| {
            Error::config_invalid_at(AttributePath::attr("api_url"), format!("invalid API URL `{api_url}`: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config_invalid_at(
                AttributePath::attr("api_url"),
                format!("API URL `{api_url}` must use http or https"),
            ));
        }

        let api_token = attributes
            .get_non_empty_str("api_token")
            .map(str::to_string)
            .or_else(|| env_non_empty(API_TOKEN_ENV))
            .map(SecretString::from)
            .ok_or(Error::MissingApiToken)?;

        let request_timeout = attributes
            .get("request_timeout_seconds")
            .as_i64()
            .and_then(|secs| u64::try_from(secs).ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);

        Ok(Self {
            api_url,
            api_token,
            user_agent: user_agent(env_non_empty(USER_AGENT_SUFFIX_ENV).as_deref()),
            request_timeout,
            retry: RetryConfig::default(),
        })
    }

    /// Returns true when a token is configured.
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.api_token.expose_secret().is_empty()
    }
}

/// `castai-provider/<version>`, plus the host supplied suffix.
#[must_use]
pub fn user_agent(suffix: Option<&str>) -> String {
    let base = format!("castai-provider/{}", env!("CARGO_PKG_VERSION"));
    match suffix.map(str::trim).filter(|s| !s.is_empty()) {
        Some(suffix) => format!("{base} {suffix}"),
        None => base,
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
