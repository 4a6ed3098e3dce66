//! Client configuration and environment loading.

use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;

/// Environment variable holding the API base URL.
pub const ENV_BASE_URL: &str = "AI_CHAT_BASE_URL";
/// Environment variable holding a bearer token to start the session with.
pub const ENV_TOKEN: &str = "AI_CHAT_TOKEN";
/// Environment variable holding the request timeout in whole seconds.
pub const ENV_TIMEOUT_SECS: &str = "AI_CHAT_TIMEOUT_SECS";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChatApiDefaults;

impl ChatApiDefaults {
    pub const BASE_URL: &'static str = "http://localhost:8080";
    pub const TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// How long the stream waits for the peer to acknowledge a close.
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);
    pub const PAGE: u32 = 1;
    pub const CONVERSATIONS_LIMIT: u32 = 20;
    pub const MESSAGES_LIMIT: u32 = 50;
}

/// Options used to build a [`crate::chat_api::ChatApiClient`].
#[derive(Clone, Debug)]
pub struct ChatApiClientOptions {
    /// Base URL every request path is appended to. Trailing `/` is ignored.
    pub base_url: String,
    /// Initial bearer token.
    pub token: Option<SecretString>,
    /// Total per-request timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ChatApiClientOptions {
    fn default() -> Self {
        Self {
            base_url: ChatApiDefaults::BASE_URL.to_string(),
            token: None,
            timeout: ChatApiDefaults::TIMEOUT,
            connect_timeout: ChatApiDefaults::CONNECT_TIMEOUT,
        }
    }
}

impl ChatApiClientOptions {
    /// Starts from the defaults and applies `AI_CHAT_BASE_URL`,
    /// `AI_CHAT_TOKEN` and `AI_CHAT_TIMEOUT_SECS` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(base_url) = non_empty(lookup(ENV_BASE_URL)) {
            options.base_url = base_url;
        }
        if let Some(token) = non_empty(lookup(ENV_TOKEN)) {
            options.token = Some(SecretString::new(token));
        }
        if let Some(raw) = non_empty(lookup(ENV_TIMEOUT_SECS)) {
            match raw.parse::<u64>() {
                Ok(secs) => options.timeout = Duration::from_secs(secs),
                Err(err) => warn!(
                    event = "config_invalid_timeout",
                    variable = ENV_TIMEOUT_SECS,
                    value = %raw,
                    error = %err
                ),
            }
        }

        options
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
