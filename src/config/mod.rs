//! Configuration for the streaming client.
//!
//! Provides the endpoint, credentials, provider profile and framing rules
//! used to open and decode a stream.

use secrecy::{ExposeSecret, SecretString};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::cache::CacheKey;
use crate::errors::{StreamError, StreamResult};
use crate::streaming::{Framing, ProviderKind, TrailingLinePolicy};

/// Default request timeout (60 seconds), applied to connecting and headers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum retry attempts when opening a stream.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default event prefix for Server-Sent-Events framing.
pub const DEFAULT_EVENT_PREFIX: &str = "data:";

/// Default terminal sentinel.
pub const DEFAULT_DONE_SENTINEL: &str = "[DONE]";

/// Default upper bound for a single line (1 MiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Default capacity of the token channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Rules for turning the response body into payload lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramingConfig {
    /// How lines are framed on the wire.
    pub framing: Framing,
    /// Payload that signals the end of the stream, checked before JSON parsing.
    pub done_sentinel: Option<String>,
    /// What to do with an unterminated line at end of stream.
    pub trailing_line: TrailingLinePolicy,
    /// Maximum bytes buffered for one line.
    pub max_line_length: usize,
}

impl FramingConfig {
    /// `data:`-prefixed Server-Sent-Events terminated by `[DONE]`.
    pub fn sse() -> Self {
        Self {
            framing: Framing::Sse {
                prefix: DEFAULT_EVENT_PREFIX.to_string(),
            },
            done_sentinel: Some(DEFAULT_DONE_SENTINEL.to_string()),
            trailing_line: TrailingLinePolicy::Discard,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Newline-delimited JSON without a sentinel.
    pub fn ndjson() -> Self {
        Self {
            framing: Framing::Ndjson,
            done_sentinel: None,
            trailing_line: TrailingLinePolicy::Discard,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// The whole body is a single payload.
    pub fn whole() -> Self {
        Self {
            framing: Framing::Whole,
            done_sentinel: None,
            trailing_line: TrailingLinePolicy::Emit,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Binary AWS event-stream messages without a sentinel.
    ///
    /// `max_line_length` bounds the size of one message.
    pub fn event_stream() -> Self {
        Self {
            framing: Framing::EventStream,
            done_sentinel: None,
            trailing_line: TrailingLinePolicy::Discard,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Framing used by a provider profile.
    pub fn for_provider(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::Ollama => Self::ndjson(),
            ProviderKind::Bedrock => Self::event_stream(),
            _ => Self::sse(),
        }
    }

    /// Sets the trailing line policy.
    pub fn with_trailing_line(mut self, policy: TrailingLinePolicy) -> Self {
        self.trailing_line = policy;
        self
    }

    /// Sets the maximum line length.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Sets the terminal sentinel.
    pub fn with_done_sentinel(mut self, sentinel: Option<String>) -> Self {
        self.done_sentinel = sentinel;
        self
    }

    fn validate(&self) -> StreamResult<()> {
        if self.max_line_length == 0 {
            return Err(StreamError::configuration(
                "max_line_length must be greater than zero",
            ));
        }
        if let Framing::Sse { prefix } = &self.framing {
            if prefix.is_empty() {
                return Err(StreamError::configuration("event prefix cannot be empty"));
            }
        }
        Ok(())
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self::sse()
    }
}

/// Configuration for the streaming client.
#[derive(Clone)]
pub struct StreamConfig {
    /// API key sent as a bearer token (stored securely).
    pub(crate) api_key: Option<SecretString>,
    /// Base URL for API requests.
    pub base_url: String,
    /// Connect and response-header timeout.
    pub timeout: Duration,
    /// Maximum retry attempts for opening a stream.
    pub max_retries: u32,
    /// Custom headers to include in every request.
    pub custom_headers: Vec<(String, String)>,
    /// Provider profile used to pick the event mapper.
    pub provider: ProviderKind,
    /// Framing rules.
    pub framing: FramingConfig,
    /// Capacity of the token channel handed to callers.
    pub channel_capacity: usize,
}

impl StreamConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LLM_STREAM_BASE_URL` (required): provider base URL
    /// - `LLM_STREAM_API_KEY` (optional): bearer token
    /// - `LLM_STREAM_PROVIDER` (optional): `generic`, `ollama`, `tongyi`,
    ///   `openai` or `workers-ai`
    /// - `LLM_STREAM_TIMEOUT` (optional): timeout in seconds
    /// - `LLM_STREAM_MAX_RETRIES` (optional): maximum retry attempts
    pub fn from_env() -> StreamResult<Self> {
        let base_url = std::env::var("LLM_STREAM_BASE_URL").map_err(|_| {
            StreamError::configuration("LLM_STREAM_BASE_URL environment variable not set")
        })?;

        let mut builder = StreamConfigBuilder::new().base_url(base_url);

        if let Ok(api_key) = std::env::var("LLM_STREAM_API_KEY") {
            builder = builder.api_key(api_key);
        }

        if let Ok(provider) = std::env::var("LLM_STREAM_PROVIDER") {
            builder = builder.provider(provider.parse()?);
        }

        if let Ok(timeout_str) = std::env::var("LLM_STREAM_TIMEOUT") {
            if let Ok(timeout_secs) = timeout_str.parse::<u64>() {
                builder = builder.timeout(Duration::from_secs(timeout_secs));
            }
        }

        if let Ok(retries_str) = std::env::var("LLM_STREAM_MAX_RETRIES") {
            if let Ok(retries) = retries_str.parse::<u32>() {
                builder = builder.max_retries(retries);
            }
        }

        builder.build()
    }

    /// Returns the API key (exposing the secret).
    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret().as_str())
    }

    /// Returns true if an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Returns the key identifying this configuration in a
    /// [`ClientCache`](crate::cache::ClientCache).
    ///
    /// The API key contributes only a fingerprint.
    pub fn cache_key(&self) -> StreamResult<CacheKey> {
        let mut headers = self.custom_headers.clone();
        headers.sort();

        CacheKey::canonical(&serde_json::json!({
            "base_url": self.base_url,
            "api_key": self.api_key().map(fingerprint),
            "timeout_ms": self.timeout.as_millis() as u64,
            "max_retries": self.max_retries,
            "headers": headers,
            "provider": self.provider.as_str(),
            "framing": format!("{:?}", self.framing),
            "channel_capacity": self.channel_capacity,
        }))
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("provider", &self.provider)
            .field("framing", &self.framing)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

/// Builder for `StreamConfig`.
#[derive(Default)]
pub struct StreamConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    custom_headers: Vec<(String, String)>,
    provider: Option<ProviderKind>,
    framing: Option<FramingConfig>,
    channel_capacity: Option<usize>,
}

impl StreamConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the maximum retry attempts.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the provider profile.
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Overrides the framing rules implied by the provider.
    pub fn framing(mut self, framing: FramingConfig) -> Self {
        self.framing = Some(framing);
        self
    }

    /// Sets the token channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> StreamResult<StreamConfig> {
        let base_url = self
            .base_url
            .ok_or_else(|| StreamError::configuration("Base URL is required"))?
            .trim_end_matches('/')
            .to_string();

        let parsed = url::Url::parse(&base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StreamError::configuration(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }
        if parsed.scheme() == "http" && !is_loopback(&parsed) {
            tracing::warn!(base_url = %base_url, "Streaming over plain HTTP to a remote host");
        }

        let api_key = match self.api_key {
            Some(key) if key.is_empty() => {
                return Err(StreamError::configuration("API key cannot be empty"));
            }
            Some(key) => Some(SecretString::new(key)),
            None => None,
        };

        let provider = self.provider.unwrap_or_default();
        let framing = self
            .framing
            .unwrap_or_else(|| FramingConfig::for_provider(provider));
        framing.validate()?;

        let channel_capacity = self.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        if channel_capacity == 0 {
            return Err(StreamError::configuration(
                "channel_capacity must be greater than zero",
            ));
        }

        Ok(StreamConfig {
            api_key,
            base_url,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            custom_headers: self.custom_headers,
            provider,
            framing,
            channel_capacity,
        })
    }
}

fn fingerprint(secret: &str) -> String {
    let mut hasher = DefaultHasher::new();
    secret.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_success() {
        let config = StreamConfig::builder()
            .base_url("https://api.together.xyz/v1/")
            .api_key("tk_test_key_12345")
            .timeout(Duration::from_secs(30))
            .max_retries(5)
            .provider(ProviderKind::OpenAiCompatible)
            .build()
            .unwrap();

        assert_eq!(config.base_url, "https://api.together.xyz/v1");
        assert_eq!(config.api_key(), Some("tk_test_key_12345"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.framing, FramingConfig::sse());
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = StreamConfig::builder()
            .base_url("http://127.0.0.1:11434")
            .build()
            .unwrap();

        assert!(!config.has_api_key());
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.provider, ProviderKind::Generic);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_ollama_defaults_to_ndjson() {
        let config = StreamConfig::builder()
            .base_url("http://localhost:11434")
            .provider(ProviderKind::Ollama)
            .build()
            .unwrap();

        assert_eq!(config.framing.framing, Framing::Ndjson);
        assert_eq!(config.framing.done_sentinel, None);
    }

    #[test]
    fn test_bedrock_defaults_to_event_stream() {
        let config = StreamConfig::builder()
            .base_url("https://bedrock-runtime.us-east-1.amazonaws.com")
            .provider(ProviderKind::Bedrock)
            .build()
            .unwrap();

        assert_eq!(config.framing.framing, Framing::EventStream);
        assert_eq!(config.framing.done_sentinel, None);
    }

    #[test]
    fn test_config_builder_missing_base_url() {
        assert!(StreamConfig::builder().build().is_err());
    }

    #[test]
    fn test_config_builder_rejects_bad_scheme() {
        let result = StreamConfig::builder().base_url("ftp://example.com").build();
        assert!(matches!(result, Err(StreamError::Configuration { .. })));
    }

    #[test]
    fn test_config_builder_rejects_empty_key() {
        let result = StreamConfig::builder()
            .base_url("https://example.com")
            .api_key("")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_builder_rejects_zero_capacity() {
        let result = StreamConfig::builder()
            .base_url("https://example.com")
            .channel_capacity(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_empty_prefix() {
        let framing = FramingConfig {
            framing: Framing::Sse {
                prefix: String::new(),
            },
            ..FramingConfig::sse()
        };
        let result = StreamConfig::builder()
            .base_url("https://example.com")
            .framing(framing)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = StreamConfig::builder()
            .base_url("https://api.example.com/v1/")
            .build()
            .unwrap();
        assert_eq!(config.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_cache_key_equality() {
        let a = StreamConfig::builder()
            .base_url("https://api.example.com")
            .api_key("sk_one")
            .header("X-A", "1")
            .header("X-B", "2")
            .build()
            .unwrap();
        let b = StreamConfig::builder()
            .base_url("https://api.example.com/")
            .api_key("sk_one")
            .header("X-B", "2")
            .header("X-A", "1")
            .build()
            .unwrap();
        let c = StreamConfig::builder()
            .base_url("https://api.example.com")
            .api_key("sk_two")
            .header("X-A", "1")
            .header("X-B", "2")
            .build()
            .unwrap();

        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
        assert_ne!(a.cache_key().unwrap(), c.cache_key().unwrap());
        assert!(!a.cache_key().unwrap().as_str().contains("sk_one"));
    }

    #[test]
    fn test_config_debug_redacts_api_key() {
        let config = StreamConfig::builder()
            .base_url("https://api.example.com")
            .api_key("sk_secret_key")
            .build()
            .unwrap();

        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("sk_secret_key"));
    }
}
