//! HTTP transport implementation.

use async_trait::async_trait;
use futures::StreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, ClientBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{StreamRequest, StreamTransport, StreamingResponse, TransportError};
use crate::config::StreamConfig;
use crate::errors::{ApiErrorBody, StreamError, StreamResult};
use crate::observability::{redact, redact_body};

/// Streaming transport backed by `reqwest`.
///
/// `timeout` bounds connecting and waiting for response headers only; a
/// stream may stay open for as long as the provider keeps sending.
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport for the configured endpoint, credentials and
    /// headers.
    pub fn new(config: &StreamConfig) -> StreamResult<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers(default_headers(config)?)
            .build()
            .map_err(|e| StreamError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout: config.timeout,
        })
    }

    fn build_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(&self, request: StreamRequest) -> Result<reqwest::Response, TransportError> {
        let url = self.build_url(&request.path);
        let mut builder = self.client.post(&url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(TransportError::Timeout {
                timeout: self.timeout,
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Timeout {
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl StreamTransport for ReqwestTransport {
    #[instrument(skip(self, request, cancel), fields(path = %request.path))]
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamingResponse, TransportError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = self.send(request) => response?,
        };

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };

            let message = ApiErrorBody::parse(&body)
                .and_then(|b| b.message())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Request failed")
                        .to_string()
                });

            tracing::warn!(status = status.as_u16(), "Stream request rejected");

            return Err(TransportError::Status {
                status: status.as_u16(),
                message: redact(&message),
                body: (!body.is_empty()).then(|| redact_body(&body)),
                retry_after,
            });
        }

        tracing::debug!(
            status = status.as_u16(),
            content_type = headers.get("content-type").map(String::as_str),
            "Stream opened"
        );

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| TransportError::Body {
                    message: e.to_string(),
                })
            })
            .boxed();

        Ok(StreamingResponse {
            status: status.as_u16(),
            headers,
            stream,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn default_headers(config: &StreamConfig) -> StreamResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

    for (name, value) in &config.custom_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| StreamError::configuration(format!("Invalid header name: {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| StreamError::configuration(format!("Invalid value for header {}", name)))?;
        headers.insert(name, value);
    }

    if let Some(api_key) = config.api_key() {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| StreamError::configuration("API key contains invalid characters"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

/// Parses `Retry-After` given in (possibly fractional) seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()?;
    // Rejects negative, non-finite and out-of-range values.
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config() -> StreamConfig {
        StreamConfig::builder()
            .base_url("http://localhost:8080/v1")
            .api_key("sk_test_key")
            .header("X-Trace", "abc")
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_url() {
        let transport = ReqwestTransport::new(&config()).unwrap();
        assert_eq!(
            transport.build_url("/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(transport.build_url(""), "http://localhost:8080/v1");
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers(&config()).unwrap();
        assert_eq!(headers[ACCEPT], "text/event-stream");
        assert_eq!(headers["x-trace"], "abc");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn test_invalid_header_is_configuration_error() {
        let config = StreamConfig::builder()
            .base_url("http://localhost:8080")
            .header("Bad Header", "x")
            .build()
            .unwrap();
        assert!(matches!(
            ReqwestTransport::new(&config),
            Err(StreamError::Configuration { .. })
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("0.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(500)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test_case("1e20" ; "beyond duration range")]
    #[test_case("inf" ; "infinite")]
    #[test_case("NaN" ; "not a number")]
    #[test_case("-1" ; "negative")]
    fn test_parse_retry_after_rejects_unrepresentable(value: &'static str) {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static(value));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_debug_hides_credentials() {
        let transport = ReqwestTransport::new(&config()).unwrap();
        let debug = format!("{:?}", transport);
        assert!(!debug.contains("sk_test_key"));
    }
}
