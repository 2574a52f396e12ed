//! Streaming client.
//!
//! Opens a provider stream through a [`StreamTransport`] and decodes it with
//! the event mapper of the configured [`ProviderKind`].

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cache::ClientCache;
use crate::config::{FramingConfig, StreamConfig};
use crate::errors::{StreamError, StreamResult};
use crate::observability::{NoopStreamMetrics, StreamMetrics};
use crate::resilience::{RetryConfig, RetryPolicy};
use crate::streaming::{
    spawn_decode, AccumulatedResult, EventMapper, Framing, NoopHandler, PendingRequest,
    ProviderKind, StreamDecoder, TokenHandler, TokenStream,
};
use crate::transport::{ByteStream, ReqwestTransport, StreamRequest, StreamTransport};
use crate::types::ChatMessage;

/// Client for streaming provider responses.
///
/// # Example
///
/// ```rust,no_run
/// use integrations_llm_stream::{ChatMessage, FnHandler, ProviderKind, StreamConfig, StreamingClient};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = StreamConfig::builder()
///         .base_url("http://localhost:11434")
///         .provider(ProviderKind::Ollama)
///         .build()?;
///     let client = StreamingClient::new(config)?;
///
///     let request = client.chat_request("llama3", &[ChatMessage::user("Hello!")])?;
///     let printer = FnHandler::new(|chunk| print!("{}", chunk.text));
///     let result = client.stream(request, &printer, &CancellationToken::new()).await?;
///     println!("\n{} chunks", result.chunk_count);
///     Ok(())
/// }
/// ```
pub struct StreamingClient {
    config: StreamConfig,
    transport: Arc<dyn StreamTransport>,
    mapper: Arc<dyn EventMapper>,
    retry: RetryPolicy,
    metrics: Arc<dyn StreamMetrics>,
}

impl StreamingClient {
    /// Creates a client with the default HTTP transport.
    pub fn new(config: StreamConfig) -> StreamResult<Self> {
        StreamingClientBuilder::new(config).build()
    }

    /// Creates a client from `LLM_STREAM_*` environment variables.
    pub fn from_env() -> StreamResult<Self> {
        Self::new(StreamConfig::from_env()?)
    }

    /// Creates a client builder.
    pub fn builder(config: StreamConfig) -> StreamingClientBuilder {
        StreamingClientBuilder::new(config)
    }

    /// Returns the client for `config` from `cache`, creating it on a miss.
    pub fn cached(
        cache: &ClientCache<StreamingClient>,
        config: StreamConfig,
    ) -> StreamResult<Arc<StreamingClient>> {
        let key = config.cache_key()?;
        cache.try_get_or_insert_with(key, || Self::new(config))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Returns the provider profile.
    pub fn provider(&self) -> ProviderKind {
        self.config.provider
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<dyn StreamMetrics> {
        &self.metrics
    }

    /// Builds a streaming chat request for the configured provider.
    pub fn chat_request(&self, model: &str, messages: &[ChatMessage]) -> StreamResult<StreamRequest> {
        self.config.provider.chat_request(model, messages)
    }

    /// Streams `request`, awaiting `handler` for each chunk.
    ///
    /// Settles once: with the accumulated result after a terminal signal or
    /// end of body, or with the first error. Cancelling `cancel` settles
    /// with [`StreamError::Cancelled`].
    #[instrument(skip_all, fields(provider = %self.config.provider, path = %request.path))]
    pub async fn stream<H>(
        &self,
        request: StreamRequest,
        handler: &H,
        cancel: &CancellationToken,
    ) -> StreamResult<AccumulatedResult>
    where
        H: TokenHandler + ?Sized,
    {
        let (mut decoder, body) = self.open(request, cancel).await?;
        decoder.run(body, handler, cancel).await
    }

    /// Opens `request` and decodes it on a background task.
    ///
    /// Open errors are returned directly. Afterwards chunks arrive on the
    /// [`TokenStream`] and the outcome on the [`PendingRequest`].
    #[instrument(skip_all, fields(provider = %self.config.provider, path = %request.path))]
    pub async fn spawn_stream(
        &self,
        request: StreamRequest,
    ) -> StreamResult<(PendingRequest, TokenStream)> {
        let cancel = CancellationToken::new();
        let (decoder, body) = self.open(request, &cancel).await?;
        Ok(spawn_decode(
            decoder,
            body,
            self.config.channel_capacity,
            cancel,
        ))
    }

    /// Streams `request` without a handler and returns the accumulated
    /// result.
    pub async fn complete(&self, request: StreamRequest) -> StreamResult<AccumulatedResult> {
        self.stream(request, &NoopHandler, &CancellationToken::new())
            .await
    }

    async fn open(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> StreamResult<(StreamDecoder, ByteStream)> {
        let transport = &self.transport;
        let opened = self
            .retry
            .execute(cancel, |attempt| {
                let request = request.clone();
                async move {
                    if attempt > 0 {
                        tracing::debug!(attempt, "Reopening stream");
                    }
                    transport
                        .open_stream(request, cancel)
                        .await
                        .map_err(StreamError::from)
                }
            })
            .await;

        let response = match opened {
            Ok(response) => response,
            Err(err) => {
                self.metrics.record_open_failed(self.mapper.name(), err.kind());
                return Err(err);
            }
        };

        let framing = if response.is_plain_json() && self.config.framing.framing != Framing::Whole
        {
            tracing::debug!("Response is a JSON document, decoding it as one payload");
            FramingConfig::whole().with_max_line_length(self.config.framing.max_line_length)
        } else {
            self.config.framing.clone()
        };

        let decoder =
            StreamDecoder::new(&framing, self.mapper.clone()).with_metrics(self.metrics.clone());
        Ok((decoder, response.stream))
    }
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("config", &self.config)
            .field("mapper", &self.mapper.name())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`StreamingClient`].
pub struct StreamingClientBuilder {
    config: StreamConfig,
    transport: Option<Arc<dyn StreamTransport>>,
    mapper: Option<Arc<dyn EventMapper>>,
    retry: Option<RetryConfig>,
    metrics: Option<Arc<dyn StreamMetrics>>,
}

impl StreamingClientBuilder {
    /// Creates a builder for `config`.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            transport: None,
            mapper: None,
            retry: None,
            metrics: None,
        }
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides the event mapper implied by the provider.
    pub fn mapper(mut self, mapper: Arc<dyn EventMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Sets the retry configuration. Defaults to the configured
    /// `max_retries` with exponential backoff.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn StreamMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the client.
    pub fn build(self) -> StreamResult<StreamingClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };
        let mapper = self
            .mapper
            .unwrap_or_else(|| self.config.provider.mapper());
        let retry = self
            .retry
            .unwrap_or_else(|| RetryConfig::new().max_retries(self.config.max_retries));

        Ok(StreamingClient {
            config: self.config,
            transport,
            mapper,
            retry: RetryPolicy::new(retry),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopStreamMetrics)),
        })
    }
}
