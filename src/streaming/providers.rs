//! Provider profiles and their event mappers.

use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

use super::chunk::{Metadata, StreamChunk};
use super::mapper::{json_type, pick, provider_error, EventMapper, MappedEvent, TextMapper};
use crate::errors::{value_to_code, StreamError, StreamResult};
use crate::transport::StreamRequest;
use crate::types::{ChatMessage, Role, RoleMapper};

/// Known provider event shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    /// `{"text": ..}` events, see [`TextMapper`].
    #[default]
    Generic,
    /// Ollama `/api/chat` and `/api/generate` NDJSON streams.
    Ollama,
    /// Alibaba Tongyi (DashScope) SSE streams.
    Tongyi,
    /// OpenAI-compatible chat completion streams (TogetherAI, Fireworks,
    /// Portkey).
    OpenAiCompatible,
    /// Cloudflare Workers AI streams.
    WorkersAi,
    /// AWS Bedrock `ConverseStream` event streams.
    Bedrock,
}

impl ProviderKind {
    /// Returns the event mapper for this provider.
    pub fn mapper(&self) -> Arc<dyn EventMapper> {
        match self {
            ProviderKind::Generic => Arc::new(TextMapper),
            ProviderKind::Ollama => Arc::new(OllamaMapper),
            ProviderKind::Tongyi => Arc::new(TongyiMapper),
            ProviderKind::OpenAiCompatible => Arc::new(OpenAiCompatibleMapper),
            ProviderKind::WorkersAi => Arc::new(WorkersAiMapper),
            ProviderKind::Bedrock => Arc::new(BedrockConverseMapper),
        }
    }

    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Generic => "generic",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Tongyi => "tongyi",
            ProviderKind::OpenAiCompatible => "openai",
            ProviderKind::WorkersAi => "workers-ai",
            ProviderKind::Bedrock => "bedrock",
        }
    }

    /// Builds a streaming chat request in this provider's request shape.
    ///
    /// Roles are mapped with [`RoleMapper`]; a role the provider cannot
    /// represent fails with [`StreamError::Validation`].
    pub fn chat_request(&self, model: &str, messages: &[ChatMessage]) -> StreamResult<StreamRequest> {
        if messages.is_empty() {
            return Err(StreamError::validation("At least one message is required"));
        }

        let wire_messages = messages
            .iter()
            .map(|m| {
                Ok(json!({
                    "role": self.map_role(&m.role)?,
                    "content": m.content,
                }))
            })
            .collect::<StreamResult<Vec<Value>>>()?;

        let request = match self {
            ProviderKind::Generic | ProviderKind::OpenAiCompatible => StreamRequest::new(
                "chat/completions",
                json!({ "model": model, "messages": wire_messages, "stream": true }),
            ),
            ProviderKind::Ollama => StreamRequest::new(
                "api/chat",
                json!({ "model": model, "messages": wire_messages, "stream": true }),
            ),
            ProviderKind::Tongyi => StreamRequest::new(
                "api/v1/services/aigc/text-generation/generation",
                json!({
                    "model": model,
                    "input": { "messages": wire_messages },
                    "parameters": { "result_format": "text", "incremental_output": true },
                }),
            )
            .with_header("X-DashScope-SSE", "enable"),
            ProviderKind::WorkersAi => StreamRequest::new(
                model,
                json!({ "messages": wire_messages, "stream": true }),
            ),
            ProviderKind::Bedrock => return self.converse_request(model, messages),
        };

        Ok(request)
    }

    /// Bedrock takes system prompts apart from the conversation, and every
    /// message content is a list of blocks.
    fn converse_request(&self, model: &str, messages: &[ChatMessage]) -> StreamResult<StreamRequest> {
        let mut system = Vec::new();
        let mut conversation = Vec::new();
        for message in messages {
            let role = self.map_role(&message.role)?;
            if message.role == Role::System {
                system.push(json!({ "text": message.content }));
            } else {
                conversation.push(json!({
                    "role": role,
                    "content": [{ "text": message.content }],
                }));
            }
        }
        if conversation.is_empty() {
            return Err(StreamError::validation(
                "Bedrock requires at least one user or assistant message",
            ));
        }

        let mut body = json!({ "messages": conversation });
        if !system.is_empty() {
            body["system"] = Value::Array(system);
        }

        let model: String = url::form_urlencoded::byte_serialize(model.as_bytes()).collect();
        Ok(
            StreamRequest::new(format!("model/{}/converse-stream", model), body)
                .with_header("Accept", "application/vnd.amazon.eventstream"),
        )
    }
}

impl RoleMapper for ProviderKind {
    fn map_role(&self, role: &Role) -> StreamResult<String> {
        let mapped = match (self, role) {
            (_, Role::System) => "system",
            (_, Role::User) => "user",
            (_, Role::Assistant) => "assistant",
            (ProviderKind::Ollama | ProviderKind::OpenAiCompatible, Role::Tool) => "tool",
            (ProviderKind::Generic, Role::Tool) => "tool",
            (ProviderKind::Generic, Role::Custom(name)) => return Ok(name.clone()),
            (ProviderKind::Tongyi | ProviderKind::WorkersAi | ProviderKind::Bedrock, Role::Tool)
            | (
                ProviderKind::Ollama
                | ProviderKind::Tongyi
                | ProviderKind::OpenAiCompatible
                | ProviderKind::WorkersAi
                | ProviderKind::Bedrock,
                Role::Custom(_),
            ) => {
                return Err(StreamError::validation(format!(
                    "Role `{}` is not supported by {}",
                    role,
                    self.as_str()
                )))
            }
        };
        Ok(mapped.to_string())
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" | "text" => Ok(ProviderKind::Generic),
            "ollama" => Ok(ProviderKind::Ollama),
            "tongyi" | "dashscope" | "alibaba" => Ok(ProviderKind::Tongyi),
            "openai" | "openai-compatible" | "together" | "togetherai" | "fireworks"
            | "portkey" => Ok(ProviderKind::OpenAiCompatible),
            "workers-ai" | "workersai" | "cloudflare" => Ok(ProviderKind::WorkersAi),
            "bedrock" | "aws" | "aws-bedrock" => Ok(ProviderKind::Bedrock),
            other => Err(StreamError::configuration(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// Ollama NDJSON events.
///
/// Non-final events carry `message.content` (chat) or `response`
/// (generate); the `done: true` event carries timing and token counts.
#[derive(Debug, Clone, Default)]
pub struct OllamaMapper;

const OLLAMA_FINAL_FIELDS: &[&str] = &[
    "model",
    "done_reason",
    "total_duration",
    "load_duration",
    "prompt_eval_count",
    "prompt_eval_duration",
    "eval_count",
    "eval_duration",
];

impl EventMapper for OllamaMapper {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn map(&self, payload: Value) -> StreamResult<MappedEvent> {
        let Value::Object(obj) = payload else {
            return Err(StreamError::protocol("Expected a JSON object event", None));
        };

        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            return Err(provider_error(error));
        }

        let text = obj
            .get("message")
            .and_then(|m| m.get("content"))
            .or_else(|| obj.get("response"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let done = obj.get("done").and_then(Value::as_bool).unwrap_or(false);
        if !done {
            return Ok(MappedEvent::Content(StreamChunk::text(text)));
        }

        let chunk = StreamChunk::text(text)
            .with_metadata(pick(&obj, OLLAMA_FINAL_FIELDS))
            .into_final();
        Ok(MappedEvent::Terminal(Some(chunk)))
    }
}

/// Alibaba Tongyi events.
///
/// Errors arrive as `{"code": .., "message": ..}`; content as
/// `output.text`; the stream ends with the first non-`"null"`
/// `output.finish_reason`.
#[derive(Debug, Clone, Default)]
pub struct TongyiMapper;

impl EventMapper for TongyiMapper {
    fn name(&self) -> &'static str {
        "tongyi"
    }

    fn map(&self, payload: Value) -> StreamResult<MappedEvent> {
        let Value::Object(obj) = payload else {
            return Err(StreamError::protocol("Expected a JSON object event", None));
        };

        if let Some(code) = obj.get("code").and_then(value_to_code) {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Tongyi request failed")
                .to_string();
            return Err(StreamError::provider(message, Some(code)));
        }

        let output = match obj.get("output") {
            Some(Value::Object(output)) => output,
            Some(other) => {
                return Err(StreamError::protocol(
                    format!("Expected `output` to be an object, got {}", json_type(other)),
                    None,
                ))
            }
            None => return Err(StreamError::protocol("Event has no `output` field", None)),
        };

        let text = output
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let finish_reason = output
            .get("finish_reason")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty() && *r != "null");

        let mut metadata = pick(&obj, &["usage", "request_id"]);
        if let Some(reason) = finish_reason {
            metadata.insert("finish_reason".to_string(), Value::String(reason.to_string()));
        }
        let chunk = StreamChunk::text(text).with_metadata(metadata);

        match finish_reason {
            Some(_) => Ok(MappedEvent::Terminal(Some(chunk.into_final()))),
            None => Ok(MappedEvent::Content(chunk)),
        }
    }
}

/// OpenAI-compatible chat/completion chunks.
///
/// Content comes from `choices[0].delta.content` or `choices[0].text`. The
/// stream only ends at the `[DONE]` sentinel, because usage may follow the
/// chunk carrying `finish_reason`.
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleMapper;

impl EventMapper for OpenAiCompatibleMapper {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn map(&self, payload: Value) -> StreamResult<MappedEvent> {
        let Value::Object(obj) = payload else {
            return Err(StreamError::protocol("Expected a JSON object event", None));
        };

        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            return Err(provider_error(error));
        }

        let mut metadata = pick(&obj, &["id", "model", "usage"]);
        let mut text = String::new();

        match obj.get("choices") {
            Some(Value::Array(choices)) => {
                if let Some(choice) = choices.first() {
                    let delta = choice.get("delta");
                    text = delta
                        .and_then(|d| d.get("content"))
                        .or_else(|| choice.get("text"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    if let Some(role) = delta.and_then(|d| d.get("role")).and_then(Value::as_str) {
                        metadata.insert(
                            "role".to_string(),
                            Value::String(Role::from_wire(role).as_str().to_string()),
                        );
                    }
                    if let Some(reason) = choice.get("finish_reason").filter(|r| !r.is_null()) {
                        metadata.insert("finish_reason".to_string(), reason.clone());
                    }
                }
            }
            None | Some(Value::Null) => {}
            Some(other) => {
                return Err(StreamError::protocol(
                    format!("Expected `choices` to be an array, got {}", json_type(other)),
                    None,
                ))
            }
        }

        let chunk = StreamChunk::text(text).with_metadata(metadata);
        if chunk.text.is_empty() && !chunk.metadata.contains_key("usage")
            && !chunk.metadata.contains_key("finish_reason")
        {
            return Ok(MappedEvent::Skip);
        }
        Ok(MappedEvent::Content(chunk))
    }
}

/// Cloudflare Workers AI events: `{"response": ".."}`, terminated by
/// `[DONE]`; failures as `{"success": false, "errors": [..]}`.
#[derive(Debug, Clone, Default)]
pub struct WorkersAiMapper;

impl EventMapper for WorkersAiMapper {
    fn name(&self) -> &'static str {
        "workers-ai"
    }

    fn map(&self, payload: Value) -> StreamResult<MappedEvent> {
        let Value::Object(obj) = payload else {
            return Err(StreamError::protocol("Expected a JSON object event", None));
        };

        if let Some(Value::Array(errors)) = obj.get("errors") {
            if let Some(first) = errors.first() {
                return Err(provider_error(first));
            }
        }

        let text = match obj.get("response") {
            Some(Value::String(text)) => text.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => {
                return Err(StreamError::protocol(
                    format!("Expected `response` to be a string, got {}", json_type(other)),
                    None,
                ))
            }
        };

        let chunk = StreamChunk::text(text).with_metadata(pick(&obj, &["usage"]));
        if chunk.is_empty() {
            return Ok(MappedEvent::Skip);
        }
        Ok(MappedEvent::Content(chunk))
    }
}

/// Bedrock `ConverseStream` events, one member per event:
/// `messageStart`, `contentBlockStart`, `contentBlockDelta`,
/// `contentBlockStop`, `messageStop` and finally `metadata`.
///
/// `delta.text` is answer content and `delta.reasoningContent.text` is
/// reasoning, delivered in [`StreamChunk::reasoning`]. The stop reason is
/// delivered as `finish_reason` when `messageStop` arrives; the stream
/// ends at `metadata`, which follows it with token usage. Members ending
/// in `Exception` and `error` are provider failures.
#[derive(Debug, Clone, Default)]
pub struct BedrockConverseMapper;

const BEDROCK_PASSIVE_EVENTS: &[&str] = &["messageStart", "contentBlockStart", "contentBlockStop"];

impl EventMapper for BedrockConverseMapper {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn map(&self, payload: Value) -> StreamResult<MappedEvent> {
        let Value::Object(obj) = payload else {
            return Err(StreamError::protocol("Expected a JSON object event", None));
        };

        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            return Err(provider_error(error));
        }
        if let Some((name, body)) = obj.iter().find(|(key, _)| key.ends_with("Exception")) {
            let message = body
                .get("message")
                .or_else(|| body.get("Message"))
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string();
            return Err(StreamError::provider(message, Some(name.clone())));
        }

        if let Some(block) = obj.get("contentBlockDelta") {
            let delta = block.get("delta");
            let text = delta
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let reasoning = delta
                .and_then(|d| d.get("reasoningContent"))
                .and_then(|r| r.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default();

            let chunk = StreamChunk::text(text).with_reasoning(reasoning);
            if chunk.is_empty() {
                return Ok(MappedEvent::Skip);
            }
            return Ok(MappedEvent::Content(chunk));
        }

        if let Some(stop) = obj.get("messageStop") {
            let mut metadata = Metadata::new();
            if let Some(reason) = stop.get("stopReason").filter(|r| !r.is_null()) {
                metadata.insert("finish_reason".to_string(), reason.clone());
            }
            if metadata.is_empty() {
                return Ok(MappedEvent::Skip);
            }
            return Ok(MappedEvent::Content(StreamChunk::default().with_metadata(metadata)));
        }

        if let Some(meta) = obj.get("metadata") {
            let Value::Object(meta) = meta else {
                return Err(StreamError::protocol(
                    format!("Expected `metadata` to be an object, got {}", json_type(meta)),
                    None,
                ));
            };
            let metadata = pick(meta, &["usage", "metrics"]);
            if metadata.is_empty() {
                return Ok(MappedEvent::Terminal(None));
            }
            let chunk = StreamChunk::default().with_metadata(metadata).into_final();
            return Ok(MappedEvent::Terminal(Some(chunk)));
        }

        if !BEDROCK_PASSIVE_EVENTS.iter().any(|key| obj.contains_key(*key)) {
            tracing::debug!(
                members = ?obj.keys().collect::<Vec<_>>(),
                "Skipping unrecognized Bedrock event"
            );
        }
        Ok(MappedEvent::Skip)
    }
}
