//! Shared domain types: neutral request/response/chunk/usage records that
//! every provider adapter translates to and from. Content, tool call
//! payloads, and stop sequences are kept as opaque `serde_json::Value`
//! rather than a rich typed enum library, since callers only need to pass
//! these fields through, not inspect their shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `Message.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	User,
	Assistant,
	Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
	pub role: Role,
	/// A string or a multimodal content array, left opaque.
	pub content: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Value>,
}

impl Message {
	/// Concatenate all text found in `content`, whether it is a plain
	/// string or a multimodal array of `{type: "text", text: "..."}` parts.
	/// Used by the Anthropic/Gemini request translators.
	pub fn text(&self) -> String {
		match &self.content {
			Value::String(s) => s.clone(),
			Value::Array(parts) => parts
				.iter()
				.filter_map(|p| p.get("text").and_then(Value::as_str))
				.collect::<Vec<_>>()
				.join(""),
			_ => String::new(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
	pub model: String,
	pub messages: Vec<Message>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none", rename = "top_p")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Value>,
	#[serde(default)]
	pub stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub total_tokens: u64,
}

impl Usage {
	pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
		Self {
			prompt_tokens,
			completion_tokens,
			total_tokens: prompt_tokens + completion_tokens,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
	pub index: u32,
	pub message: Message,
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
	pub id: String,
	pub object: &'static str,
	pub model: String,
	pub choices: Vec<Choice>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
}

impl ChatResponse {
	pub fn new(id: String, model: String, choices: Vec<Choice>, usage: Option<Usage>) -> Self {
		Self {
			id,
			object: "chat.completion",
			model,
			choices,
			usage,
		}
	}
}

/// One envelope per streamed event. Mutually exclusive variants (rather
/// than a struct of optional fields) since a chunk is exactly one of
/// content, a terminal error, or the end-of-stream sentinel. Not `Clone`:
/// `Err` wraps `GatewayError`, which carries a non-`Clone` `reqwest::Error`,
/// and nothing in this crate needs to clone a chunk off the stream anyway.
#[derive(Debug)]
pub enum StreamChunk {
	/// An OpenAI-shaped `chat.completion.chunk` JSON payload, optionally
	/// carrying usage for accounting.
	Data { bytes: bytes::Bytes, usage: Option<Usage> },
	/// Terminal error; the stream is abandoned. No further chunks follow.
	Err(crate::error::GatewayError),
	/// Sentinel: no more chunks follow.
	Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
	One(String),
	Many(Vec<String>),
}

impl EmbeddingInput {
	/// Gemini's `embedContent` only accepts one string; this picks the
	/// first.
	pub fn first(&self) -> &str {
		match self {
			EmbeddingInput::One(s) => s.as_str(),
			EmbeddingInput::Many(v) => v.first().map(String::as_str).unwrap_or_default(),
		}
	}

	pub fn as_slice(&self) -> Vec<&str> {
		match self {
			EmbeddingInput::One(s) => vec![s.as_str()],
			EmbeddingInput::Many(v) => v.iter().map(String::as_str).collect(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
	pub model: String,
	pub input: EmbeddingInput,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub encoding_format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
	pub object: &'static str,
	pub embedding: Vec<f32>,
	pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
	pub object: &'static str,
	pub data: Vec<EmbeddingData>,
	pub model: String,
	pub usage: Usage,
}

/// The wire-format identifier returned by `Provider::kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
	OpenAi,
	Anthropic,
	Gemini,
	Ollama,
}

impl ProviderKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProviderKind::OpenAi => "openai",
			ProviderKind::Anthropic => "anthropic",
			ProviderKind::Gemini => "gemini",
			ProviderKind::Ollama => "ollama",
		}
	}
}

/// A single billed request, queued by a provider adapter after it returns
/// and flushed in batches by `workers::UsageRecorder`. `id` is assigned at
/// flush time if left empty -- callers normally leave it so, letting the
/// recorder provide a time-ordered unique id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
	#[serde(default)]
	pub id: String,
	pub org_id: String,
	pub key_id: String,
	pub model: String,
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub total_tokens: u64,
	pub cost_usd: f64,
	pub cached: bool,
	pub created_at: chrono::DateTime<chrono::Utc>,
}

impl UsageRecord {
	pub fn new(org_id: impl Into<String>, key_id: impl Into<String>, model: impl Into<String>, usage: Usage, cost_usd: f64, cached: bool) -> Self {
		Self {
			id: String::new(),
			org_id: org_id.into(),
			key_id: key_id.into(),
			model: model.into(),
			prompt_tokens: usage.prompt_tokens,
			completion_tokens: usage.completion_tokens,
			total_tokens: usage.total_tokens,
			cost_usd,
			cached,
			created_at: chrono::Utc::now(),
		}
	}
}

/// Hourly aggregate of `UsageRecord`s by `(org, key, model, bucket)`. The
/// tuple is the identity key a `RollupStore::upsert_rollup` call uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRollup {
	pub org_id: String,
	pub key_id: String,
	pub model: String,
	pub period: &'static str,
	pub bucket: chrono::DateTime<chrono::Utc>,
	pub request_count: u64,
	pub tokens: u64,
	pub cost_usd: f64,
	pub cached_count: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn usage_total_is_sum() {
		let u = Usage::new(10, 5);
		assert_eq!(u.total_tokens, 15);
	}

	#[test]
	fn message_text_concatenates_multimodal_parts() {
		let msg = Message {
			role: Role::User,
			content: serde_json::json!([{"type": "text", "text": "hello "}, {"type": "image_url"}, {"type": "text", "text": "world"}]),
			tool_call_id: None,
			tool_calls: None,
		};
		assert_eq!(msg.text(), "hello world");
	}
}
