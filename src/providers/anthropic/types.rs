//! Anthropic Messages API wire types, including the tool-use content
//! blocks and `input_json_delta` streaming event needed for full
//! bidirectional tool-call support.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Copy, Clone, Deserialize, Serialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	#[default]
	User,
	Assistant,
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContentBlock {
	Text {
		text: String,
	},
	Image {
		source: Value,
	},
	ToolUse {
		id: String,
		name: String,
		input: Value,
	},
	ToolResult {
		tool_use_id: String,
		content: String,
	},
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
	pub role: Role,
	pub content: Vec<ContentBlock>,
}

#[derive(Clone, Serialize, Default, Debug, PartialEq)]
pub struct MessagesRequest {
	pub messages: Vec<Message>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub system: String,
	pub model: String,
	pub max_tokens: u64,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub stop_sequences: Vec<String>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub stream: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	/// Moved into the body, and the header suppressed, for the Vertex
	/// hosting mode.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub anthropic_version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessagesResponse {
	pub id: String,
	pub r#type: String,
	pub role: Role,
	pub content: Vec<ContentBlock>,
	pub model: String,
	pub stop_reason: Option<StopReason>,
	pub stop_sequence: Option<String>,
	pub usage: Usage,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessagesStreamEvent {
	MessageStart { message: MessagesResponse },
	ContentBlockStart { index: usize, content_block: ContentBlock },
	ContentBlockDelta { index: usize, delta: ContentBlockDelta },
	ContentBlockStop { index: usize },
	MessageDelta { delta: MessageDelta, usage: MessageDeltaUsage },
	MessageStop,
	Ping,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContentBlockDelta {
	TextDelta { text: String },
	InputJsonDelta { partial_json: String },
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct MessageDeltaUsage {
	pub output_tokens: u64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct MessageDelta {
	pub stop_reason: Option<StopReason>,
	pub stop_sequence: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MessagesErrorResponse {
	pub r#type: String,
	pub error: MessagesError,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MessagesError {
	pub r#type: String,
	pub message: String,
}

/// Known reasons map to a neutral finish reason via a fixed table
/// ; anything else passes through as-is, so unknown values
/// round-trip instead of failing deserialization.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StopReason {
	Known(KnownStopReason),
	Other(String),
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KnownStopReason {
	EndTurn,
	MaxTokens,
	ToolUse,
	StopSequence,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Usage {
	pub input_tokens: u64,
	#[serde(default)]
	pub output_tokens: u64,
}
