//! Request/response translation between the neutral schema and Anthropic's
//! Messages API, extended for tool calls in both directions.

use serde_json::Value;

use crate::error::GatewayError;
use crate::providers::anthropic::types::{self, ContentBlock, KnownStopReason, Message, MessagesRequest, MessagesResponse, Role, StopReason};
use crate::types::{ChatRequest, ChatResponse, Choice, Usage};

const DEFAULT_MAX_TOKENS: u64 = 4096;

pub fn translate_request(req: ChatRequest) -> MessagesRequest {
	let system = req
		.messages
		.iter()
		.filter(|m| m.role == crate::types::Role::System)
		.map(|m| m.text())
		.collect::<Vec<_>>()
		.join("\n");

	let messages = req
		.messages
		.iter()
		.filter(|m| m.role != crate::types::Role::System)
		.map(translate_message)
		.collect();

	MessagesRequest {
		messages,
		system,
		model: req.model,
		max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
		stop_sequences: req
			.stop
			.and_then(|v| match v {
				Value::String(s) => Some(vec![s]),
				Value::Array(items) => Some(items.into_iter().filter_map(|i| i.as_str().map(str::to_string)).collect()),
				_ => None,
			})
			.unwrap_or_default(),
		stream: req.stream,
		temperature: req.temperature,
		top_p: req.top_p,
		anthropic_version: None,
	}
}

fn translate_message(msg: &crate::types::Message) -> Message {
	// A `tool` role message becomes a `user` message carrying a
	// `tool_result` block referencing `tool_call_id`.
	if msg.role == crate::types::Role::Tool {
		return Message {
			role: Role::User,
			content: vec![ContentBlock::ToolResult {
				tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
				content: msg.text(),
			}],
		};
	}
	let role = match msg.role {
		crate::types::Role::Assistant => Role::Assistant,
		_ => Role::User,
	};
	Message {
		role,
		content: vec![ContentBlock::Text { text: msg.text() }],
	}
}

pub fn translate_response(resp: MessagesResponse) -> ChatResponse {
	let mut text = String::new();
	let mut tool_calls = Vec::new();
	for block in &resp.content {
		match block {
			ContentBlock::Text { text: t } => text.push_str(t),
			ContentBlock::ToolUse { id, name, input } => {
				tool_calls.push(serde_json::json!({
					"id": id,
					"type": "function",
					"function": { "name": name, "arguments": input },
				}));
			},
			ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {},
		}
	}

	let finish_reason = finish_reason_for(resp.stop_reason.as_ref(), !tool_calls.is_empty());

	let message = crate::types::Message {
		role: crate::types::Role::Assistant,
		content: Value::String(text),
		tool_call_id: None,
		tool_calls: if tool_calls.is_empty() { None } else { Some(Value::Array(tool_calls)) },
	};

	let usage = Usage::new(resp.usage.input_tokens, resp.usage.output_tokens);

	ChatResponse::new(
		resp.id,
		resp.model,
		vec![Choice {
			index: 0,
			message,
			finish_reason,
		}],
		Some(usage),
	)
}

/// Maps a stop reason to the neutral finish-reason string; if tool calls
/// are present but no stop reason was given, the finish reason is forced
/// to `tool_calls`.
pub(crate) fn finish_reason_for(stop_reason: Option<&StopReason>, has_tool_calls: bool) -> Option<String> {
	let mapped = stop_reason.map(|r| match r {
		StopReason::Known(KnownStopReason::EndTurn) => "stop".to_string(),
		StopReason::Known(KnownStopReason::MaxTokens) => "length".to_string(),
		StopReason::Known(KnownStopReason::ToolUse) => "tool_calls".to_string(),
		StopReason::Known(KnownStopReason::StopSequence) => "stop".to_string(),
		StopReason::Other(s) => s.clone(),
	});
	match mapped {
		Some(reason) => Some(reason),
		None if has_tool_calls => Some("tool_calls".to_string()),
		None => None,
	}
}

pub fn translate_error(resp: types::MessagesErrorResponse) -> GatewayError {
	GatewayError::TranslateFail(format!("{}: {}", resp.error.r#type, resp.error.message))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::providers::anthropic::types::Usage as AnthropicUsage;

	#[test]
	fn tool_role_message_becomes_user_tool_result() {
		let req = ChatRequest {
			model: "claude".into(),
			messages: vec![crate::types::Message {
				role: crate::types::Role::Tool,
				content: Value::String("42".into()),
				tool_call_id: Some("call_1".into()),
				tool_calls: None,
			}],
			..Default::default()
		};
		let translated = translate_request(req);
		assert_eq!(translated.messages.len(), 1);
		match &translated.messages[0].content[0] {
			ContentBlock::ToolResult { tool_use_id, content } => {
				assert_eq!(tool_use_id, "call_1");
				assert_eq!(content, "42");
			},
			other => panic!("expected ToolResult, got {other:?}"),
		}
	}

	#[test]
	fn missing_max_tokens_defaults_to_4096() {
		let req = ChatRequest {
			model: "claude".into(),
			messages: vec![],
			..Default::default()
		};
		assert_eq!(translate_request(req).max_tokens, DEFAULT_MAX_TOKENS);
	}

	#[test]
	fn tool_use_without_stop_reason_forces_tool_calls_finish() {
		let resp = MessagesResponse {
			id: "m1".into(),
			r#type: "message".into(),
			role: Role::Assistant,
			content: vec![ContentBlock::ToolUse {
				id: "call_1".into(),
				name: "lookup".into(),
				input: serde_json::json!({"q": "x"}),
			}],
			model: "claude".into(),
			stop_reason: None,
			stop_sequence: None,
			usage: AnthropicUsage { input_tokens: 10, output_tokens: 5 },
		};
		let chat = translate_response(resp);
		assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("tool_calls"));
		assert!(chat.choices[0].message.tool_calls.is_some());
	}

	#[test]
	fn text_blocks_concatenate_and_usage_sums() {
		let resp = MessagesResponse {
			id: "m1".into(),
			r#type: "message".into(),
			role: Role::Assistant,
			content: vec![ContentBlock::Text { text: "Hello".into() }, ContentBlock::Text { text: " world".into() }],
			model: "claude".into(),
			stop_reason: Some(StopReason::Known(KnownStopReason::EndTurn)),
			stop_sequence: None,
			usage: AnthropicUsage { input_tokens: 10, output_tokens: 5 },
		};
		let chat = translate_response(resp);
		assert_eq!(chat.choices[0].message.content, Value::String("Hello world".into()));
		assert_eq!(chat.usage.unwrap().total_tokens, 15);
		assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("stop"));
	}
}
