//! Anthropic SSE/event-stream state machine. A single small record mutated
//! as events arrive: state as value, not object graph -- no cross-task
//! sharing, no locks. Used both by the direct/Vertex SSE reader
//! (`providers::anthropic::mod`) and by the Bedrock binary event-stream
//! reader (`providers::bedrock`), which fan events into this state machine
//! keyed by the JSON `type` field instead of an SSE event name.

use std::collections::HashMap;

use crate::providers::anthropic::translate::finish_reason_for;
use crate::providers::anthropic::types::{ContentBlock, ContentBlockDelta, MessagesStreamEvent};
use crate::sse::chunks;
use crate::types::{StreamChunk, Usage};

#[derive(Default)]
pub struct AnthropicStreamState {
	message_id: String,
	model: String,
	input_tokens: u64,
	output_tokens: u64,
	/// index -> (tool_call_id, function_name), populated at
	/// `content_block_start` for `tool_use` blocks so the first
	/// `input_json_delta` chunk at that index can carry them.
	tool_calls: HashMap<usize, (String, String)>,
	tool_call_started: HashMap<usize, bool>,
	pending_stop_reason: Option<String>,
}

impl AnthropicStreamState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feeds one decoded event, returning the `StreamChunk`s it produces
	/// (zero, one, or several -- `message_stop` emits finish+usage+done).
	pub fn handle_event(&mut self, event: MessagesStreamEvent) -> Vec<StreamChunk> {
		match event {
			MessagesStreamEvent::MessageStart { message } => {
				self.message_id = message.id;
				self.model = message.model;
				self.input_tokens = message.usage.input_tokens;
				self.output_tokens = message.usage.output_tokens;
				vec![self.data(chunks::delta_chunk(&self.message_id, &self.model, Some("assistant"), None, None))]
			},
			MessagesStreamEvent::ContentBlockStart { index, content_block } => {
				if let ContentBlock::ToolUse { id, name, .. } = content_block {
					self.tool_calls.insert(index, (id, name));
					self.tool_call_started.insert(index, false);
				}
				vec![]
			},
			MessagesStreamEvent::ContentBlockDelta { index, delta } => match delta {
				ContentBlockDelta::TextDelta { text } => {
					vec![self.data(chunks::delta_chunk(&self.message_id, &self.model, None, Some(text), None))]
				},
				ContentBlockDelta::InputJsonDelta { partial_json } => {
					let started = self.tool_call_started.get(&index).copied().unwrap_or(false);
					let (call_id, name) = self.tool_calls.get(&index).cloned().unwrap_or_default();
					self.tool_call_started.insert(index, true);
					let bytes = if started {
						chunks::tool_call_delta_chunk(&self.message_id, &self.model, index, None, None, &partial_json)
					} else {
						chunks::tool_call_delta_chunk(&self.message_id, &self.model, index, Some(&call_id), Some(&name), &partial_json)
					};
					vec![self.data(bytes)]
				},
			},
			MessagesStreamEvent::ContentBlockStop { .. } => vec![],
			MessagesStreamEvent::MessageDelta { delta, usage } => {
				self.output_tokens = usage.output_tokens;
				self.pending_stop_reason = finish_reason_for(delta.stop_reason.as_ref(), !self.tool_calls.is_empty());
				vec![]
			},
			MessagesStreamEvent::MessageStop => {
				let finish_reason = self.pending_stop_reason.clone().unwrap_or_else(|| "stop".to_string());
				let usage = Usage::new(self.input_tokens, self.output_tokens);
				vec![
					self.data(chunks::finish_chunk(&self.message_id, &self.model, &finish_reason)),
					StreamChunk::Data {
						bytes: chunks::usage_chunk(&self.message_id, &self.model, usage).into(),
						usage: Some(usage),
					},
					StreamChunk::Done,
				]
			},
			MessagesStreamEvent::Ping => vec![],
		}
	}

	fn data(&self, bytes: Vec<u8>) -> StreamChunk {
		StreamChunk::Data { bytes: bytes.into(), usage: None }
	}
}

#[cfg(test)]
mod tests {
	use serde_json::Value;

	use super::*;
	use crate::providers::anthropic::types::{KnownStopReason, MessageDelta, MessageDeltaUsage, MessagesResponse, Role, StopReason, Usage as AnthropicUsage};

	fn body(chunk: &StreamChunk) -> Value {
		match chunk {
			StreamChunk::Data { bytes, .. } => serde_json::from_slice(bytes).unwrap(),
			other => panic!("expected Data chunk, got {other:?}"),
		}
	}

	#[test]
	fn happy_path_emits_six_chunks_in_order() {
		let mut state = AnthropicStreamState::new();
		let mut all = Vec::new();

		all.extend(state.handle_event(MessagesStreamEvent::MessageStart {
			message: MessagesResponse {
				id: "m1".into(),
				r#type: "message".into(),
				role: Role::Assistant,
				content: vec![],
				model: "M".into(),
				stop_reason: None,
				stop_sequence: None,
				usage: AnthropicUsage { input_tokens: 10, output_tokens: 0 },
			},
		}));
		all.extend(state.handle_event(MessagesStreamEvent::ContentBlockDelta {
			index: 0,
			delta: ContentBlockDelta::TextDelta { text: "Hello".into() },
		}));
		all.extend(state.handle_event(MessagesStreamEvent::ContentBlockDelta {
			index: 0,
			delta: ContentBlockDelta::TextDelta { text: " world".into() },
		}));
		all.extend(state.handle_event(MessagesStreamEvent::MessageDelta {
			delta: MessageDelta {
				stop_reason: Some(StopReason::Known(KnownStopReason::EndTurn)),
				stop_sequence: None,
			},
			usage: MessageDeltaUsage { output_tokens: 5 },
		}));
		all.extend(state.handle_event(MessagesStreamEvent::MessageStop));

		assert_eq!(all.len(), 6);
		assert_eq!(body(&all[0])["choices"][0]["delta"]["role"], "assistant");
		assert_eq!(body(&all[1])["choices"][0]["delta"]["content"], "Hello");
		assert_eq!(body(&all[2])["choices"][0]["delta"]["content"], " world");
		assert_eq!(body(&all[3])["choices"][0]["finish_reason"], "stop");
		let usage_body = body(&all[4]);
		assert_eq!(usage_body["usage"]["total_tokens"], 15);
		assert!(matches!(all[5], StreamChunk::Done));
	}
}
