//! Gemini SSE state machine: no event names, no `[DONE]` sentinel, and a
//! cumulative usage field repeated on every frame rather than reported
//! once at the end. Follows the same "state as value" shape as
//! `providers::anthropic::stream::AnthropicStreamState`; the per-frame
//! dispatch itself is specific to Gemini's frame shape.

use crate::providers::gemini::translate::finish_reason_for;
use crate::providers::gemini::types::GenerateContentResponse;
use crate::sse::chunks;
use crate::types::{StreamChunk, Usage};

#[derive(Default)]
pub struct GeminiStreamState {
	message_id: String,
	model: String,
	last_usage: Option<Usage>,
}

impl GeminiStreamState {
	pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
		Self {
			message_id: message_id.into(),
			model: model.into(),
			last_usage: None,
		}
	}

	/// Feeds one decoded `data:` frame. Emits a content-delta chunk if the
	/// first candidate's first part carries non-empty text, a finish-only
	/// chunk if a `finishReason` is present, or nothing otherwise. Tracks
	/// the latest `usageMetadata` without emitting it -- the caller emits
	/// one usage chunk plus `Done` after the body ends.
	pub fn handle_frame(&mut self, frame: GenerateContentResponse) -> Vec<StreamChunk> {
		if let Some(usage) = &frame.usage_metadata {
			self.last_usage = Some(Usage::new(usage.prompt_token_count, usage.candidates_token_count));
		}

		let Some(candidate) = frame.candidates.into_iter().next() else {
			return vec![];
		};

		let text = candidate
			.content
			.as_ref()
			.and_then(|c| c.parts.first())
			.and_then(|p| p.text.as_deref())
			.filter(|t| !t.is_empty());

		if let Some(text) = text {
			return vec![self.data(chunks::delta_chunk(&self.message_id, &self.model, None, Some(text.to_string()), None))];
		}

		if let Some(reason) = finish_reason_for(candidate.finish_reason.as_deref()) {
			return vec![self.data(chunks::finish_chunk(&self.message_id, &self.model, &reason))];
		}

		vec![]
	}

	/// Emitted once after the body ends: the last-seen cumulative usage
	/// (if any) followed by `Done`.
	pub fn finish(&self) -> Vec<StreamChunk> {
		let mut out = Vec::with_capacity(2);
		if let Some(usage) = self.last_usage {
			out.push(StreamChunk::Data {
				bytes: chunks::usage_chunk(&self.message_id, &self.model, usage).into(),
				usage: Some(usage),
			});
		}
		out.push(StreamChunk::Done);
		out
	}

	fn data(&self, bytes: Vec<u8>) -> StreamChunk {
		StreamChunk::Data { bytes: bytes.into(), usage: None }
	}
}

#[cfg(test)]
mod tests {
	use serde_json::Value;

	use super::*;
	use crate::providers::gemini::types::{Candidate, Content, Part, UsageMetadata};

	fn body(chunk: &StreamChunk) -> Value {
		match chunk {
			StreamChunk::Data { bytes, .. } => serde_json::from_slice(bytes).unwrap(),
			other => panic!("expected Data chunk, got {other:?}"),
		}
	}

	#[test]
	fn cumulative_usage_emits_last_value_once_after_eof() {
		let mut state = GeminiStreamState::new("m1", "gemini-1.5-pro");
		let mut all = Vec::new();

		all.extend(state.handle_frame(GenerateContentResponse {
			candidates: vec![Candidate {
				content: Some(Content {
					role: Some("model".into()),
					parts: vec![Part::text("Hello")],
				}),
				finish_reason: None,
			}],
			usage_metadata: Some(UsageMetadata {
				prompt_token_count: 4,
				candidates_token_count: 2,
				total_token_count: 6,
			}),
		}));
		all.extend(state.handle_frame(GenerateContentResponse {
			candidates: vec![Candidate {
				content: Some(Content {
					role: Some("model".into()),
					parts: vec![Part::text(" world")],
				}),
				finish_reason: Some("STOP".into()),
			}],
			usage_metadata: Some(UsageMetadata {
				prompt_token_count: 4,
				candidates_token_count: 4,
				total_token_count: 8,
			}),
		}));
		all.extend(state.finish());

		assert_eq!(all.len(), 4);
		assert_eq!(body(&all[0])["choices"][0]["delta"]["content"], "Hello");
		assert_eq!(body(&all[1])["choices"][0]["delta"]["content"], " world");
		let usage_body = body(&all[2]);
		assert_eq!(usage_body["usage"]["total_tokens"], 8);
		assert!(matches!(all[3], StreamChunk::Done));
	}

	#[test]
	fn finish_reason_only_frame_emits_finish_chunk_not_content() {
		let mut state = GeminiStreamState::new("m1", "gemini-1.5-pro");
		let chunks = state.handle_frame(GenerateContentResponse {
			candidates: vec![Candidate {
				content: Some(Content {
					role: Some("model".into()),
					parts: vec![],
				}),
				finish_reason: Some("MAX_TOKENS".into()),
			}],
			usage_metadata: None,
		});
		assert_eq!(chunks.len(), 1);
		assert_eq!(body(&chunks[0])["choices"][0]["finish_reason"], "length");
	}

	#[test]
	fn no_usage_seen_emits_only_done() {
		let state = GeminiStreamState::new("m1", "gemini-1.5-pro");
		let out = state.finish();
		assert_eq!(out.len(), 1);
		assert!(matches!(out[0], StreamChunk::Done));
	}
}
