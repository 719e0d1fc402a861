//! Normalized OpenAI-shaped chunk builders. Every provider's state
//! machine converges on this one wire shape before it reaches the caller.

use serde::Serialize;
use serde_json::Value;

use crate::types::Usage;

#[derive(Serialize)]
struct StreamDelta {
	#[serde(skip_serializing_if = "Option::is_none")]
	role: Option<&'static str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	tool_calls: Option<Value>,
}

#[derive(Serialize)]
struct StreamChoice {
	index: u32,
	delta: StreamDelta,
	finish_reason: Option<String>,
}

#[derive(Serialize)]
struct StreamEnvelope {
	id: String,
	object: &'static str,
	model: String,
	choices: Vec<StreamChoice>,
	#[serde(skip_serializing_if = "Option::is_none")]
	usage: Option<Usage>,
}

fn envelope(id: &str, model: &str, choices: Vec<StreamChoice>, usage: Option<Usage>) -> Vec<u8> {
	serde_json::to_vec(&StreamEnvelope {
		id: id.to_string(),
		object: "chat.completion.chunk",
		model: model.to_string(),
		choices,
		usage,
	})
	.expect("stream chunk envelope always serializes")
}

/// Role/content delta chunk. `role` is set only on the first chunk of a
/// stream; later chunks pass `None`.
pub fn delta_chunk(id: &str, model: &str, role: Option<&'static str>, content: Option<String>, finish_reason: Option<&str>) -> Vec<u8> {
	envelope(
		id,
		model,
		vec![StreamChoice {
			index: 0,
			delta: StreamDelta {
				role,
				content,
				tool_calls: None,
			},
			finish_reason: finish_reason.map(str::to_string),
		}],
		None,
	)
}

/// One fragment of a streamed tool-call argument string at `tool_index`.
pub fn tool_call_delta_chunk(id: &str, model: &str, tool_index: usize, call_id: Option<&str>, name: Option<&str>, arguments_fragment: &str) -> Vec<u8> {
	let tool_call = serde_json::json!([{
		"index": tool_index,
		"id": call_id,
		"type": "function",
		"function": {
			"name": name,
			"arguments": arguments_fragment,
		}
	}]);
	envelope(
		id,
		model,
		vec![StreamChoice {
			index: 0,
			delta: StreamDelta {
				role: None,
				content: None,
				tool_calls: Some(tool_call),
			},
			finish_reason: None,
		}],
		None,
	)
}

/// Empty-delta chunk carrying only the finish reason.
pub fn finish_chunk(id: &str, model: &str, finish_reason: &str) -> Vec<u8> {
	delta_chunk(id, model, None, None, Some(finish_reason))
}

/// Empty-choices chunk carrying only usage, emitted once per stream.
pub fn usage_chunk(id: &str, model: &str, usage: Usage) -> Vec<u8> {
	envelope(id, model, vec![], Some(usage))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn finish_reason_renders_as_string_not_null_when_present() {
		let bytes = finish_chunk("id1", "m", "stop");
		let v: Value = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(v["choices"][0]["finish_reason"], "stop");
	}

	#[test]
	fn delta_chunk_without_finish_reason_renders_null() {
		let bytes = delta_chunk("id1", "m", Some("assistant"), Some("hi".into()), None);
		let v: Value = serde_json::from_slice(&bytes).unwrap();
		assert!(v["choices"][0]["finish_reason"].is_null());
		assert_eq!(v["choices"][0]["delta"]["role"], "assistant");
	}

	#[test]
	fn usage_chunk_has_no_choices_payload() {
		let bytes = usage_chunk("id1", "m", Usage::new(10, 5));
		let v: Value = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(v["choices"].as_array().unwrap().len(), 0);
		assert_eq!(v["usage"]["total_tokens"], 15);
	}
}
