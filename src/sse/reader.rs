//! Generic SSE reader routine: drives a response body for adapters whose
//! wire format already matches the neutral `StreamChunk` shape (OpenAI,
//! Ollama). Anthropic and Gemini have their own state machines (see
//! `providers::anthropic`, `providers::gemini`) built on the same
//! `frame::decode_events` but with adapter-specific event handling; this
//! routine is the "no translation needed, just re-frame" case.

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::sse::frame::{decode_events, event_data};
use crate::types::{StreamChunk, Usage};

/// Reads events from `response`, forwarding each non-empty `data:` payload
/// as `StreamChunk::Data` (attaching `Usage` when the frame's JSON carries
/// a positive `usage.total_tokens`). On `data: [DONE]` it emits `Done` and
/// returns immediately -- it does not keep reading until the body
/// naturally ends. If the body ends without a `[DONE]` frame, it emits
/// `Done` then. The channel is closed exactly once, by dropping `tx` when
/// this function returns.
pub async fn read_generic_sse(response: reqwest::Response, tx: mpsc::Sender<StreamChunk>, cancel: CancellationToken) {
	let mut events = Box::pin(decode_events(response));

	loop {
		let next = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				let _ = tx.send(StreamChunk::Err(GatewayError::Cancelled)).await;
				return;
			}
			next = events.next() => next,
		};

		let frame = match next {
			Some(Ok(frame)) => frame,
			Some(Err(e)) => {
				let _ = tx.send(StreamChunk::Err(e)).await;
				return;
			},
			None => break,
		};
		let Some(data) = event_data(frame) else {
			continue;
		};
		if data.is_empty() {
			continue;
		}
		if data.as_ref() == b"[DONE]".as_slice() {
			let _ = tx.send(StreamChunk::Done).await;
			return;
		}
		let usage = extract_usage(&data);
		if tx.send(StreamChunk::Data { bytes: data, usage }).await.is_err() {
			return;
		}
	}

	let _ = tx.send(StreamChunk::Done).await;
}

fn extract_usage(data: &[u8]) -> Option<Usage> {
	let v: Value = serde_json::from_slice(data).ok()?;
	let usage = v.get("usage")?;
	let prompt = usage.get("prompt_tokens")?.as_u64()?;
	let completion = usage.get("completion_tokens")?.as_u64()?;
	let total = usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(prompt + completion);
	if total == 0 {
		return None;
	}
	Some(Usage {
		prompt_tokens: prompt,
		completion_tokens: completion,
		total_tokens: total,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_usage_only_when_total_positive() {
		let with_usage = br#"{"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#;
		assert_eq!(extract_usage(with_usage), Some(Usage::new(3, 2)));

		let zero_usage = br#"{"usage":{"prompt_tokens":0,"completion_tokens":0,"total_tokens":0}}"#;
		assert_eq!(extract_usage(zero_usage), None);

		let no_usage = br#"{"choices":[]}"#;
		assert_eq!(extract_usage(no_usage), None);
	}
}
