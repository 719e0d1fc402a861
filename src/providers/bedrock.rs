//! Anthropic-on-Bedrock hosting mode: the wire transport is AWS's binary
//! event stream rather than SSE, carrying Anthropic's own event JSON
//! base64-wrapped inside each frame's payload. This reuses
//! `providers::anthropic::{types, stream}` for the actual Anthropic event
//! semantics -- the only thing that differs from the direct/Vertex path is
//! how bytes turn into one event's JSON, since Bedrock's
//! invoke-with-response-stream API wraps raw Anthropic Messages events
//! rather than speaking its own Converse event shape.

use std::sync::Arc;

use async_trait::async_trait;
use aws_event_stream_parser::{EventStreamCodec, HeaderValue, Message as EventStreamMessage};
use base64::Engine;
use futures_util::TryStreamExt;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthTransport;
use crate::error::GatewayError;
use crate::http_client::json_request;
use crate::providers::{ChunkReceiver, Provider, STREAM_CHANNEL_CAPACITY};
use crate::providers::anthropic::stream::AnthropicStreamState;
use crate::providers::anthropic::translate;
use crate::providers::anthropic::types::{MessagesRequest, MessagesResponse, MessagesStreamEvent};
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderKind, StreamChunk};

/// Bedrock truncates exception type/payload for readability and so a
/// misbehaving upstream can't blow up a log line.
const MAX_EXCEPTION_TYPE_BYTES: usize = 64;
const MAX_EXCEPTION_PAYLOAD_BYTES: usize = 512;

pub struct BedrockAnthropicProvider {
	name: String,
	region: String,
	model: String,
	base_url: reqwest::Url,
	transport: Arc<dyn AuthTransport>,
}

impl BedrockAnthropicProvider {
	pub fn new(name: impl Into<String>, region: impl Into<String>, model: impl Into<String>, transport: Arc<dyn AuthTransport>) -> Result<Self, GatewayError> {
		let region = region.into();
		let base_url = reqwest::Url::parse(&format!("https://bedrock-runtime.{region}.amazonaws.com/"))
			.map_err(|e| GatewayError::TranslateFail(format!("invalid bedrock region {region}: {e}")))?;
		Ok(Self {
			name: name.into(),
			region,
			model: model.into(),
			base_url,
			transport,
		})
	}

	fn invoke_url(&self, streaming: bool) -> Result<reqwest::Url, GatewayError> {
		let action = if streaming { "invoke-with-response-stream" } else { "invoke" };
		self.base_url
			.join(&format!("model/{}/{action}", self.model))
			.map_err(|e| GatewayError::TranslateFail(e.to_string()))
	}

	fn build_body(&self, req: ChatRequest) -> MessagesRequest {
		let mut body = translate::translate_request(req);
		body.model = String::new(); // carried by the URL, not the body
		body
	}
}

#[async_trait]
impl Provider for BedrockAnthropicProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> ProviderKind {
		ProviderKind::Anthropic
	}

	async fn chat_completion(&self, req: ChatRequest, _cancel: CancellationToken) -> Result<ChatResponse, GatewayError> {
		let body = self.build_body(req);
		let url = self.invoke_url(false)?;
		let http_req = json_request(Method::POST, url, Some(&body))?;
		let resp = self.transport.dispatch(http_req).await?;
		let status = resp.status();
		let bytes = resp.bytes().await?;
		if !status.is_success() {
			let truncated = bytes.slice(0..bytes.len().min(super::MAX_ERROR_BODY));
			return Err(GatewayError::upstream(status, truncated));
		}
		let parsed: MessagesResponse = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
		Ok(translate::translate_response(parsed))
	}

	async fn chat_completion_stream(&self, mut req: ChatRequest, cancel: CancellationToken) -> Result<ChunkReceiver, GatewayError> {
		req.stream = true;
		let body = self.build_body(req);
		let url = self.invoke_url(true)?;
		let http_req = json_request(Method::POST, url, Some(&body))?;
		let resp = self.transport.dispatch(http_req).await?;
		let status = resp.status();
		if !status.is_success() {
			let bytes = resp.bytes().await.unwrap_or_default();
			let truncated = bytes.slice(0..bytes.len().min(super::MAX_ERROR_BODY));
			return Err(GatewayError::upstream(status, truncated));
		}
		let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
		tokio::spawn(drive_event_stream(resp, tx, cancel));
		Ok(rx)
	}

	async fn embeddings(&self, _req: EmbeddingRequest, _cancel: CancellationToken) -> Result<EmbeddingResponse, GatewayError> {
		Err(GatewayError::Unsupported("anthropic does not expose an embeddings endpoint"))
	}

	async fn list_models(&self, _cancel: CancellationToken) -> Result<Vec<String>, GatewayError> {
		Err(GatewayError::Unsupported("bedrock model listing is not exposed through the invoke API"))
	}

	async fn health_check(&self, _cancel: CancellationToken) -> Result<(), GatewayError> {
		Ok(())
	}

	async fn proxy_request(&self, req: reqwest::Request, _cancel: CancellationToken) -> Result<reqwest::Response, GatewayError> {
		self.transport.dispatch(req).await
	}
}

#[derive(Deserialize)]
struct EventPayload {
	bytes: String,
}

async fn drive_event_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamChunk>, cancel: CancellationToken) {
	let mut state = AnthropicStreamState::new();
	let byte_stream = resp
		.bytes_stream()
		.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
	let reader = StreamReader::new(byte_stream);
	let mut frames = FramedRead::new(reader, EventStreamCodec);

	loop {
		let next = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				let _ = tx.send(StreamChunk::Err(GatewayError::Cancelled)).await;
				return;
			}
			next = frames.try_next() => next,
		};
		let message = match next {
			Ok(Some(message)) => message,
			Ok(None) => break,
			Err(e) => {
				let _ = tx.send(StreamChunk::Err(GatewayError::DecodeFail(format!("malformed bedrock event-stream frame: {e}")))).await;
				return;
			},
		};
		if !handle_frame(&message, &mut state, &tx).await {
			return;
		}
	}
	let _ = tx.send(StreamChunk::Done).await;
}

fn header_str<'a>(message: &'a EventStreamMessage, key: &str) -> Option<&'a str> {
	message.headers.headers.iter().find(|h| h.key.as_str() == key).and_then(|h| match &h.value {
		HeaderValue::String(s) => Some(s.as_str()),
		_ => None,
	})
}

/// Returns `false` once the stream should stop being driven: the receiver
/// is gone, an exception frame was emitted, or the last chunk sent was
/// `Done` (`message_stop` already closed out the stream and a second
/// `Done` must not follow).
async fn handle_frame(message: &EventStreamMessage, state: &mut AnthropicStreamState, tx: &mpsc::Sender<StreamChunk>) -> bool {
	match header_str(message, ":message-type") {
		Some("exception") => {
			let exception_type = header_str(message, ":exception-type").unwrap_or("unknown").chars().take(MAX_EXCEPTION_TYPE_BYTES).collect::<String>();
			let payload = String::from_utf8_lossy(&message.body);
			let payload: String = payload.chars().take(MAX_EXCEPTION_PAYLOAD_BYTES).collect();
			let _ = tx.send(StreamChunk::Err(GatewayError::UpstreamHttpFail { status: 0, body: format!("{exception_type}: {payload}").into() })).await;
			false
		},
		Some("event") => {
			let Ok(payload) = serde_json::from_slice::<EventPayload>(&message.body) else {
				return true;
			};
			let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(payload.bytes) else {
				return true;
			};
			let Ok(event) = serde_json::from_slice::<MessagesStreamEvent>(&decoded) else {
				return true;
			};
			for chunk in state.handle_event(event) {
				let is_done = matches!(chunk, StreamChunk::Done);
				if tx.send(chunk).await.is_err() {
					return false;
				}
				if is_done {
					return false;
				}
			}
			true
		},
		_ => true,
	}
}
