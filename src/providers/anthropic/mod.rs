//! Anthropic Messages API adapter: direct and Vertex hosting modes.
//! Bedrock is handled by `providers::bedrock`, which reuses
//! `types`/`stream` from this module but speaks AWS's binary event-stream
//! transport instead of SSE.

pub mod stream;
pub mod translate;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthTransport;
use crate::error::GatewayError;
use crate::http_client::json_request;
use crate::providers::{ChunkReceiver, Provider, STREAM_CHANNEL_CAPACITY, read_body_checked};
use crate::providers::anthropic::stream::AnthropicStreamState;
use crate::providers::anthropic::types::{MessagesErrorResponse, MessagesRequest, MessagesResponse, MessagesStreamEvent};
use crate::sse::{decode_events, event_data};
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderKind, StreamChunk};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_HOST: &str = "https://api.anthropic.com";

#[derive(Clone)]
pub enum HostingMode {
	Direct,
	/// `{base}/v1/projects/{project}/locations/{region}/publishers/anthropic/models/{model}:rawPredict`
	Vertex { project: String, region: String },
}

pub struct AnthropicProvider {
	name: String,
	hosting: HostingMode,
	model_override: Option<String>,
	base_url: reqwest::Url,
	transport: Arc<dyn AuthTransport>,
}

impl AnthropicProvider {
	pub fn direct(name: impl Into<String>, transport: Arc<dyn AuthTransport>) -> Result<Self, GatewayError> {
		Ok(Self {
			name: name.into(),
			hosting: HostingMode::Direct,
			model_override: None,
			base_url: reqwest::Url::parse(DEFAULT_HOST).expect("static url parses"),
			transport,
		})
	}

	pub fn vertex(name: impl Into<String>, base_url: reqwest::Url, project: impl Into<String>, region: impl Into<String>, transport: Arc<dyn AuthTransport>) -> Self {
		Self {
			name: name.into(),
			hosting: HostingMode::Vertex {
				project: project.into(),
				region: region.into(),
			},
			model_override: None,
			base_url,
			transport,
		}
	}

	pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
		self.model_override = Some(model.into());
		self
	}

	fn endpoint(&self, model: &str, streaming: bool) -> Result<reqwest::Url, GatewayError> {
		let path = match &self.hosting {
			HostingMode::Direct => "v1/messages".to_string(),
			HostingMode::Vertex { project, region } => {
				let action = if streaming { "streamRawPredict" } else { "rawPredict" };
				format!("v1/projects/{project}/locations/{region}/publishers/anthropic/models/{model}:{action}")
			},
		};
		self.base_url.join(&path).map_err(|e| GatewayError::TranslateFail(format!("invalid anthropic endpoint: {e}")))
	}

	fn build_request(&self, req: ChatRequest) -> MessagesRequest {
		let mut model = req.model.clone();
		if let Some(m) = &self.model_override {
			model = m.clone();
		}
		let mut body = translate::translate_request(req);
		body.model = model;
		match self.hosting {
			HostingMode::Direct => {},
			HostingMode::Vertex { .. } => {
				// Version moves into the body; header is suppressed; model is
				// carried by the URL, not the body.
				body.anthropic_version = Some(ANTHROPIC_VERSION.to_string());
				body.model = String::new();
			},
		}
		body
	}

	async fn dispatch_json(&self, url: reqwest::Url, body: &MessagesRequest) -> Result<reqwest::Response, GatewayError> {
		let mut http_req = json_request(Method::POST, url, Some(body))?;
		self.apply_hosting_headers(&mut http_req);
		self.transport.dispatch(http_req).await
	}

	/// In `Direct` mode Anthropic requires `anthropic-version` on every
	/// request; `Vertex` carries the version in the body instead and must
	/// not set this header. Shared by `dispatch_json` and `proxy_request`
	/// so a raw passthrough request gets the same treatment as a
	/// translated one.
	fn apply_hosting_headers(&self, req: &mut reqwest::Request) {
		if matches!(self.hosting, HostingMode::Direct) {
			req.headers_mut().insert(
				reqwest::header::HeaderName::from_static("anthropic-version"),
				reqwest::header::HeaderValue::from_static(ANTHROPIC_VERSION),
			);
		}
	}
}

#[async_trait]
impl Provider for AnthropicProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> ProviderKind {
		ProviderKind::Anthropic
	}

	async fn chat_completion(&self, req: ChatRequest, _cancel: CancellationToken) -> Result<ChatResponse, GatewayError> {
		let model = req.model.clone();
		let body = self.build_request(req);
		let url = self.endpoint(&model, false)?;
		let resp = self.dispatch_json(url, &body).await?;
		let status = resp.status();
		let bytes = resp.bytes().await?;
		if !status.is_success() {
			if let Ok(err) = serde_json::from_slice::<MessagesErrorResponse>(&bytes) {
				return Err(translate::translate_error(err));
			}
			let truncated = bytes.slice(0..bytes.len().min(super::MAX_ERROR_BODY));
			return Err(GatewayError::upstream(status, truncated));
		}
		let parsed: MessagesResponse = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
		Ok(translate::translate_response(parsed))
	}

	async fn chat_completion_stream(&self, mut req: ChatRequest, cancel: CancellationToken) -> Result<ChunkReceiver, GatewayError> {
		req.stream = true;
		let model = req.model.clone();
		let body = self.build_request(req);
		let url = self.endpoint(&model, true)?;
		let resp = self.dispatch_json(url, &body).await?;
		let status = resp.status();
		if !status.is_success() {
			let bytes = resp.bytes().await.unwrap_or_default();
			let truncated = bytes.slice(0..bytes.len().min(super::MAX_ERROR_BODY));
			return Err(GatewayError::upstream(status, truncated));
		}
		let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
		tokio::spawn(drive_sse(resp, tx, cancel));
		Ok(rx)
	}

	async fn embeddings(&self, _req: EmbeddingRequest, _cancel: CancellationToken) -> Result<EmbeddingResponse, GatewayError> {
		Err(GatewayError::Unsupported("anthropic does not expose an embeddings endpoint"))
	}

	async fn list_models(&self, _cancel: CancellationToken) -> Result<Vec<String>, GatewayError> {
		let url = self.base_url.join("v1/models").map_err(|e| GatewayError::TranslateFail(e.to_string()))?;
		let http_req = json_request::<()>(Method::GET, url, None)?;
		let resp = self.transport.dispatch(http_req).await?;
		let bytes = read_body_checked(resp).await?;
		#[derive(serde::Deserialize)]
		struct ModelsList {
			data: Vec<ModelEntry>,
		}
		#[derive(serde::Deserialize)]
		struct ModelEntry {
			id: String,
		}
		let list: ModelsList = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
		Ok(list.data.into_iter().map(|m| m.id).collect())
	}

	async fn health_check(&self, cancel: CancellationToken) -> Result<(), GatewayError> {
		self.list_models(cancel).await.map(|_| ())
	}

	async fn proxy_request(&self, mut req: reqwest::Request, _cancel: CancellationToken) -> Result<reqwest::Response, GatewayError> {
		self.apply_hosting_headers(&mut req);
		self.transport.dispatch(req).await
	}
}

/// Drives the SSE body through `decode_events` into the shared
/// `AnthropicStreamState`, preserving ordering: role before content,
/// finish before usage before done.
async fn drive_sse(resp: reqwest::Response, tx: mpsc::Sender<StreamChunk>, cancel: CancellationToken) {
	use futures_util::StreamExt;

	let mut state = AnthropicStreamState::new();
	let mut events = Box::pin(decode_events(resp));

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
		if !emit_event(&data, &mut state, &tx).await {
			// Either the receiver was dropped, or a terminal chunk (an
			// error or `Done`) was already emitted -- either way, stop
			// driving without sending a second `Done` below.
			return;
		}
	}
	let _ = tx.send(StreamChunk::Done).await;
}

/// Returns `false` once the stream should stop being driven: the receiver
/// was dropped, or the last chunk sent was `Done` (`message_stop`
/// already closed out the stream and a second `Done` must not follow).
async fn emit_event(data: &[u8], state: &mut AnthropicStreamState, tx: &mpsc::Sender<StreamChunk>) -> bool {
	let event = match serde_json::from_slice::<MessagesStreamEvent>(data) {
		Ok(e) => e,
		Err(_) => return true, // ignore unparseable events
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
}
