//! Gemini `generateContent` adapter: direct and Vertex hosting modes.
//! The direct-vs-hosted endpoint/header split mirrors the Anthropic
//! adapter's Vertex mode in this crate, but Gemini's own request,
//! response, and stream shapes are specific to this module.

pub mod stream;
pub mod translate;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::AuthTransport;
use crate::error::GatewayError;
use crate::http_client::json_request;
use crate::providers::gemini::stream::GeminiStreamState;
use crate::providers::gemini::types::{EmbedContentRequest, EmbedContentResponse, GeminiErrorResponse, GenerateContentResponse};
use crate::providers::{ChunkReceiver, Provider, STREAM_CHANNEL_CAPACITY, read_body_checked};
use crate::sse::{decode_events, event_data};
use crate::types::{ChatRequest, ChatResponse, EmbeddingData, EmbeddingRequest, EmbeddingResponse, ProviderKind, StreamChunk, Usage};

#[derive(Clone)]
pub enum HostingMode {
	Direct,
	/// `{base}/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:{action}`
	Vertex { project: String, region: String },
}

pub struct GeminiProvider {
	name: String,
	hosting: HostingMode,
	base_url: reqwest::Url,
	transport: Arc<dyn AuthTransport>,
}

impl GeminiProvider {
	pub fn direct(name: impl Into<String>, base_url: reqwest::Url, transport: Arc<dyn AuthTransport>) -> Self {
		Self {
			name: name.into(),
			hosting: HostingMode::Direct,
			base_url,
			transport,
		}
	}

	pub fn vertex(name: impl Into<String>, base_url: reqwest::Url, project: impl Into<String>, region: impl Into<String>, transport: Arc<dyn AuthTransport>) -> Self {
		Self {
			name: name.into(),
			hosting: HostingMode::Vertex {
				project: project.into(),
				region: region.into(),
			},
			base_url,
			transport,
		}
	}

	fn endpoint(&self, model: &str, action: &str) -> Result<reqwest::Url, GatewayError> {
		let path = match &self.hosting {
			HostingMode::Direct => format!("models/{model}:{action}"),
			HostingMode::Vertex { project, region } => {
				format!("v1/projects/{project}/locations/{region}/publishers/google/models/{model}:{action}")
			},
		};
		self.base_url.join(&path).map_err(|e| GatewayError::TranslateFail(format!("invalid gemini endpoint: {e}")))
	}
}

#[async_trait]
impl Provider for GeminiProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> ProviderKind {
		ProviderKind::Gemini
	}

	async fn chat_completion(&self, req: ChatRequest, _cancel: CancellationToken) -> Result<ChatResponse, GatewayError> {
		let model = req.model.clone();
		let body = translate::translate_request(req);
		let url = self.endpoint(&model, "generateContent")?;
		let http_req = json_request(Method::POST, url, Some(&body))?;
		let resp = self.transport.dispatch(http_req).await?;
		let status = resp.status();
		let bytes = resp.bytes().await?;
		if !status.is_success() {
			if let Ok(err) = serde_json::from_slice::<GeminiErrorResponse>(&bytes) {
				return Err(translate::translate_error(err));
			}
			let truncated = bytes.slice(0..bytes.len().min(super::MAX_ERROR_BODY));
			return Err(GatewayError::upstream(status, truncated));
		}
		let parsed: GenerateContentResponse = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
		let id = Uuid::now_v7().to_string();
		Ok(translate::translate_response(parsed, &model, id))
	}

	async fn chat_completion_stream(&self, req: ChatRequest, cancel: CancellationToken) -> Result<ChunkReceiver, GatewayError> {
		let model = req.model.clone();
		let body = translate::translate_request(req);
		let mut url = self.endpoint(&model, "streamGenerateContent")?;
		url.query_pairs_mut().append_pair("alt", "sse");
		let http_req = json_request(Method::POST, url, Some(&body))?;
		let resp = self.transport.dispatch(http_req).await?;
		let status = resp.status();
		if !status.is_success() {
			let bytes = resp.bytes().await.unwrap_or_default();
			let truncated = bytes.slice(0..bytes.len().min(super::MAX_ERROR_BODY));
			return Err(GatewayError::upstream(status, truncated));
		}
		let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
		let message_id = Uuid::now_v7().to_string();
		tokio::spawn(drive_sse(resp, message_id, model, tx, cancel));
		Ok(rx)
	}

	async fn embeddings(&self, req: EmbeddingRequest, _cancel: CancellationToken) -> Result<EmbeddingResponse, GatewayError> {
		let text = req.input.first().to_string();
		let body = EmbedContentRequest {
			content: types::Content {
				role: None,
				parts: vec![types::Part::text(text)],
			},
		};
		let url = self.endpoint(&req.model, "embedContent")?;
		let http_req = json_request(Method::POST, url, Some(&body))?;
		let resp = self.transport.dispatch(http_req).await?;
		let bytes = read_body_checked(resp).await?;
		let parsed: EmbedContentResponse = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
		Ok(EmbeddingResponse {
			object: "list",
			data: vec![EmbeddingData {
				object: "embedding",
				embedding: parsed.embedding.values,
				index: 0,
			}],
			model: req.model,
			// Gemini's embedContent response carries no token accounting.
			usage: Usage::default(),
		})
	}

	async fn list_models(&self, _cancel: CancellationToken) -> Result<Vec<String>, GatewayError> {
		let url = self.base_url.join("models").map_err(|e| GatewayError::TranslateFail(e.to_string()))?;
		let http_req = json_request::<()>(Method::GET, url, None)?;
		let resp = self.transport.dispatch(http_req).await?;
		let bytes = read_body_checked(resp).await?;
		#[derive(serde::Deserialize)]
		struct ModelsList {
			models: Vec<ModelEntry>,
		}
		#[derive(serde::Deserialize)]
		struct ModelEntry {
			name: String,
		}
		let list: ModelsList = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
		Ok(list.models.into_iter().map(|m| m.name).collect())
	}

	async fn health_check(&self, cancel: CancellationToken) -> Result<(), GatewayError> {
		self.list_models(cancel).await.map(|_| ())
	}

	async fn proxy_request(&self, req: reqwest::Request, _cancel: CancellationToken) -> Result<reqwest::Response, GatewayError> {
		self.transport.dispatch(req).await
	}
}

/// Drives the `alt=sse` body -- ordinary SSE framing, but each `data:`
/// line is a full, independent JSON frame rather than part of a named
/// event taxonomy -- into `GeminiStreamState`.
async fn drive_sse(resp: reqwest::Response, message_id: String, model: String, tx: mpsc::Sender<StreamChunk>, cancel: CancellationToken) {
	use futures_util::StreamExt;

	let mut state = GeminiStreamState::new(message_id, model);
	let mut events = Box::pin(decode_events(resp));

	'outer: loop {
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
		let Ok(parsed) = serde_json::from_slice::<GenerateContentResponse>(&data) else {
			continue; // ignore unparseable frames, matching the Anthropic reader's tolerance
		};
		for chunk in state.handle_frame(parsed) {
			if tx.send(chunk).await.is_err() {
				break 'outer;
			}
		}
	}
	for chunk in state.finish() {
		if tx.send(chunk).await.is_err() {
			return;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn direct_endpoint_has_no_project_segment() {
		let transport = Arc::new(crate::auth::static_header::StaticHeaderTransport::new("x-goog-api-key", "", "k").unwrap());
		let provider = GeminiProvider::direct("g", reqwest::Url::parse("https://generativelanguage.googleapis.com/v1beta/").unwrap(), transport);
		let url = provider.endpoint("gemini-1.5-pro", "generateContent").unwrap();
		assert!(url.as_str().ends_with("models/gemini-1.5-pro:generateContent"));
	}

	#[test]
	fn vertex_endpoint_includes_project_and_region() {
		let transport = Arc::new(crate::auth::static_header::StaticHeaderTransport::new("x-goog-api-key", "", "k").unwrap());
		let provider = GeminiProvider::vertex(
			"g",
			reqwest::Url::parse("https://us-central1-aiplatform.googleapis.com/").unwrap(),
			"proj",
			"us-central1",
			transport,
		);
		let url = provider.endpoint("gemini-1.5-pro", "generateContent").unwrap();
		assert!(url.as_str().contains("v1/projects/proj/locations/us-central1/publishers/google/models/gemini-1.5-pro:generateContent"));
	}
}
