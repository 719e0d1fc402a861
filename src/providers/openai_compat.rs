//! OpenAI-compatible adapter: OpenAI itself and local Ollama. Direct
//! passthrough of the neutral format -- it IS the OpenAI wire shape -- so
//! this adapter is mostly plumbing: pick the right base URL/paths, dispatch
//! through the auth transport, and for Ollama prefer its native
//! `/api/tags` listing endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthTransport;
use crate::error::GatewayError;
use crate::http_client::json_request;
use crate::providers::{Provider, STREAM_CHANNEL_CAPACITY, read_body_checked};
use crate::sse::read_generic_sse;
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderKind};

/// Ollama doesn't speak the OpenAI `/models` listing shape; it has its own
/// `/api/tags` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
	OpenAi,
	Ollama,
}

pub struct OpenAiCompatProvider {
	name: String,
	flavor: Flavor,
	base_url: reqwest::Url,
	transport: Arc<dyn AuthTransport>,
}

impl OpenAiCompatProvider {
	pub fn new(name: impl Into<String>, flavor: Flavor, base_url: reqwest::Url, transport: Arc<dyn AuthTransport>) -> Self {
		Self {
			name: name.into(),
			flavor,
			base_url,
			transport,
		}
	}

	fn url(&self, path: &str) -> Result<reqwest::Url, GatewayError> {
		self.base_url.join(path).map_err(|e| GatewayError::TranslateFail(format!("invalid path {path}: {e}")))
	}
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> ProviderKind {
		match self.flavor {
			Flavor::OpenAi => ProviderKind::OpenAi,
			Flavor::Ollama => ProviderKind::Ollama,
		}
	}

	async fn chat_completion(&self, mut req: ChatRequest, _cancel: CancellationToken) -> Result<ChatResponse, GatewayError> {
		req.stream = false;
		let http_req = json_request(Method::POST, self.url("chat/completions")?, Some(&req))?;
		let resp = self.transport.dispatch(http_req).await?;
		let bytes = read_body_checked(resp).await?;
		serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))
	}

	async fn chat_completion_stream(&self, mut req: ChatRequest, cancel: CancellationToken) -> Result<super::ChunkReceiver, GatewayError> {
		req.stream = true;
		let http_req = json_request(Method::POST, self.url("chat/completions")?, Some(&req))?;
		let resp = self.transport.dispatch(http_req).await?;
		let status = resp.status();
		if !status.is_success() {
			let body = resp.bytes().await.unwrap_or_default();
			let truncated = body.slice(0..body.len().min(super::MAX_ERROR_BODY));
			return Err(GatewayError::upstream(status, truncated));
		}
		let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
		tokio::spawn(read_generic_sse(resp, tx, cancel));
		Ok(rx)
	}

	async fn embeddings(&self, req: EmbeddingRequest, _cancel: CancellationToken) -> Result<EmbeddingResponse, GatewayError> {
		let http_req = json_request(Method::POST, self.url("embeddings")?, Some(&req))?;
		let resp = self.transport.dispatch(http_req).await?;
		let bytes = read_body_checked(resp).await?;
		serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))
	}

	async fn list_models(&self, _cancel: CancellationToken) -> Result<Vec<String>, GatewayError> {
		match self.flavor {
			Flavor::OpenAi => {
				#[derive(Deserialize)]
				struct ModelsList {
					data: Vec<ModelEntry>,
				}
				#[derive(Deserialize)]
				struct ModelEntry {
					id: String,
				}
				let http_req = json_request::<()>(Method::GET, self.url("models")?, None)?;
				let resp = self.transport.dispatch(http_req).await?;
				let bytes = read_body_checked(resp).await?;
				let list: ModelsList = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
				Ok(list.data.into_iter().map(|m| m.id).collect())
			},
			Flavor::Ollama => {
				#[derive(Deserialize)]
				struct TagsList {
					models: Vec<TagEntry>,
				}
				#[derive(Deserialize)]
				struct TagEntry {
					name: String,
				}
				let http_req = json_request::<()>(Method::GET, self.url("api/tags")?, None)?;
				let resp = self.transport.dispatch(http_req).await?;
				let bytes = read_body_checked(resp).await?;
				let list: TagsList = serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeFail(e.to_string()))?;
				Ok(list.models.into_iter().map(|m| m.name).collect())
			},
		}
	}

	async fn health_check(&self, cancel: CancellationToken) -> Result<(), GatewayError> {
		self.list_models(cancel).await.map(|_| ())
	}

	async fn proxy_request(&self, req: reqwest::Request, _cancel: CancellationToken) -> Result<reqwest::Response, GatewayError> {
		self.transport.dispatch(req).await
	}
}
