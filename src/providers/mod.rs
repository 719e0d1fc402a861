//! Provider adapters: per-vendor request translation, response
//! translation, and streaming state machine, all implementing one shared
//! contract so callers can hold a `dyn Provider` without knowing the
//! concrete vendor at compile time.

pub mod anthropic;
pub mod bedrock;
pub mod gemini;
pub mod openai_compat;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderKind};

/// Non-streaming response bodies are capped here before JSON decode.
pub const MAX_RESPONSE_BODY: usize = 1024 * 1024;
/// Error bodies are truncated to this many bytes when building `UpstreamHTTPFail`.
pub const MAX_ERROR_BODY: usize = 4 * 1024;

/// Depth of the bounded channel a streaming call's producer task writes
/// into. Chosen generously relative to typical per-chunk latency so a slow
/// consumer rarely backpressures the producer's HTTP read.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

pub type ChunkReceiver = mpsc::Receiver<crate::types::StreamChunk>;

/// The adapter contract surface consumed by a routing layer. Every
/// implementor also exposes `name` (caller-supplied instance label) and
/// `kind` (wire-format identifier).
#[async_trait]
pub trait Provider: Send + Sync {
	fn name(&self) -> &str;
	fn kind(&self) -> ProviderKind;

	async fn chat_completion(&self, req: ChatRequest, cancel: CancellationToken) -> Result<ChatResponse, GatewayError>;

	/// Synchronous errors (bad request, auth failure, non-2xx status) are
	/// returned before the channel exists; once the channel is returned,
	/// per-chunk errors arrive on it instead.
	async fn chat_completion_stream(&self, req: ChatRequest, cancel: CancellationToken) -> Result<ChunkReceiver, GatewayError>;

	async fn embeddings(&self, req: EmbeddingRequest, cancel: CancellationToken) -> Result<EmbeddingResponse, GatewayError>;

	async fn list_models(&self, cancel: CancellationToken) -> Result<Vec<String>, GatewayError>;

	/// A minimal request that succeeds iff the upstream is reachable and
	/// credentials are valid.
	async fn health_check(&self, cancel: CancellationToken) -> Result<(), GatewayError>;

	/// Forwards a raw inbound request to the upstream, letting the adapter
	/// attach provider headers; a routing layer owns writing the result
	/// back to the original caller.
	async fn proxy_request(&self, req: reqwest::Request, cancel: CancellationToken) -> Result<reqwest::Response, GatewayError>;
}

/// Shared helper: read a non-streaming response body, enforcing the cap
/// while the body streams in rather than buffering it whole before
/// checking its length -- an upstream that never stops sending is cut off
/// as soon as the cap is crossed instead of being read fully into memory
/// first. Turns non-2xx statuses into `UpstreamHTTPFail` with a
/// 4 KiB-truncated body.
pub(crate) async fn read_body_checked(resp: reqwest::Response) -> Result<bytes::Bytes, GatewayError> {
	use futures_util::StreamExt;

	let status = resp.status();
	let cap = if status.is_success() { MAX_RESPONSE_BODY } else { MAX_ERROR_BODY };
	let mut stream = resp.bytes_stream();
	let mut buf = bytes::BytesMut::new();

	while let Some(chunk) = stream.next().await {
		let chunk = chunk?;
		if buf.len() + chunk.len() > cap {
			if status.is_success() {
				return Err(GatewayError::DecodeFail(format!("response body exceeds the {cap} byte cap")));
			}
			// Error bodies are truncated for display, not rejected: take
			// enough to fill the cap and stop reading the rest.
			let remaining = cap - buf.len();
			buf.extend_from_slice(&chunk[..remaining]);
			break;
		}
		buf.extend_from_slice(&chunk);
	}

	let bytes = buf.freeze();
	if !status.is_success() {
		return Err(GatewayError::upstream(status, bytes));
	}
	Ok(bytes)
}
