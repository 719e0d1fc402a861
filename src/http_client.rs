//! The innermost HTTP transport auth decorators wrap: one client per
//! adapter, safe for concurrent use, reused across requests so connection
//! pooling and (for remote providers) HTTP/2 negotiation amortize across
//! calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;

/// A prepared outbound request. Transports clone this before mutating it
/// (never the caller's original) and hand the clone down the chain.
pub type Request = reqwest::Request;
pub type Response = reqwest::Response;

/// The base request dispatcher: takes a prepared request, returns a
/// response. Auth transports compose by wrapping an `Arc<dyn
/// HttpDispatcher>`.
#[async_trait]
pub trait HttpDispatcher: Send + Sync {
	async fn dispatch(&self, req: Request) -> Result<Response, GatewayError>;
}

/// The process default dispatcher: a single shared `reqwest::Client`.
/// Remote providers get HTTP/2 where the server offers it; Ollama adapters
/// build their own client pinned to HTTP/1.1, since local loopback gains
/// nothing from h2 and some local servers mishandle the upgrade.
#[derive(Clone)]
pub struct ReqwestDispatcher {
	client: reqwest::Client,
}

impl ReqwestDispatcher {
	pub fn new(client: reqwest::Client) -> Self {
		Self { client }
	}

	/// Remote-provider defaults: HTTP/2 allowed, generous but bounded
	/// connect/idle timeouts.
	pub fn remote() -> Self {
		let client = reqwest::Client::builder()
			.connect_timeout(Duration::from_secs(10))
			.build()
			.expect("reqwest client builds with default TLS backend");
		Self::new(client)
	}

	/// Local-provider defaults (Ollama): HTTP/1.1 only.
	pub fn local() -> Self {
		let client = reqwest::Client::builder()
			.http1_only()
			.connect_timeout(Duration::from_secs(10))
			.build()
			.expect("reqwest client builds with default TLS backend");
		Self::new(client)
	}

	pub fn shared() -> Arc<dyn HttpDispatcher> {
		Arc::new(Self::remote())
	}
}

#[async_trait]
impl HttpDispatcher for ReqwestDispatcher {
	async fn dispatch(&self, req: Request) -> Result<Response, GatewayError> {
		self.client.execute(req).await.map_err(GatewayError::from)
	}
}

/// Builds a `POST`/`GET` request with a JSON body and `content-type:
/// application/json`, the shape every adapter's outbound call starts from
/// before an auth transport decorates it.
pub fn json_request<T: serde::Serialize>(method: reqwest::Method, url: reqwest::Url, body: Option<&T>) -> Result<Request, GatewayError> {
	let mut req = Request::new(method, url);
	if let Some(body) = body {
		let bytes = serde_json::to_vec(body).map_err(|e| GatewayError::TranslateFail(e.to_string()))?;
		req.headers_mut().insert(
			reqwest::header::CONTENT_TYPE,
			reqwest::header::HeaderValue::from_static("application/json"),
		);
		*req.body_mut() = Some(bytes.into());
	}
	Ok(req)
}

/// Clones a request the way every auth transport is required to: the
/// caller's original is never touched. `reqwest::Request::try_clone` fails
/// only for streaming (non-buffered) bodies, which auth transports never
/// receive -- request bodies in this crate are always fully-buffered JSON.
pub fn clone_request(req: &Request) -> Result<Request, GatewayError> {
	req.try_clone()
		.ok_or_else(|| GatewayError::TranslateFail("request body is not cloneable (streaming body)".into()))
}
