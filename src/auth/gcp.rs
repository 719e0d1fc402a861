//! GCP OAuth2 bearer transport (application-default credentials): a
//! process-wide `OnceCell<Credentials>` built from
//! `google_cloud_auth::credentials::Builder::default()`, whose `.headers()`
//! call is itself cached and refresh-safe -- we just pull the
//! `Authorization` header back out of the `HeaderMap` it returns.

use std::sync::Arc;

use async_trait::async_trait;
use google_cloud_auth::credentials::{CacheableResource, Credentials};
use tokio::sync::OnceCell;

use crate::auth::AuthTransport;
use crate::error::GatewayError;
use crate::http_client::{HttpDispatcher, ReqwestDispatcher, Request, Response};

static CREDS: OnceCell<Credentials> = OnceCell::const_new();

async fn creds() -> Result<&'static Credentials, GatewayError> {
	CREDS
		.get_or_try_init(|| async {
			google_cloud_auth::credentials::Builder::default()
				.build()
				.map_err(|e| GatewayError::AuthFail(format!("failed to build GCP credentials: {e}")))
		})
		.await
}

async fn bearer_header_value() -> Result<reqwest::header::HeaderValue, GatewayError> {
	let creds = creds().await?;
	let resolved = creds
		.headers(http::Extensions::new())
		.await
		.map_err(|e| GatewayError::AuthFail(format!("failed to obtain GCP token: {e}")))?;
	let headers = match resolved {
		CacheableResource::New { data, .. } => data,
		CacheableResource::NotModified => {
			return Err(GatewayError::AuthFail(
				"GCP credential cache returned NotModified on first use".into(),
			));
		},
	};
	let auth = headers
		.get(http::header::AUTHORIZATION)
		.ok_or_else(|| GatewayError::AuthFail("GCP credentials produced no authorization header".into()))?;
	reqwest::header::HeaderValue::from_bytes(auth.as_bytes())
		.map_err(|e| GatewayError::AuthFail(format!("invalid GCP token header: {e}")))
}

/// Lazily obtains a token from application-default credentials and writes
/// `Authorization: Bearer <access-token>`. If the token source errors, the
/// HTTP call is never issued.
pub struct GcpOAuthTransport {
	base: Arc<dyn HttpDispatcher>,
}

impl GcpOAuthTransport {
	pub fn new() -> Self {
		Self::with_base(ReqwestDispatcher::shared())
	}

	pub fn with_base(base: Arc<dyn HttpDispatcher>) -> Self {
		Self { base }
	}
}

impl Default for GcpOAuthTransport {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl AuthTransport for GcpOAuthTransport {
	async fn dispatch(&self, req: Request) -> Result<Response, GatewayError> {
		let mut value = bearer_header_value().await?;
		value.set_sensitive(true);
		let mut req = crate::http_client::clone_request(&req)?;
		req.headers_mut().insert(reqwest::header::AUTHORIZATION, value);
		self.base.dispatch(req).await
	}
}
