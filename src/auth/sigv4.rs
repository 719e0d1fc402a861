//! AWS SigV4 transport: signs the fully-buffered request body and applies
//! the resulting `Authorization`/`X-Amz-*` headers. Same
//! collect-body/SignableRequest/SigningParams/sign pipeline used for
//! Bedrock, generalized to a caller-supplied region and service name so the
//! same transport can sign any SigV4-protected AWS endpoint, not only
//! Bedrock invoke calls.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials as AwsCredentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4::SigningParams;
use reqwest::header::{HeaderName, HeaderValue};
use tokio::sync::OnceCell;

use crate::auth::AuthTransport;
use crate::error::GatewayError;
use crate::http_client::{HttpDispatcher, ReqwestDispatcher, Request, Response};

static SDK_CONFIG: OnceCell<aws_config::SdkConfig> = OnceCell::const_new();

async fn default_sdk_config() -> &'static aws_config::SdkConfig {
	SDK_CONFIG.get_or_init(|| async { aws_config::load_defaults(BehaviorVersion::latest()).await }).await
}

/// Explicit keys, or fall through to the ambient provider chain
/// (environment, instance profile, web identity) via `aws-config`.
pub enum AwsCredentialSource {
	Explicit {
		access_key_id: String,
		secret_access_key: String,
		session_token: Option<String>,
	},
	Implicit,
}

/// Signs requests for one `(region, service)` pair, e.g.
/// `("us-east-1", "bedrock")`. Bedrock invoke/invoke-with-response-stream
/// calls are the only caller today but the signer itself is
/// service-agnostic.
pub struct AwsSigV4Transport {
	region: String,
	service: String,
	credentials: AwsCredentialSource,
	base: Arc<dyn HttpDispatcher>,
}

impl AwsSigV4Transport {
	pub fn new(region: impl Into<String>, service: impl Into<String>, credentials: AwsCredentialSource) -> Self {
		Self::with_base(region, service, credentials, ReqwestDispatcher::shared())
	}

	pub fn with_base(region: impl Into<String>, service: impl Into<String>, credentials: AwsCredentialSource, base: Arc<dyn HttpDispatcher>) -> Self {
		Self {
			region: region.into(),
			service: service.into(),
			credentials,
			base,
		}
	}

	async fn resolve_credentials(&self) -> Result<AwsCredentials, GatewayError> {
		match &self.credentials {
			AwsCredentialSource::Explicit {
				access_key_id,
				secret_access_key,
				session_token,
			} => {
				let mut builder = AwsCredentials::builder().access_key_id(access_key_id).secret_access_key(secret_access_key).provider_name("llm-gateway-core");
				if let Some(token) = session_token {
					builder = builder.session_token(token);
				}
				Ok(builder.build())
			},
			AwsCredentialSource::Implicit => {
				let config = default_sdk_config().await;
				let provider = config
					.credentials_provider()
					.ok_or_else(|| GatewayError::AuthFail("no AWS credentials provider in default config".into()))?;
				provider
					.provide_credentials()
					.await
					.map_err(|e| GatewayError::AuthFail(format!("failed to resolve AWS credentials: {e}")))
			},
		}
	}
}

#[async_trait]
impl AuthTransport for AwsSigV4Transport {
	async fn dispatch(&self, req: Request) -> Result<Response, GatewayError> {
		let creds = self.resolve_credentials().await?;
		let identity = creds.into();

		let signing_params = SigningParams::builder()
			.identity(&identity)
			.region(&self.region)
			.name(&self.service)
			.time(SystemTime::now())
			.settings(SigningSettings::default())
			.build()
			.map_err(|e| GatewayError::AuthFail(format!("failed to build AWS signing params: {e}")))?
			.into();

		let mut req = crate::http_client::clone_request(&req)?;
		let body = req.body().and_then(|b| b.as_bytes()).map(|b| b.to_vec()).unwrap_or_default();

		let signable_request = SignableRequest::new(
			req.method().as_str(),
			req.url().as_str(),
			req.headers()
				.iter()
				.filter(|(name, _)| *name != reqwest::header::CONTENT_LENGTH)
				.filter_map(|(name, value)| std::str::from_utf8(value.as_bytes()).ok().map(|v| (name.as_str(), v))),
			SignableBody::Bytes(&body),
		)
		.map_err(|e| GatewayError::AuthFail(format!("failed to build signable AWS request: {e}")))?;

		let (instructions, _signature) = sign(signable_request, &signing_params).map_err(|e| GatewayError::AuthFail(format!("failed to sign AWS request: {e}")))?.into_parts();

		for (name, value) in instructions.headers() {
			let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| GatewayError::AuthFail(format!("invalid AWS signing header name {name}: {e}")))?;
			let header_value = HeaderValue::from_str(value).map_err(|e| GatewayError::AuthFail(format!("invalid AWS signing header value: {e}")))?;
			req.headers_mut().insert(header_name, header_value);
		}
		req.headers_mut()
			.insert(reqwest::header::CONTENT_LENGTH, HeaderValue::from_str(&body.len().to_string()).unwrap());
		*req.body_mut() = Some(body.into());

		self.base.dispatch(req).await
	}
}

#[cfg(test)]
mod tests {
	use sha2::{Digest, Sha256};

	use super::*;

	/// Captures the request the transport forwards to its base, instead of
	/// actually dispatching over the network.
	struct CapturingDispatcher {
		captured: std::sync::Mutex<Option<Request>>,
	}

	#[async_trait]
	impl HttpDispatcher for CapturingDispatcher {
		async fn dispatch(&self, req: Request) -> Result<Response, GatewayError> {
			*self.captured.lock().unwrap() = Some(req);
			Err(GatewayError::AuthFail("test dispatcher never sends".into()))
		}
	}

	#[tokio::test]
	async fn empty_body_hashes_to_the_empty_string_sha256() {
		let capturing = Arc::new(CapturingDispatcher { captured: std::sync::Mutex::new(None) });
		let transport = AwsSigV4Transport::with_base(
			"us-east-1",
			"bedrock",
			AwsCredentialSource::Explicit {
				access_key_id: "AKIAEXAMPLE".into(),
				secret_access_key: "secretexample".into(),
				session_token: None,
			},
			capturing.clone(),
		);
		let req = reqwest::Client::new()
			.post("https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-v2/invoke")
			.build()
			.unwrap();
		let _ = transport.dispatch(req).await;

		let forwarded = capturing.captured.lock().unwrap().take().expect("signing must forward a request to the base dispatcher");
		let body_bytes = forwarded.body().and_then(|b| b.as_bytes()).unwrap_or(&[]);
		assert!(body_bytes.is_empty());
		assert_eq!(forwarded.headers().get(reqwest::header::CONTENT_LENGTH).unwrap(), "0");

		let hash = Sha256::digest(body_bytes);
		let expected = Sha256::digest(b"");
		assert_eq!(hash.as_slice(), expected.as_slice());
	}
}
