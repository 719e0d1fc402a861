//! Error taxonomy shared by auth transports, provider adapters, and the rate
//! control layer: one `thiserror` enum per failure class, each carrying
//! enough context to log at the throw site.

use bytes::Bytes;

/// Every per-request failure path in this crate returns one of these
/// variants; none of them panic.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	#[error("request is unrepresentable in the target wire format: {0}")]
	TranslateFail(String),

	#[error("transport error: {0}")]
	TransportFail(#[from] reqwest::Error),

	#[error("upstream returned {status}: {}", truncated_body(body))]
	UpstreamHttpFail { status: u16, body: Bytes },

	#[error("authentication failed: {0}")]
	AuthFail(String),

	#[error("failed to decode response: {0}")]
	DecodeFail(String),

	#[error("request was cancelled")]
	Cancelled,

	#[error("operation not supported by this provider: {0}")]
	Unsupported(&'static str),
}

impl GatewayError {
	/// Carries the upstream HTTP status for failover decisions by the
	/// router.
	pub fn http_status(&self) -> Option<u16> {
		match self {
			GatewayError::UpstreamHttpFail { status, .. } => Some(*status),
			_ => None,
		}
	}

	/// Error bodies are capped so a misbehaving upstream can't balloon log
	/// output or retry payloads.
	pub fn upstream(status: reqwest::StatusCode, body: Bytes) -> Self {
		const MAX_ERROR_BODY: usize = 4 * 1024;
		let body = if body.len() > MAX_ERROR_BODY {
			body.slice(0..MAX_ERROR_BODY)
		} else {
			body
		};
		GatewayError::UpstreamHttpFail {
			status: status.as_u16(),
			body,
		}
	}
}

fn truncated_body(body: &Bytes) -> String {
	String::from_utf8_lossy(body).into_owned()
}

pub type Result<T> = std::result::Result<T, GatewayError>;
