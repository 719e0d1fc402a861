//! Authentication transports: composable request decorators that inject
//! credentials on outbound requests. Static key, GCP, and AWS variants
//! each implement the same trait so a provider can be handed any one of
//! them without knowing which.

pub mod gcp;
pub mod sigv4;
pub mod static_header;

pub use gcp::GcpOAuthTransport;
pub use sigv4::AwsSigV4Transport;
pub use static_header::StaticHeaderTransport;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::http_client::{Request, Response};

/// A transport decorates a base dispatcher: given a prepared request, it
/// attaches credentials and forwards to the base. Each implementation
/// clones the request before mutating it so the caller's original request
/// is never touched.
#[async_trait]
pub trait AuthTransport: Send + Sync {
	async fn dispatch(&self, req: Request) -> Result<Response, GatewayError>;
}
