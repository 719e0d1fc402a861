//! Provider-adapter and rate-control core for a multi-vendor LLM gateway.
//!
//! This crate translates a vendor-neutral chat/embedding request into one of
//! several upstream wire formats (OpenAI-compatible, Anthropic, Google
//! Gemini, Bedrock), streams normalized chunks back to the caller, and
//! enforces per-key throughput and spend budgets. It does not route HTTP,
//! load configuration, or persist anything itself -- those are host
//! concerns; this crate defines the interfaces it consumes from them.

pub mod auth;
pub mod error;
pub mod http_client;
pub mod providers;
pub mod quota;
pub mod ratelimit;
pub mod sse;
pub mod store;
pub mod types;
pub mod workers;

pub use error::GatewayError;
