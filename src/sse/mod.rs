//! SSE utilities: `tokio_sse_codec`-based frame decoding, normalized chunk
//! builders, and the generic reader routine used by the OpenAI-compatible
//! adapter. Anthropic and Gemini build their own state machines on top of
//! `frame::decode_events` directly -- see `providers::anthropic::mod` and
//! `providers::gemini::mod`.

pub mod chunks;
pub mod frame;
pub mod reader;

pub use frame::{Event, Frame, MAX_FRAME_BYTES, decode_events, event_data};
pub use reader::read_generic_sse;
