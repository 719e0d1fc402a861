//! SSE frame decoding on top of `tokio_sse_codec`, the same crate the
//! teacher codebase uses for this exact concern (`parse::sse`,
//! `parse::aws_sse`) -- a `tokio_util::codec::Decoder` wrapped around a
//! response body via `FramedRead`, rather than a hand-rolled line scanner.

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use tokio_sse_codec::SseDecoder;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

pub use tokio_sse_codec::{Event, Frame};

use crate::error::GatewayError;

/// Upstreams occasionally emit a single line close to this size (e.g. a
/// large tool-call argument blob) -- generous enough that no legitimate
/// frame is truncated, tight enough to bound a single malicious/
/// misbehaving upstream's memory use.
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// Wraps a streaming HTTP response body into a stream of decoded SSE
/// frames, bounding any single frame to [`MAX_FRAME_BYTES`].
pub fn decode_events(response: reqwest::Response) -> impl Stream<Item = Result<Frame<Bytes>, GatewayError>> {
	let body = response.bytes_stream().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
	let reader = StreamReader::new(body);
	FramedRead::new(reader, SseDecoder::<Bytes>::with_max_size(MAX_FRAME_BYTES)).map_err(|e| GatewayError::DecodeFail(e.to_string()))
}

/// Extracts the `data` payload of an `Event` frame; other frame kinds
/// (comments, retry directives) carry nothing any adapter here acts on.
pub fn event_data(frame: Frame<Bytes>) -> Option<Bytes> {
	match frame {
		Frame::Event(event) => Some(event.data),
		_ => None,
	}
}
