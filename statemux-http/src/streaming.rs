use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tracing::error;

use crate::jsonrpc::RpcResponse;

const FALLBACK_FRAME: &str =
    r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal server error"},"id":null}"#;

/// One envelope as an SSE `data:` frame
pub fn to_event(frame: &RpcResponse) -> Event {
    Event::default().json_data(frame).unwrap_or_else(|e| {
        error!("failed to encode SSE frame: {}", e);
        Event::default().data(FALLBACK_FRAME)
    })
}

/// SSE body over the emitter's frames. Each poll of the body pulls one frame;
/// dropping the body (client gone) drops the frames with it.
pub fn create_sse_stream<S>(frames: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = RpcResponse> + Send + 'static,
{
    let stream = frames.map(|frame| Ok(to_event(&frame)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
