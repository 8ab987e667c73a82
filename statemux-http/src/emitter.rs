//! Turns tool output into JSON-RPC envelopes.
//!
//! Streamed output is pulled by the response body itself: the producer is only
//! asked for its next snapshot once the previous frame has been taken by the
//! body, so a slow or departed client never lets it run ahead. Each frame
//! carries the full current snapshot, correlated by the request id; the stream
//! ends without a terminator frame.

use std::fmt;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use statemux_core::{PartialStream, Step, ToolContent};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::GatewayError;
use crate::jsonrpc::RpcResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Producer exhausted, every frame delivered
    Completed { frames: usize },
    /// Response dropped or invocation cancelled
    Cancelled { frames: usize },
    /// Producer failed; an error envelope ended the stream
    Failed { frames: usize },
}

impl fmt::Display for EmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { frames } => write!(f, "✓ ({} frames)", frames),
            Self::Cancelled { frames } => write!(f, "⊘ cancelled after {} frames", frames),
            Self::Failed { frames } => write!(f, "✗ failed after {} frames", frames),
        }
    }
}

/// Envelope for a single-shot result
pub fn single(request_id: Value, content: &ToolContent) -> Result<RpcResponse, GatewayError> {
    let result = serde_json::to_value(content).map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(RpcResponse::success(request_id, result))
}

/// Bookkeeping for one streamed response. Reports its outcome exactly once,
/// when it is dropped; a drop before an outcome was recorded means the
/// consumer went away, which cancels the invocation.
struct Emission<F: FnOnce(EmitOutcome)> {
    cancel: CancellationToken,
    frames: usize,
    outcome: Option<EmitOutcome>,
    on_finish: Option<F>,
}

impl<F: FnOnce(EmitOutcome)> Emission<F> {
    fn finish(&mut self, outcome: fn(usize) -> EmitOutcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome(self.frames));
        }
    }
}

impl<F: FnOnce(EmitOutcome)> Drop for Emission<F> {
    fn drop(&mut self) {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => {
                self.cancel.cancel();
                EmitOutcome::Cancelled { frames: self.frames }
            }
        };
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(outcome);
        }
    }
}

/// Lazily wrap `stream` into envelopes for `request_id`.
///
/// Nothing is pulled from the producer until the returned stream is polled.
/// Dropping it before the end fires `cancel`, and the producer is not pulled
/// again. `on_finish` runs once with the outcome, however the stream ends.
pub fn emit_stream<F>(
    request_id: Value,
    mut stream: PartialStream,
    cancel: CancellationToken,
    on_finish: F,
) -> BoxStream<'static, RpcResponse>
where
    F: FnOnce(EmitOutcome) + Send + 'static,
{
    let mut emission = Emission {
        cancel: cancel.clone(),
        frames: 0,
        outcome: None,
        on_finish: Some(on_finish),
    };

    async_stream::stream! {
        loop {
            match stream.next(&cancel).await {
                Step::Item(Ok(content)) => match single(request_id.clone(), &content) {
                    Ok(frame) => {
                        emission.frames += 1;
                        yield frame;
                    }
                    Err(err) => {
                        error!("failed to encode partial result: {}", err);
                        emission.finish(|frames| EmitOutcome::Failed { frames });
                        yield err.to_envelope(request_id.clone());
                        break;
                    }
                },
                Step::Item(Err(err)) => {
                    emission.finish(|frames| EmitOutcome::Failed { frames });
                    yield GatewayError::from(err).to_envelope(request_id.clone());
                    break;
                }
                Step::Done => {
                    emission.finish(|frames| EmitOutcome::Completed { frames });
                    break;
                }
                Step::Cancelled => {
                    emission.finish(|frames| EmitOutcome::Cancelled { frames });
                    break;
                }
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statemux_core::ToolError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn text_of(frame: &RpcResponse) -> String {
        frame.result.as_ref().unwrap()["content"][0]["text"].as_str().unwrap().to_string()
    }

    /// Five snapshots, counting how many were actually produced
    fn counting_stream(produced: Arc<AtomicUsize>) -> PartialStream {
        PartialStream::new(futures::stream::unfold(0usize, move |i| {
            let produced = produced.clone();
            async move {
                if i >= 5 {
                    return None;
                }
                produced.fetch_add(1, Ordering::SeqCst);
                let text = (1..=i + 1).map(|n| format!("p{}", n)).collect::<Vec<_>>().join(" ");
                Some((Ok(ToolContent::text(text)), i + 1))
            }
        }))
    }

    fn recorder() -> (Arc<Mutex<Option<EmitOutcome>>>, impl FnOnce(EmitOutcome) + Send + 'static) {
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        (slot, move |outcome| *sink.lock().unwrap() = Some(outcome))
    }

    #[tokio::test]
    async fn frames_follow_producer_order() {
        let produced = Arc::new(AtomicUsize::new(0));
        let (outcome, on_finish) = recorder();

        let frames: Vec<RpcResponse> = emit_stream(
            json!("req-1"),
            counting_stream(produced),
            CancellationToken::new(),
            on_finish,
        )
        .collect()
        .await;

        assert!(frames.iter().all(|f| f.id == json!("req-1")));
        let texts: Vec<String> = frames.iter().map(text_of).collect();
        assert_eq!(texts, vec!["p1", "p1 p2", "p1 p2 p3", "p1 p2 p3 p4", "p1 p2 p3 p4 p5"]);
        assert_eq!(*outcome.lock().unwrap(), Some(EmitOutcome::Completed { frames: 5 }));
    }

    #[tokio::test]
    async fn nothing_is_produced_until_polled() {
        let produced = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let (outcome, on_finish) = recorder();

        let frames = emit_stream(json!(1), counting_stream(produced.clone()), token.clone(), on_finish);
        tokio::task::yield_now().await;
        assert_eq!(produced.load(Ordering::SeqCst), 0);

        drop(frames);
        assert!(token.is_cancelled());
        assert_eq!(*outcome.lock().unwrap(), Some(EmitOutcome::Cancelled { frames: 0 }));
    }

    #[tokio::test]
    async fn dropped_consumer_stops_producer_before_next_value() {
        let produced = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let (outcome, on_finish) = recorder();

        let mut frames = emit_stream(json!(7), counting_stream(produced.clone()), token.clone(), on_finish);
        assert_eq!(text_of(&frames.next().await.unwrap()), "p1");
        assert_eq!(text_of(&frames.next().await.unwrap()), "p1 p2");
        drop(frames);

        assert_eq!(produced.load(Ordering::SeqCst), 2);
        assert!(token.is_cancelled());
        assert_eq!(*outcome.lock().unwrap(), Some(EmitOutcome::Cancelled { frames: 2 }));
    }

    #[tokio::test]
    async fn cancellation_mid_stream_ends_without_more_frames() {
        let produced = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let (outcome, on_finish) = recorder();

        let mut frames = emit_stream(json!(8), counting_stream(produced.clone()), token.clone(), on_finish);
        assert_eq!(text_of(&frames.next().await.unwrap()), "p1");
        token.cancel();

        assert!(frames.next().await.is_none());
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        drop(frames);
        assert_eq!(*outcome.lock().unwrap(), Some(EmitOutcome::Cancelled { frames: 1 }));
    }

    #[tokio::test]
    async fn producer_error_becomes_error_envelope() {
        let stream = PartialStream::new(futures::stream::iter(vec![
            Ok(ToolContent::text("partial")),
            Err(ToolError::Execution("model crashed".to_string())),
            Ok(ToolContent::text("never sent")),
        ]));
        let (outcome, on_finish) = recorder();

        let frames: Vec<RpcResponse> =
            emit_stream(json!(3), stream, CancellationToken::new(), on_finish).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(text_of(&frames[0]), "partial");

        let error = frames[1].error.as_ref().unwrap();
        assert_eq!(error.code, crate::jsonrpc::TOOL_EXECUTION_ERROR);
        assert_eq!(error.message, "Tool execution failed: model crashed");
        assert_eq!(frames[1].id, json!(3));
        assert_eq!(*outcome.lock().unwrap(), Some(EmitOutcome::Failed { frames: 1 }));
    }

    #[test]
    fn single_wraps_content() {
        let frame = single(json!(1), &ToolContent::text("4")).unwrap();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "result": {"content": [{"type": "text", "text": "4"}]},
                "id": 1
            })
        );
    }
}
