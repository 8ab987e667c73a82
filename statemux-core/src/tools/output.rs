use std::fmt;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::ToolError;

/// A single block of tool output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// Payload of a `tools/call` result, as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContent {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Text of the first text block, if any
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
        })
    }
}

/// What a tool handler hands back to the gateway.
///
/// `Single` ends the request/response cycle with one payload. `Stream` is a
/// lazy sequence of cumulative snapshots: every item carries the full current
/// answer and replaces the previous one.
pub enum ToolOutput {
    Single(ToolContent),
    Stream(PartialStream),
}

impl ToolOutput {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(content) => f.debug_tuple("Single").field(content).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Result of pulling one step from a [`PartialStream`]
#[derive(Debug)]
pub enum Step {
    Item(Result<ToolContent, ToolError>),
    Cancelled,
    Done,
}

/// Finite, non-restartable, pull-based sequence of partial tool results.
///
/// The producer is only polled from [`PartialStream::next`], which checks the
/// cancellation token before every pull and races it against a pending one.
/// Once cancelled the producer is never polled again.
pub struct PartialStream {
    inner: BoxStream<'static, Result<ToolContent, ToolError>>,
}

impl PartialStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<ToolContent, ToolError>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Build a stream from snapshots that are already known
    pub fn from_snapshots<I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = ToolContent>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures::stream::iter(snapshots.into_iter().map(Ok)))
    }

    pub async fn next(&mut self, cancel: &CancellationToken) -> Step {
        if cancel.is_cancelled() {
            return Step::Cancelled;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            item = self.inner.next() => match item {
                Some(item) => Step::Item(item),
                None => Step::Done,
            },
        }
    }
}
