use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{PartialStream, Tool, ToolArgs, ToolContent, ToolContext, ToolError, ToolOutput};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StreamChatArgs {
    pub prompt: String,
}

impl ToolArgs for StreamChatArgs {}

/// Canned chat reply, streamed one word at a time.
///
/// Every snapshot carries the whole reply so far.
pub struct StreamChat {
    delay: Duration,
}

impl StreamChat {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn reply(prompt: &str) -> String {
        format!(
            "Hello! Here is my answer about \"{}\". This is a demo of a streaming response. \
             The text shows up a little at a time, as if the model were thinking. \
             A real model integration would forward its own stream from here.",
            prompt
        )
    }
}

impl Default for StreamChat {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl Tool for StreamChat {
    type Args = StreamChatArgs;

    fn name(&self) -> &'static str {
        "stream_chat"
    }

    fn description(&self) -> &'static str {
        "Answer a prompt with a streamed chat response"
    }

    async fn execute(&self, args: StreamChatArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let words: Vec<String> = Self::reply(&args.prompt)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let delay = self.delay;
        let cancel = ctx.cancel;

        let stream = async_stream::stream! {
            let mut full = String::new();
            for word in words {
                let cancelled = tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    break;
                }

                full.push_str(&word);
                full.push(' ');
                yield Ok::<_, ToolError>(ToolContent::text(full.clone()));
            }
        };

        Ok(ToolOutput::Stream(PartialStream::new(stream)))
    }
}
