pub mod builtin;
mod output;
mod registry;

pub use output::{ContentBlock, PartialStream, Step, ToolContent, ToolOutput};
pub use registry::ToolRegistry;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {0} not found")]
    UnknownTool(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn execution(err: impl std::fmt::Display) -> Self {
        Self::Execution(err.to_string())
    }
}

/// Typed input of a tool. The JSON schema advertised in `tools/list` is derived
/// from the same type that arguments are deserialized into.
pub trait ToolArgs: DeserializeOwned + JsonSchema + Send + 'static {
    /// Constraints the schema types alone cannot express
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Per-invocation context handed to a tool
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Caller's request id, rendered for logging
    pub request_id: String,
    /// Set when the invocation is cancelled. Streaming producers should check it
    /// between steps.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(request_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            request_id: request_id.into(),
            cancel,
        }
    }
}

/// Tool descriptor as advertised by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Args: ToolArgs;

    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    async fn execute(&self, args: Self::Args, ctx: ToolContext) -> Result<ToolOutput, ToolError>;
}

pub type ToolFuture = BoxFuture<'static, Result<ToolOutput, ToolError>>;

/// Object-safe view of a [`Tool`], as stored in the registry.
///
/// `prepare` validates the raw arguments and only then hands back the future
/// that runs the handler, so a validation failure never executes tool code.
pub trait ToolHandler: Send + Sync {
    fn describe(&self) -> ToolDescription;
    fn prepare(self: Arc<Self>, arguments: Value, ctx: ToolContext) -> Result<ToolFuture, ToolError>;
}

impl<T: Tool> ToolHandler for T {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: schemars::schema_for!(T::Args).to_value(),
        }
    }

    fn prepare(self: Arc<Self>, arguments: Value, ctx: ToolContext) -> Result<ToolFuture, ToolError> {
        let args: T::Args = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        args.validate().map_err(ToolError::InvalidArguments)?;

        Ok(Box::pin(async move { self.execute(args, ctx).await }))
    }
}
