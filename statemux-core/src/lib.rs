pub mod tools;

pub use tools::{
    ContentBlock, PartialStream, Step, Tool, ToolArgs, ToolContent, ToolContext, ToolDescription,
    ToolError, ToolHandler, ToolOutput, ToolRegistry,
};
