//! Bridge between the model's XML tool-invocation dialect and MCP
//!
//! Tool schemas are rendered into prompt templates the model can copy;
//! model output is parsed back into concrete tool calls, resolving
//! between native host tools and protocol-registered tools.

pub mod hybrid;
pub mod parse;
pub mod template;

pub use hybrid::{ExecutionOutcome, HybridBridge, HybridCall, ToolCallKind};
pub use parse::{parse_call, parse_call_with_recovery, strip_thinking, ParsedCall};
pub use template::{example_args, tool_to_template};
