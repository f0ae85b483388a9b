//! Colloquy tools crate - external tool invocation.
//!
//! Parses `TOOL_CALL` directives out of model output, executes them against
//! a tool provider, and drives a bounded self-correction cycle that asks
//! the model to repair failed calls.

pub mod directive;
pub mod error;
pub mod mock;
pub mod provider;
pub mod runner;

pub use directive::{parse_directives, ToolCall, GIVE_UP_MARKER};
pub use error::ToolError;
pub use mock::MockToolProvider;
pub use provider::{HttpToolProvider, ToolProvider, ToolSpec};
pub use runner::ToolRunner;
