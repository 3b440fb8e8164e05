//! Tool modules for the agent loop.

pub mod base;
pub mod filesystem;
pub mod message;
pub mod registry;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool};
pub use registry::ToolRegistry;
