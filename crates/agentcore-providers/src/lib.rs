//! LLM provider layer.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`] — trait every provider implements
//! - [`http_provider::HttpProvider`] — generic OpenAI-compatible HTTP client

pub mod http_provider;
pub mod traits;

pub use http_provider::HttpProvider;
pub use traits::{LlmProvider, LlmRequestConfig};
