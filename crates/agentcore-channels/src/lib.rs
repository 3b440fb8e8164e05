//! Channel trait and the reference CLI adapter.
//!
//! This crate provides:
//! - **base**: the `Channel` trait that every channel adapter must satisfy
//! - **cli**: the reference CLI adapter used by the `cli` binary

pub mod base;
pub mod cli;

pub use base::Channel;
pub use cli::CliChannel;
