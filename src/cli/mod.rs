//! CLI-specific functionality for stackctl
//!
//! This module contains all CLI-related code: argument parsing and
//! configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, LifecycleConfig, Operation, OutputFormat, RunMode};
pub use config::ConfigDiscovery;
