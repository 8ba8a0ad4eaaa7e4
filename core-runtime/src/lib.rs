//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media cache core:
//! - Logging and tracing infrastructure
//! - Configuration management with fail-fast capability checks
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions and the way host capabilities
//! (HTTP transport, file system, clock) are injected into the core.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
