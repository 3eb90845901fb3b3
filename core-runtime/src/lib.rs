//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the relay crates:
//! - Logging and tracing bootstrap
//! - Session configuration
//! - Typed event bus

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
