//! # Host Bridge Traits
//!
//! Host abstractions the relay core is written against.
//!
//! ## Overview
//!
//! The core crates never talk to the network, the filesystem or the OS keyring
//! directly. They receive trait objects implementing the capabilities below, so
//! the same coordinator and poller run against `reqwest` in production and
//! against in-memory fakes in tests.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP with per-request timeouts
//!
//! ### Storage
//! - [`SecureStore`](storage::SecureStore) - Secret persistence (OS keyring)
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Whole-file reads and writes
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map transport failures to `BridgeError::Network` or
//! `BridgeError::Timeout` so callers can classify them as retryable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across tasks
//! behind an `Arc`.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::{FileSystemAccess, SecureStore};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
