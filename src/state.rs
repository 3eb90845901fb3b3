//! Shared application state type.

use core_service::CoreService;

/// Application state shared across all handlers.
///
/// `CoreService` is reference-counted internally, so cloning per request is cheap.
pub type AppState = CoreService;
