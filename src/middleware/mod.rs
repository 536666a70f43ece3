//! Middleware for observability.
//!
//! Request-scoped auth validation lives in `crate::auth::middleware`; this
//! module holds the generic HTTP plumbing.

pub mod logging;

pub use logging::request_logging;
