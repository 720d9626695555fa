//! HTTP facade handlers
//!
//! JSON in, JSON out, no authentication; the facade binds to localhost.
//! Errors are reported in-band as `{"error": "..."}` with HTTP 200, which
//! is what the web UI expects.

pub mod download;
pub mod health;
pub mod import;
pub mod library;
pub mod search;
pub mod sse;
