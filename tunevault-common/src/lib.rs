//! # TuneVault Common Library
//!
//! Shared code for the TuneVault services including:
//! - Error types
//! - Engine event types (EngineEvent enum) and EventBus
//! - Track/batch state vocabulary and the derived-state function
//! - Configuration loading
//! - Text normalization, fingerprinting, and filename utilities

pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod types;

pub use error::{Error, Result};
