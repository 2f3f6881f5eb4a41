//! # AlphaESS Bridge
//!
//! Polls the AlphaESS cloud for one inverter/battery system and turns the
//! vendor's realtime and statistics payloads into a stable metrics document.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration and validation
//! - `logging`: Structured logging and tracing
//! - `vendor`: Clients for the legacy, portal and open API generations
//! - `credentials`: Access token lifecycle and signing-key discovery
//! - `stats`: Statistics caches with independent refresh cadences
//! - `realtime`: Realtime fetch with one-way fallback to the backup endpoint
//! - `normalize`: Output document construction
//! - `driver`: Poll scheduler and command handling
//! - `sink`: Document sinks (broadcast, stdout)
//! - `web`: HTTP admin and query surface

pub mod config;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod realtime;
pub mod sink;
pub mod stats;
pub mod vendor;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use driver::{BridgeDriver, DriverHandle};
pub use error::{BridgeError, Result};
pub use normalize::OutputDocument;
