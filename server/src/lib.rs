//! # Appointments Server
//!
//! Wires the booking service together and runs it:
//!
//! - [`config`]: environment-driven configuration
//! - [`app`]: backend connections and dependency wiring
//! - [`lifecycle`]: HTTP serving, worker pool and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod lifecycle;

pub use config::{Config, ConfigError};
pub use lifecycle::Application;
