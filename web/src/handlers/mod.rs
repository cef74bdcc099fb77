//! HTTP request handlers.
//!
//! - [`appointments`]: booking intake and record management
//! - [`health`]: welcome, liveness and readiness
//! - [`queue`]: queue depth for operators

pub mod appointments;
pub mod health;
pub mod queue;
