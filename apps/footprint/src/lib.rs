//! # Footprint Application Library
//!
//! Server, CLI and configuration for the Footprint binary, exposed as a
//! library so integration tests can drive the router directly.

pub mod api;
pub mod cli;
pub mod config;
pub mod notify;
pub mod services;

pub use config::Config;
pub use services::Services;
