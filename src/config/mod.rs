//! Configuration module for the streaming server.
//!
//! Provides CLI argument parsing and configuration management.

#[allow(clippy::module_inception)]
mod config;
mod voices;

pub use config::ServerConfig;
