//! Configuration module for the CBS refresh scheduler
//!
//! This module provides configuration management and loading utilities.

mod config;

// Re-export the main configuration types
pub use config::{Config, EnvVars, LoggingConfig, RefreshConfig};
