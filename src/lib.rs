//! CBS refresh - keeps the security token of a long-lived connection renewed
//!
//! This crate provides a refresh scheduler that negotiates a short-lived
//! claims-based-security token, renews it in the background ahead of its
//! server-reported expiry, and can be superseded, stopped and disposed safely
//! from any task.

pub mod auth;
pub mod config;
pub mod error;
pub mod startup;

pub use auth::{
    ConnectionIdentity, FixedLifetimeNegotiator, LoopExit, NegotiationRequest, RefreshEvent,
    RefreshScheduler, RefreshStats, TokenExpiry, TokenNegotiator,
};
pub use config::{Config, LoggingConfig, RefreshConfig};
pub use error::{ProtocolCondition, RefreshError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "cbs-refresh.yaml";
