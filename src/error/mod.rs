//! Error handling module for the CBS refresh scheduler
//!
//! This module provides the error taxonomy shared by the scheduler, the
//! negotiator seam and configuration loading.

mod error;

// Re-export the main error types and utilities
pub use error::{ProtocolCondition, RefreshError, Result};
