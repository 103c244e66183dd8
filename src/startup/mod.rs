//! Process startup: logging and configuration summary

mod logger;

pub use logger::{init_logging, StartupLogger};
