//! Shared data structures, configuration, and external-collaborator interfaces
//! for the host-and-service observability platform.
//!
//! This crate contains the types and traits that the `engine` crate's
//! scheduler, checkers, and notifier operate against, plus the minimal
//! in-memory implementations needed to run the `server` binary end to end.

pub mod config;
pub mod crypter;
pub mod defaults;
pub mod error;
pub mod metrics;
pub mod model;
pub mod preferences;
pub mod repo;
pub mod session;
pub mod utils;
pub mod wire;

pub use error::{AppError, ErrorKind};
pub use model::{CheckHistory, CheckResult, Detector, DetectorType, Host, State};

/// Result type alias used throughout the shared crate and its dependents.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {}
}
