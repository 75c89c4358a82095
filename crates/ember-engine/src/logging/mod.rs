//! Logging setup.
//!
//! Everything in the crate logs through the `log` facade; this module only
//! installs the `env_logger` backend for binaries and tests that want output.

mod init;

pub use init::{init_logging, LoggingConfig};

#[cfg(test)]
pub(crate) use init::init_test_logging;
