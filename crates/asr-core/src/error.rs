//! Error types for asr-core.
//!
//! Hot-path ingest is total and never returns an error; everything that can
//! fail is on the slow path (configuration updates, controller startup).

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using the library's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for asr-core.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration update was rejected; the prior configuration stays
    /// installed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The controller task could not be started. The subsystem stays
    /// stopped and the published budget remains at its floor.
    #[error("controller not started: {0}")]
    ControllerUnavailable(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts() {
        let err: Error = ConfigError::TickInterval.into();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("tick_ms"));
    }

    #[test]
    fn controller_error_display() {
        let err = Error::ControllerUnavailable("no runtime");
        assert_eq!(err.to_string(), "controller not started: no runtime");
    }
}
