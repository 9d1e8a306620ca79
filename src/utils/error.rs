//! The `error` module defines the error type shared by every `botroute`
//! component.
//!
//! The router performs no local recovery: each variant is surfaced to the
//! caller, which owns retry and reporting policy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Required connection configuration is missing or unreadable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A caller supplied a value the router refuses to coerce, such as a
    /// device identifier that is neither a string nor an integer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connecting, opening a channel, binding or publishing failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request id was set with no request scope around the caller.
    #[error("no request scope is active, request id '{0}' was not stored")]
    NoRequestScope(String),

    /// The broker management HTTP API could not be reached or returned
    /// something unexpected.
    #[error("management API error: {0}")]
    ManagementApi(String),
}

impl RouterError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<config::ConfigError> for RouterError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<reqwest::Error> for RouterError {
    fn from(err: reqwest::Error) -> Self {
        Self::ManagementApi(err.to_string())
    }
}

impl From<url::ParseError> for RouterError {
    fn from(err: url::ParseError) -> Self {
        Self::ManagementApi(format!("invalid management URL: {err}"))
    }
}
