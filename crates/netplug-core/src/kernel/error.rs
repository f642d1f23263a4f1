//! # Netplug Core Errors
//!
//! Defines the crate-level [`Error`] type. Subsystems keep their own typed
//! errors ([`PluginSystemError`], [`TransportError`], [`ConfigError`]) and
//! convert into this one with `?`.
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::plugin_system::error::{PluginSystemError, TransportError};

/// Crate-level error
#[derive(Debug, ThisError)]
pub enum Error {
    /// Library loading and resolution errors
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Errors returned through the transport call surface
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;
