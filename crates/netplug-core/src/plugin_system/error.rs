//! # Netplug Plugin System Errors
//!
//! Defines error types specific to the plugin system.
//!
//! [`PluginSystemError`] covers opening plugin libraries. A missing symbol is
//! never an error at this layer; resolution reports it as
//! [`Resolution::NotFound`](crate::plugin_system::resolver::Resolution::NotFound).
//! [`TransportError`] is what the current call surface returns, including the
//! `Unsupported` case adapters use for capabilities an older generation
//! cannot express.
use std::path::PathBuf;

use crate::plugin_system::abi::FfiStatus;
use crate::plugin_system::generation::AbiGeneration;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Plugin loading failed for '{plugin_id}': {source}")]
    LoadingError {
        plugin_id: String,
        path: Option<PathBuf>,
        #[source]
        source: Box<PluginSystemErrorSource>,
    },

    #[error("No plugin library could be opened (tried {tried} candidate(s))")]
    NoCandidate { tried: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemErrorSource {
    #[error(transparent)]
    Library(#[from] libloading::Error),
}

/// Errors surfaced by [`NetTransport`](crate::plugin_system::traits::NetTransport)
/// and [`CollNetTransport`](crate::plugin_system::traits::CollNetTransport).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Operation '{operation}' is not supported by ABI {generation}")]
    Unsupported {
        operation: &'static str,
        generation: AbiGeneration,
    },

    #[error("Plugin returned {status} from '{operation}'")]
    Plugin {
        operation: &'static str,
        status: FfiStatus,
    },

    #[error("Invalid argument to '{operation}': {message}")]
    InvalidArgument {
        operation: &'static str,
        message: String,
    },

    #[error("Plugin reported success from '{operation}' but returned a null handle")]
    NullResult { operation: &'static str },

    #[error("Transport used before init")]
    NotInitialized,

    #[error("Transport initialized twice without finalize")]
    AlreadyInitialized,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
