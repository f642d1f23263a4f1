// Versioned network-plugin loading for the collective runtime.
pub mod config;
pub mod kernel;
pub mod plugin_system;

// Re-export key public types/traits for easier use by the binary.
pub use config::LoaderConfig;
pub use kernel::error::{Error, Result};
pub use plugin_system::{
    AbiGeneration, CollNetTransport, LoadReport, LoadedPlugin, NetTransport, PluginLoader,
    PluginModule, TransportFamily,
};
