//! # Netplug Plugin System
//!
//! Locates a network-transport plugin that speaks one of several historical
//! ABI generations and presents it through a single current call surface.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`generation`]**: The closed set of supported ABI generations
//!   ([`AbiGeneration`]), the two transport families ([`TransportFamily`]),
//!   and the exact exported symbol name of every (family, generation).
//! - **[`abi`]**: Frozen `#[repr(C)]` table layouts per generation, plus the
//!   adapter (or, for the newest generation, native binding) that presents
//!   each through the current surface.
//! - **[`module`]**: Loaded shared libraries ([`PluginModule`]) and the
//!   [`SymbolSource`](module::SymbolSource) lookup seam.
//! - **[`resolver`]**: One [`VersionedResolver`](resolver::VersionedResolver)
//!   per (family, generation), caching results in a per-module
//!   [`ModuleContext`](resolver::ModuleContext).
//! - **[`tables`]**: Generation-tagged table unions and the family markers
//!   that tie them to their call surface.
//! - **[`loader`]**: The orchestrator ([`PluginLoader`]): opens the library,
//!   runs each family's chain newest first and adopts the first hit.
//! - **[`traits`]**: The current call surface, [`NetTransport`] and
//!   [`CollNetTransport`].
//! - **[`error`]**: Loading and transport error types.
pub mod abi;
pub mod error;
pub mod generation;
pub mod loader;
pub mod module;
pub mod resolver;
pub mod tables;
pub mod traits;

pub use error::{PluginSystemError, TransportError, TransportResult};
pub use generation::{AbiGeneration, TransportFamily};
pub use loader::{FamilySummary, LoadReport, LoadedPlugin, PluginLoader};
pub use module::{PluginModule, SymbolAddr, SymbolSource};
pub use resolver::{ModuleContext, Resolution, VersionedResolver};
pub use tables::{Collective, CollectiveTable, Network, NetworkTable};
pub use traits::{CollNetTransport, NetProperties, NetTransport};

// Test module declaration
#[cfg(test)]
mod tests;
