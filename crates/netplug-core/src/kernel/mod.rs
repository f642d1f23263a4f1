//! # Netplug Core Kernel
//!
//! Crate-wide pieces shared by the plugin system and the configuration layer:
//!
//! - **Core Constants**: environment variable names, default library stem,
//!   symbol prefixes and log targets, in the `constants` submodule.
//! - **Error Handling**: the crate-level [`Error`](error::Error) type and its
//!   `Result` alias in the `error` submodule.
pub mod constants;
pub mod error;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
