//! # Plugin loader
//!
//! Opens the configured plugin library, runs each family's resolver chain
//! newest first, and binds the first table found to the current call
//! surface. Every "not there" outcome on this path is non-fatal: a missing
//! library, a family without any known symbol, a family that fails to
//! initialize. The runtime simply continues without that transport.
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::LoaderConfig;
use crate::kernel::constants::{DEFAULT_PLUGIN_STEM, LOG_TARGET_LOADER};
use crate::plugin_system::error::{PluginSystemError, TransportError};
use crate::plugin_system::generation::{AbiGeneration, TransportFamily};
use crate::plugin_system::module::{PluginModule, SymbolSource};
use crate::plugin_system::resolver::{FamilyTables, ModuleContext, Resolution, VersionedResolver};
use crate::plugin_system::tables::{Collective, Network};
use crate::plugin_system::traits::{CollNetTransport, NetTransport};

/// Platform file name for a plugin library stem, e.g. `libnetplug-net.so`.
pub fn library_file_name(stem: &str) -> String {
    format!("{}{}{}", DLL_PREFIX, stem, DLL_SUFFIX)
}

/// Whether a configured plugin name should be used verbatim.
fn looks_like_file(name: &str) -> bool {
    has_separator(name) || name.ends_with(DLL_SUFFIX)
}

fn has_separator(name: &str) -> bool {
    name.contains('/') || name.contains(std::path::MAIN_SEPARATOR)
}

pub struct PluginLoader {
    config: LoaderConfig,
}

impl PluginLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Library paths to try, in order.
    ///
    /// Empty when loading is disabled. A bare file name is tried under every
    /// search directory first and then handed to the system loader as is.
    pub fn candidates(&self) -> Vec<PathBuf> {
        if self.config.is_disabled() {
            return Vec::new();
        }
        let names = match self.config.plugin.as_deref() {
            None => vec![library_file_name(DEFAULT_PLUGIN_STEM)],
            Some(name) if looks_like_file(name) => vec![name.to_string()],
            Some(name) => vec![
                library_file_name(&format!("{}-{}", DEFAULT_PLUGIN_STEM, name)),
                name.to_string(),
            ],
        };

        let mut candidates = Vec::new();
        for name in names {
            if !has_separator(&name) {
                candidates.extend(self.config.search_paths.iter().map(|dir| dir.join(&name)));
            }
            candidates.push(PathBuf::from(name));
        }
        candidates
    }

    /// Open the first candidate library that loads.
    ///
    /// `Ok(None)` when plugin loading is disabled.
    pub fn open_library(&self) -> Result<Option<PluginModule>, PluginSystemError> {
        if self.config.is_disabled() {
            info!(target: LOG_TARGET_LOADER, "Network plugin loading disabled");
            return Ok(None);
        }
        let candidates = self.candidates();
        for candidate in &candidates {
            match PluginModule::open(candidate) {
                Ok(module) => {
                    info!(target: LOG_TARGET_LOADER, "Loaded plugin library {}", candidate.display());
                    return Ok(Some(module));
                }
                Err(e) => {
                    info!(target: LOG_TARGET_LOADER, "Could not open {}: {}", candidate.display(), e);
                }
            }
        }
        Err(PluginSystemError::NoCandidate {
            tried: candidates.len(),
        })
    }

    /// Open the configured library and adopt its transports.
    ///
    /// `None` when no library could be opened; the runtime then runs without
    /// a network plugin.
    pub fn load(&self) -> Option<LoadedPlugin> {
        match self.open_library() {
            Ok(Some(module)) => Some(self.adopt(Arc::new(module))),
            Ok(None) => None,
            Err(e) => {
                match self.config.plugin.as_deref() {
                    Some(name) => warn!(
                        target: LOG_TARGET_LOADER,
                        "Network plugin '{}' could not be loaded, continuing without it: {}", name, e
                    ),
                    None => info!(
                        target: LOG_TARGET_LOADER,
                        "No network plugin found, continuing without it: {}", e
                    ),
                }
                None
            }
        }
    }

    /// Resolve both families from an already-loaded module.
    pub fn adopt(&self, module: Arc<dyn SymbolSource>) -> LoadedPlugin {
        let context = ModuleContext::new(module);
        let network = resolve_family::<Network>(&context);
        let collective = if self.config.collective_enabled {
            resolve_family::<Collective>(&context)
        } else {
            debug!(target: LOG_TARGET_LOADER, "Collective family disabled by configuration");
            None
        };
        LoadedPlugin {
            context,
            network,
            collective,
        }
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

/// Walk `F`'s resolvers newest first and bind the first table found.
pub fn resolve_family<F: FamilyTables>(context: &ModuleContext) -> Option<Arc<F::Transport>> {
    for resolver in VersionedResolver::<F>::chain() {
        if let Resolution::Found(table) = resolver.resolve(context) {
            let generation = F::generation_of(&table);
            if !generation.is_current() {
                info!(
                    target: LOG_TARGET_LOADER,
                    "Using {} plugin through the {} adapter",
                    F::FAMILY,
                    generation
                );
            }
            return Some(F::bind(table, Arc::clone(context.module())));
        }
    }
    info!(
        target: LOG_TARGET_LOADER,
        "No {} plugin symbol found in {}",
        F::FAMILY,
        context.label()
    );
    None
}

/// A module and the transports adopted from it.
///
/// Dropping this and every transport handed out unloads the library.
pub struct LoadedPlugin {
    context: ModuleContext,
    network: Option<Arc<dyn NetTransport>>,
    collective: Option<Arc<dyn CollNetTransport>>,
}

impl LoadedPlugin {
    pub fn label(&self) -> &str {
        self.context.label()
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    pub fn network(&self) -> Option<Arc<dyn NetTransport>> {
        self.network.clone()
    }

    pub fn collective(&self) -> Option<Arc<dyn CollNetTransport>> {
        self.collective.clone()
    }

    /// Initialize every adopted transport.
    ///
    /// A family whose `init` fails, or a network transport without devices,
    /// is dropped with a warning.
    pub fn initialize(&mut self, comm_id: u64) {
        if let Some(net) = self.network.take() {
            self.network = init_network(net, comm_id);
        }
        if let Some(coll) = self.collective.take() {
            match coll.init(comm_id) {
                Ok(()) => {
                    info!(target: LOG_TARGET_LOADER, "Initialized collective plugin {}", coll.name());
                    self.collective = Some(coll);
                }
                Err(e) => {
                    warn!(
                        target: LOG_TARGET_LOADER,
                        "Collective plugin {} failed to initialize, not using it: {}",
                        coll.name(),
                        e
                    );
                }
            }
        }
    }

    /// Finalize every adopted transport, collective first.
    ///
    /// All transports are finalized even if one fails; the first error is
    /// returned.
    pub fn finalize(&self) -> Result<(), TransportError> {
        let mut first_error = None;
        if let Some(coll) = &self.collective {
            if let Err(e) = coll.finalize() {
                warn!(target: LOG_TARGET_LOADER, "Finalizing collective plugin {} failed: {}", coll.name(), e);
                first_error = first_error.or(Some(e));
            }
        }
        if let Some(net) = &self.network {
            if let Err(e) = net.finalize() {
                warn!(target: LOG_TARGET_LOADER, "Finalizing network plugin {} failed: {}", net.name(), e);
                first_error = first_error.or(Some(e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn report(&self) -> LoadReport {
        LoadReport {
            library: self.label().to_string(),
            network: self
                .network
                .as_ref()
                .map(|t| FamilySummary::new(t.name(), t.generation())),
            collective: self
                .collective
                .as_ref()
                .map(|t| FamilySummary::new(t.name(), t.generation())),
        }
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("context", &self.context)
            .field("network", &self.network.as_ref().map(|t| t.generation()))
            .field("collective", &self.collective.as_ref().map(|t| t.generation()))
            .finish()
    }
}

fn init_network(net: Arc<dyn NetTransport>, comm_id: u64) -> Option<Arc<dyn NetTransport>> {
    if let Err(e) = net.init(comm_id) {
        warn!(
            target: LOG_TARGET_LOADER,
            "Network plugin {} failed to initialize, not using it: {}",
            net.name(),
            e
        );
        return None;
    }
    match net.devices() {
        Ok(ndev) if ndev > 0 => {
            info!(
                target: LOG_TARGET_LOADER,
                "Initialized network plugin {} with {} device(s)",
                net.name(),
                ndev
            );
            Some(net)
        }
        outcome => {
            match outcome {
                Ok(_) => warn!(
                    target: LOG_TARGET_LOADER,
                    "Network plugin {} reports no devices, not using it",
                    net.name()
                ),
                Err(e) => warn!(
                    target: LOG_TARGET_LOADER,
                    "Network plugin {} failed to list devices, not using it: {}",
                    net.name(),
                    e
                ),
            }
            if let Err(e) = net.finalize() {
                debug!(target: LOG_TARGET_LOADER, "Finalizing unused network plugin failed: {}", e);
            }
            None
        }
    }
}

/// What was adopted for one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilySummary {
    pub name: String,
    pub generation: AbiGeneration,
    /// An adapter sits between the call surface and the table.
    pub adapted: bool,
}

impl FamilySummary {
    fn new(name: &str, generation: AbiGeneration) -> Self {
        Self {
            name: name.to_string(),
            generation,
            adapted: !generation.is_current(),
        }
    }
}

/// Outcome of a load, per family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub library: String,
    pub network: Option<FamilySummary>,
    pub collective: Option<FamilySummary>,
}

impl LoadReport {
    pub fn family(&self, family: TransportFamily) -> Option<&FamilySummary> {
        match family {
            TransportFamily::Network => self.network.as_ref(),
            TransportFamily::Collective => self.collective.as_ref(),
        }
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "library: {}", self.library)?;
        for family in TransportFamily::ALL {
            match self.family(family) {
                Some(summary) => writeln!(
                    f,
                    "{}: {} ({}{})",
                    family,
                    summary.name,
                    summary.generation,
                    if summary.adapted { ", adapted" } else { "" }
                )?,
                None => writeln!(f, "{}: not available", family)?,
            }
        }
        Ok(())
    }
}
