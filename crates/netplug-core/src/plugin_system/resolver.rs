//! # Versioned symbol resolution
//!
//! A [`VersionedResolver`] is specialized to one ABI generation of one
//! transport family. It looks that generation's exported table up in a
//! module and remembers the answer in the [`ModuleContext`] owned by the
//! loader, so a module is probed at most once per (family, generation).
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use log::info;

use crate::kernel::constants::LOG_TARGET_NET;
use crate::plugin_system::generation::{AbiGeneration, TransportFamily};
use crate::plugin_system::module::{SymbolAddr, SymbolSource};

/// Outcome of probing a module for one generation's table.
///
/// Absence is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    Found(T),
    NotFound,
}

impl<T> Resolution<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Resolution::Found(table) => Some(table),
            Resolution::NotFound => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Resolution<U> {
        match self {
            Resolution::Found(table) => Resolution::Found(f(table)),
            Resolution::NotFound => Resolution::NotFound,
        }
    }
}

/// Write-once lookup results, one slot per (family, generation).
///
/// A slot holds `Some(addr)` or `None` once the module has been asked; the
/// first writer wins and every later reader sees the same value.
pub struct ResolutionCache {
    slots: [[OnceLock<Option<SymbolAddr>>; AbiGeneration::COUNT]; 2],
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| std::array::from_fn(|_| OnceLock::new())),
        }
    }

    fn slot(&self, family: TransportFamily, generation: AbiGeneration) -> &OnceLock<Option<SymbolAddr>> {
        &self.slots[family.index()][generation.index()]
    }

    /// The cached result for a slot, `None` if it was never probed.
    pub fn cached(
        &self,
        family: TransportFamily,
        generation: AbiGeneration,
    ) -> Option<Option<SymbolAddr>> {
        self.slot(family, generation).get().copied()
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let probed = self.slots.iter().flatten().filter(|slot| slot.get().is_some()).count();
        f.debug_struct("ResolutionCache").field("probed", &probed).finish()
    }
}

/// A loaded module together with its resolution cache.
///
/// Owned by the loader for as long as the module stays loaded; resolvers only
/// borrow it.
pub struct ModuleContext {
    module: Arc<dyn SymbolSource>,
    cache: ResolutionCache,
}

impl ModuleContext {
    pub fn new(module: Arc<dyn SymbolSource>) -> Self {
        Self {
            module,
            cache: ResolutionCache::new(),
        }
    }

    pub fn module(&self) -> &Arc<dyn SymbolSource> {
        &self.module
    }

    pub fn label(&self) -> &str {
        self.module.label()
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Address of `family`'s `generation` table, probing the module on first use.
    fn lookup(&self, family: TransportFamily, generation: AbiGeneration) -> Option<SymbolAddr> {
        *self
            .cache
            .slot(family, generation)
            .get_or_init(|| self.module.lookup(generation.symbol_name(family)))
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module.label())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Ties a transport family to its per-generation table types and call surface.
pub trait FamilyTables {
    const FAMILY: TransportFamily;

    /// Tagged union of this family's table types, one variant per generation.
    type Table: Copy + Send + Sync + fmt::Debug + PartialEq;

    /// The current call surface for this family.
    type Transport: ?Sized + Send + Sync;

    /// # Safety
    /// `addr` must be the address of this family's `generation` table in a
    /// module that stays loaded while the table is used.
    unsafe fn table_at(generation: AbiGeneration, addr: SymbolAddr) -> Self::Table;

    fn generation_of(table: &Self::Table) -> AbiGeneration;

    /// # Safety
    /// The module that exported `table` must still be loaded.
    unsafe fn display_name(table: &Self::Table) -> String;

    /// Present `table` through the current call surface, natively or through
    /// an adapter. `module` is kept alive by the result.
    fn bind(table: Self::Table, module: Arc<dyn SymbolSource>) -> Arc<Self::Transport>;
}

/// Resolves one generation's table for one family.
pub struct VersionedResolver<F: FamilyTables> {
    generation: AbiGeneration,
    _family: PhantomData<fn() -> F>,
}

impl<F: FamilyTables> VersionedResolver<F> {
    pub fn new(generation: AbiGeneration) -> Self {
        Self {
            generation,
            _family: PhantomData,
        }
    }

    /// Resolvers for every supported generation, newest first.
    pub fn chain() -> impl Iterator<Item = Self> {
        AbiGeneration::DESCENDING.into_iter().map(Self::new)
    }

    pub fn generation(&self) -> AbiGeneration {
        self.generation
    }

    pub fn symbol_name(&self) -> &'static std::ffi::CStr {
        self.generation.symbol_name(F::FAMILY)
    }

    /// Look this generation's table up in `context`.
    ///
    /// Emits exactly one `info` record on `netplug::net` per call. The module
    /// itself is probed only on the first call for this slot.
    pub fn resolve(&self, context: &ModuleContext) -> Resolution<F::Table> {
        match context.lookup(F::FAMILY, self.generation) {
            Some(addr) => {
                // SAFETY: the symbol name identifies the generation's frozen
                // layout, and `context` keeps the module loaded.
                let table = unsafe { F::table_at(self.generation, addr) };
                let name = unsafe { F::display_name(&table) };
                info!(
                    target: LOG_TARGET_NET,
                    "NET/Plugin: Loaded {} plugin {} ({})",
                    F::FAMILY,
                    name,
                    self.generation
                );
                Resolution::Found(table)
            }
            None => {
                info!(
                    target: LOG_TARGET_NET,
                    "NET/Plugin: Failed to find {} symbol ({} {})",
                    self.symbol_name().to_string_lossy(),
                    F::FAMILY,
                    self.generation
                );
                Resolution::NotFound
            }
        }
    }
}

impl<F: FamilyTables> fmt::Debug for VersionedResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedResolver")
            .field("family", &F::FAMILY)
            .field("generation", &self.generation)
            .finish()
    }
}
