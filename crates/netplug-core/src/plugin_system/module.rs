use std::ffi::{CStr, c_void};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::Library;
use log::debug;

use crate::kernel::constants::LOG_TARGET_LOADER;
use crate::plugin_system::error::{PluginSystemError, PluginSystemErrorSource};

/// Address of an exported symbol inside a loaded module.
///
/// Only meaningful while the module that produced it stays loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolAddr(NonNull<c_void>);

// The address itself is plain data; what it points at is immutable plugin
// state for as long as the module is mapped.
unsafe impl Send for SymbolAddr {}
unsafe impl Sync for SymbolAddr {}

impl SymbolAddr {
    /// Wraps a raw symbol address, `None` for null.
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(SymbolAddr)
    }

    /// Address of a table living in this process, as a module would export it.
    pub fn of<T>(table: &T) -> Self {
        SymbolAddr(NonNull::from(table).cast())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub(crate) fn cast<T>(self) -> NonNull<T> {
        self.0.cast()
    }
}

/// An already-loaded dynamic module that can be asked for exported symbols.
pub trait SymbolSource: Send + Sync {
    /// Human-readable identity for diagnostics (usually the library path).
    fn label(&self) -> &str;

    /// Address of the exported symbol `name`, matched exactly.
    fn lookup(&self, name: &CStr) -> Option<SymbolAddr>;
}

/// A shared library opened through `libloading`.
///
/// Dropping it unloads the library; transports adopted from it keep it alive
/// through an `Arc`.
pub struct PluginModule {
    library: Library,
    label: String,
    path: Option<PathBuf>,
}

impl PluginModule {
    /// Open the shared library at `path` (or a bare name resolved by the
    /// system loader).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PluginSystemError> {
        let path = path.as_ref();
        // SAFETY: running a library's initializers is inherent to loading a
        // plugin; the configured library is trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| PluginSystemError::LoadingError {
            plugin_id: path.to_string_lossy().into_owned(),
            path: Some(path.to_path_buf()),
            source: Box::new(PluginSystemErrorSource::Library(e)),
        })?;
        debug!(target: LOG_TARGET_LOADER, "Opened plugin library {}", path.display());
        Ok(Self {
            library,
            label: path.to_string_lossy().into_owned(),
            path: Some(path.to_path_buf()),
        })
    }

    /// Adopt a handle produced by another `dlopen` caller. The module takes
    /// ownership and will `dlclose` it on drop.
    ///
    /// # Panics
    /// Panics if `handle` is null: a null module handle is a caller bug, not a
    /// runtime condition.
    ///
    /// # Safety
    /// `handle` must be a live handle returned by `dlopen` that no one else
    /// will close.
    #[cfg(unix)]
    pub unsafe fn from_raw(handle: *mut c_void, label: impl Into<String>) -> Self {
        assert!(!handle.is_null(), "module handle must not be null");
        let library = unsafe { libloading::os::unix::Library::from_raw(handle) };
        Self {
            library: library.into(),
            label: label.into(),
            path: None,
        }
    }

    /// Path the module was opened from, if it was opened by path.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Explicitly unload, reporting errors instead of ignoring them as `Drop` does.
    pub fn close(self) -> Result<(), PluginSystemError> {
        let label = self.label;
        self.library.close().map_err(|e| PluginSystemError::LoadingError {
            plugin_id: label,
            path: self.path,
            source: Box::new(PluginSystemErrorSource::Library(e)),
        })
    }
}

impl SymbolSource for PluginModule {
    fn label(&self) -> &str {
        &self.label
    }

    fn lookup(&self, name: &CStr) -> Option<SymbolAddr> {
        // SAFETY: the symbol is only read as an address here; interpreting
        // what it points at is up to the resolver for its generation.
        let symbol = unsafe { self.library.get::<*mut c_void>(name.to_bytes_with_nul()) }.ok()?;
        SymbolAddr::new(*symbol)
    }
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("label", &self.label)
            .field("path", &self.path)
            .finish()
    }
}
