//! # Plugin ABI
//!
//! Frozen `#[repr(C)]` shapes exchanged with plugins, one submodule per
//! generation. Each submodule holds the network and collective function
//! tables of that generation together with the type that presents them
//! through the current call surface ([`NetTransport`] / [`CollNetTransport`]).
//!
//! Everything here is shared by all generations: return codes, pointer
//! support flags, the connection handle, the logger callback, and the
//! [`TableRef`] that keeps a resolved table address typed.
//!
//! [`NetTransport`]: crate::plugin_system::traits::NetTransport
//! [`CollNetTransport`]: crate::plugin_system::traits::CollNetTransport
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::kernel::constants::{LOG_TARGET_PLUGIN, MAX_DEVS_PER_VDEVICE, NET_HANDLE_MAXSIZE};
use crate::plugin_system::error::{TransportError, TransportResult};
use crate::plugin_system::generation::AbiGeneration;
use crate::plugin_system::module::SymbolAddr;
use crate::plugin_system::traits::{Opaque, RecvBuffer};

pub mod v10;
pub mod v11;
pub mod v8;
pub mod v9;

/// Raw return code of every plugin entry point.
pub type RawResult = c_int;

pub const RESULT_SUCCESS: RawResult = 0;
pub const RESULT_UNHANDLED_ERROR: RawResult = 1;
pub const RESULT_SYSTEM_ERROR: RawResult = 2;
pub const RESULT_INTERNAL_ERROR: RawResult = 3;
pub const RESULT_INVALID_ARGUMENT: RawResult = 4;
pub const RESULT_INVALID_USAGE: RawResult = 5;
pub const RESULT_REMOTE_ERROR: RawResult = 6;
pub const RESULT_IN_PROGRESS: RawResult = 7;

/// Decoded non-success return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiStatus {
    UnhandledError,
    SystemError,
    InternalError,
    InvalidArgument,
    InvalidUsage,
    RemoteError,
    InProgress,
    Unknown(RawResult),
}

impl FfiStatus {
    pub fn from_code(code: RawResult) -> Self {
        match code {
            RESULT_UNHANDLED_ERROR => FfiStatus::UnhandledError,
            RESULT_SYSTEM_ERROR => FfiStatus::SystemError,
            RESULT_INTERNAL_ERROR => FfiStatus::InternalError,
            RESULT_INVALID_ARGUMENT => FfiStatus::InvalidArgument,
            RESULT_INVALID_USAGE => FfiStatus::InvalidUsage,
            RESULT_REMOTE_ERROR => FfiStatus::RemoteError,
            RESULT_IN_PROGRESS => FfiStatus::InProgress,
            other => FfiStatus::Unknown(other),
        }
    }
}

impl fmt::Display for FfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FfiStatus::UnhandledError => write!(f, "unhandled error"),
            FfiStatus::SystemError => write!(f, "system error"),
            FfiStatus::InternalError => write!(f, "internal error"),
            FfiStatus::InvalidArgument => write!(f, "invalid argument"),
            FfiStatus::InvalidUsage => write!(f, "invalid usage"),
            FfiStatus::RemoteError => write!(f, "remote error"),
            FfiStatus::InProgress => write!(f, "in progress"),
            FfiStatus::Unknown(code) => write!(f, "unknown result code {}", code),
        }
    }
}

/// Maps a plugin return code onto the transport error space.
pub(crate) fn check(code: RawResult, operation: &'static str) -> TransportResult<()> {
    if code == RESULT_SUCCESS {
        Ok(())
    } else {
        Err(TransportError::Plugin {
            operation,
            status: FfiStatus::from_code(code),
        })
    }
}

/// Narrows a size for generations whose ABI carries sizes as `int`.
pub(crate) fn size_to_int(size: usize, operation: &'static str) -> TransportResult<c_int> {
    c_int::try_from(size).map_err(|_| TransportError::InvalidArgument {
        operation,
        message: format!("size {} does not fit the generation's 32-bit size field", size),
    })
}

/// Widens a size reported as `int`; negative values are a plugin bug.
pub(crate) fn int_to_size(size: c_int, operation: &'static str) -> TransportResult<usize> {
    usize::try_from(size).map_err(|_| TransportError::InvalidArgument {
        operation,
        message: format!("plugin reported negative size {}", size),
    })
}

/// Turns an out-parameter handle into `Option`, null meaning "not yet".
pub(crate) fn pending(ptr: *mut c_void) -> Option<Opaque> {
    if ptr.is_null() { None } else { Some(Opaque::from_ptr(ptr)) }
}

/// Out-parameter handle that must be non-null on success.
pub(crate) fn required(ptr: *mut c_void, operation: &'static str) -> TransportResult<Opaque> {
    pending(ptr).ok_or(TransportError::NullResult { operation })
}

/// Column-wise copy of a grouped receive, as every generation's `irecv` takes it.
pub(crate) struct RecvBatch<S> {
    pub data: Vec<*mut c_void>,
    pub sizes: Vec<S>,
    pub tags: Vec<c_int>,
    pub mhandles: Vec<*mut c_void>,
}

impl<S> RecvBatch<S> {
    /// `size` converts each buffer size into the generation's size type.
    pub(crate) fn new<F>(buffers: &[RecvBuffer], size: F) -> TransportResult<Self>
    where
        F: Fn(usize) -> TransportResult<S>,
    {
        if buffers.is_empty() {
            return Err(TransportError::InvalidArgument {
                operation: "irecv",
                message: "a receive needs at least one buffer".to_string(),
            });
        }
        Ok(Self {
            data: buffers.iter().map(|b| b.data).collect(),
            sizes: buffers.iter().map(|b| size(b.size)).collect::<TransportResult<_>>()?,
            tags: buffers.iter().map(|b| b.tag).collect(),
            mhandles: buffers.iter().map(|b| b.mhandle.as_ptr()).collect(),
        })
    }

    pub(crate) fn count(&self) -> TransportResult<c_int> {
        size_to_int(self.data.len(), "irecv")
    }
}

/// Buffer counts of grouped receives still in flight, keyed by request.
///
/// A network `test` lets the plugin write one size per buffer of the receive
/// behind the request, so the array it is handed must be that long. Requests
/// not recorded here are sends and complete with a single size.
#[derive(Debug, Default)]
pub(crate) struct PendingRecvs(Mutex<HashMap<Opaque, usize>>);

impl PendingRecvs {
    pub(crate) fn record(&self, request: Option<Opaque>, count: usize) -> Option<Opaque> {
        if let Some(request) = request {
            self.lock().insert(request, count);
        }
        request
    }

    /// Zeroed sizes array for `test`, as long as what the plugin may fill.
    ///
    /// Fails when `sizes` cannot take every completed size.
    pub(crate) fn scratch<S: Copy + Default>(
        &self,
        request: Opaque,
        sizes: &[usize],
    ) -> TransportResult<Vec<S>> {
        let expected = self.lock().get(&request).copied().unwrap_or(1);
        if sizes.len() < expected {
            return Err(TransportError::InvalidArgument {
                operation: "test",
                message: format!(
                    "request completes {} buffer(s) but only {} size slot(s) were given",
                    expected,
                    sizes.len()
                ),
            });
        }
        Ok(vec![S::default(); expected])
    }

    pub(crate) fn complete(&self, request: Opaque) {
        self.lock().remove(&request);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Opaque, usize>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bit set of memory types a device can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PtrSupport(pub c_int);

impl PtrSupport {
    pub const HOST: PtrSupport = PtrSupport(0x1);
    pub const CUDA: PtrSupport = PtrSupport(0x2);
    pub const DMABUF: PtrSupport = PtrSupport(0x4);

    pub fn contains(self, other: PtrSupport) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> c_int {
        self.0
    }
}

impl std::ops::BitOr for PtrSupport {
    type Output = PtrSupport;

    fn bitor(self, rhs: PtrSupport) -> PtrSupport {
        PtrSupport(self.0 | rhs.0)
    }
}

/// Opaque connection handle, filled by `listen` and consumed by `connect`.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConnectHandle {
    pub bytes: [u8; NET_HANDLE_MAXSIZE],
}

impl ConnectHandle {
    pub fn zeroed() -> Self {
        Self { bytes: [0; NET_HANDLE_MAXSIZE] }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.as_mut_ptr().cast()
    }
}

impl Default for ConnectHandle {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for ConnectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        write!(f, "ConnectHandle({} bytes used)", used)
    }
}

/// Virtual device description, generations 9 and newer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VDeviceProps {
    pub ndevs: c_int,
    pub devs: [c_int; MAX_DEVS_PER_VDEVICE],
}

impl VDeviceProps {
    pub(crate) fn from_devices(devs: &[i32], operation: &'static str) -> TransportResult<Self> {
        if devs.is_empty() || devs.len() > MAX_DEVS_PER_VDEVICE {
            return Err(TransportError::InvalidArgument {
                operation,
                message: format!(
                    "a virtual device merges 1 to {} devices, got {}",
                    MAX_DEVS_PER_VDEVICE,
                    devs.len()
                ),
            });
        }
        let mut props = VDeviceProps {
            ndevs: devs.len() as c_int,
            ..Default::default()
        };
        props.devs[..devs.len()].copy_from_slice(devs);
        Ok(props)
    }

    pub(crate) fn devices(&self) -> Vec<i32> {
        let n = usize::try_from(self.ndevs).unwrap_or(0).min(MAX_DEVS_PER_VDEVICE);
        self.devs[..n].to_vec()
    }
}

/// Logger callback handed to every generation's `init`.
pub type LoggerFn = unsafe extern "C" fn(level: c_int, message: *const c_char);

pub const LOG_NONE: c_int = 0;
pub const LOG_VERSION: c_int = 1;
pub const LOG_WARN: c_int = 2;
pub const LOG_INFO: c_int = 3;
pub const LOG_ABORT: c_int = 4;
pub const LOG_TRACE: c_int = 5;

/// Forwards plugin log lines into the `log` facade.
pub unsafe extern "C" fn plugin_logger(level: c_int, message: *const c_char) {
    if message.is_null() || level == LOG_NONE {
        return;
    }
    // SAFETY: the plugin passes a NUL-terminated string valid for the call.
    let text = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    let level = match level {
        LOG_WARN => log::Level::Warn,
        LOG_ABORT => log::Level::Error,
        LOG_TRACE => log::Level::Trace,
        LOG_VERSION | LOG_INFO => log::Level::Info,
        _ => log::Level::Debug,
    };
    log::log!(target: LOG_TARGET_PLUGIN, level, "{}", text);
}

pub(crate) const LOGGER: Option<LoggerFn> = Some(plugin_logger);

/// Copies a possibly-null C string owned by the plugin.
///
/// # Safety
/// A non-null `ptr` must point at a NUL-terminated string valid for the call.
pub(crate) unsafe fn string_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Table fields shared by every generation.
pub trait AbiTable {
    const GENERATION: AbiGeneration;

    /// The plugin's self-reported display name.
    fn name_ptr(&self) -> *const c_char;
}

/// A resolved table address, typed by its generation's layout.
pub struct TableRef<T> {
    ptr: NonNull<T>,
}

// Tables are read-only plugin data shared by all threads once resolved.
unsafe impl<T> Send for TableRef<T> {}
unsafe impl<T> Sync for TableRef<T> {}

impl<T> Clone for TableRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TableRef<T> {}

impl<T> PartialEq for TableRef<T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.ptr.as_ptr(), other.ptr.as_ptr())
    }
}

impl<T> Eq for TableRef<T> {}

impl<T> fmt::Debug for TableRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableRef({:p})", self.ptr)
    }
}

impl<T: AbiTable> TableRef<T> {
    /// # Safety
    /// `addr` must be the address of a `T` that stays valid while the module
    /// that exported it is loaded.
    pub unsafe fn from_addr(addr: SymbolAddr) -> Self {
        Self { ptr: addr.cast() }
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn generation(&self) -> AbiGeneration {
        T::GENERATION
    }

    /// # Safety
    /// The exporting module must still be loaded.
    pub unsafe fn get(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }

    /// # Safety
    /// The exporting module must still be loaded.
    pub unsafe fn display_name(&self) -> String {
        let name = unsafe { self.get() }.name_ptr();
        unsafe { string_from_ptr(name) }.unwrap_or_else(|| "<unnamed>".to_string())
    }
}

/// Element types understood by collective reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DataType {
    Int8 = 0,
    Uint8 = 1,
    Int32 = 2,
    Uint32 = 3,
    Int64 = 4,
    Uint64 = 5,
    Float16 = 6,
    Float32 = 7,
    Float64 = 8,
    Bfloat16 = 9,
}

impl DataType {
    pub fn code(self) -> c_int {
        self as c_int
    }
}

/// Reduction operators understood by collective reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReduceOp {
    Sum = 0,
    Prod = 1,
    Max = 2,
    Min = 3,
    Avg = 4,
}

impl ReduceOp {
    pub fn code(self) -> c_int {
        self as c_int
    }
}

/// Fields common to every generation's device properties, normalized.
pub(crate) struct BaseProperties {
    pub name: *mut c_char,
    pub pci_path: *mut c_char,
    pub guid: u64,
    pub ptr_support: c_int,
    pub reg_is_global: c_int,
    pub speed: c_int,
    pub port: c_int,
    pub latency: f32,
    pub max_comms: c_int,
    pub max_recvs: c_int,
    pub net_device_type: c_int,
    pub net_device_version: c_int,
}

impl BaseProperties {
    /// Builds current properties with the defaults older generations lack.
    ///
    /// # Safety
    /// `name` and `pci_path` must be null or valid C strings.
    pub(crate) unsafe fn into_current(self) -> crate::plugin_system::traits::NetProperties {
        crate::plugin_system::traits::NetProperties {
            name: unsafe { string_from_ptr(self.name) }.unwrap_or_default(),
            pci_path: unsafe { string_from_ptr(self.pci_path) },
            guid: self.guid,
            ptr_support: PtrSupport(self.ptr_support),
            reg_is_global: self.reg_is_global != 0,
            speed_mbps: self.speed,
            port: self.port,
            latency_us: self.latency,
            max_comms: self.max_comms,
            max_recvs: self.max_recvs,
            device_type: self.net_device_type,
            device_version: self.net_device_version,
            virtual_devices: Vec::new(),
            max_p2p_bytes: usize::MAX,
            max_coll_bytes: usize::MAX,
            max_multi_request_size: 1,
            force_flush: false,
        }
    }
}

/// Expands to a `BaseProperties` built from any generation's properties struct.
macro_rules! base_properties {
    ($props:expr) => {
        $crate::plugin_system::abi::BaseProperties {
            name: $props.name,
            pci_path: $props.pci_path,
            guid: $props.guid,
            ptr_support: $props.ptr_support,
            reg_is_global: $props.reg_is_global,
            speed: $props.speed,
            port: $props.port,
            latency: $props.latency,
            max_comms: $props.max_comms,
            max_recvs: $props.max_recvs,
            net_device_type: $props.net_device_type,
            net_device_version: $props.net_device_version,
        }
    };
}
pub(crate) use base_properties;
