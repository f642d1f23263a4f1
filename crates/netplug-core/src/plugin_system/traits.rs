use std::ffi::c_void;
use std::fmt;

use serde::Serialize;

use crate::plugin_system::abi::{ConnectHandle, DataType, PtrSupport, ReduceOp};
use crate::plugin_system::error::TransportResult;
use crate::plugin_system::generation::AbiGeneration;

/// A plugin-owned handle: communicator, memory registration or request.
///
/// The runtime never looks inside; it only hands it back to the plugin that
/// produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opaque(*mut c_void);

// Plugin handles are passed between progress threads by the runtime; the
// plugin is responsible for their internal synchronization.
unsafe impl Send for Opaque {}
unsafe impl Sync for Opaque {}

impl Opaque {
    pub const fn null() -> Self {
        Opaque(std::ptr::null_mut())
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Opaque(ptr)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl Default for Opaque {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({:p})", self.0)
    }
}

pub type ListenComm = Opaque;
pub type SendComm = Opaque;
pub type RecvComm = Opaque;
pub type CollComm = Opaque;
pub type MemHandle = Opaque;
pub type Request = Opaque;

/// Device properties in the current shape.
///
/// Fields a generation cannot report keep the defaults documented on each.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetProperties {
    pub name: String,
    pub pci_path: Option<String>,
    pub guid: u64,
    pub ptr_support: PtrSupport,
    pub reg_is_global: bool,
    pub speed_mbps: i32,
    pub port: i32,
    pub latency_us: f32,
    pub max_comms: i32,
    pub max_recvs: i32,
    pub device_type: i32,
    pub device_version: i32,
    /// Physical devices behind a virtual device; empty before v9.
    pub virtual_devices: Vec<i32>,
    /// `usize::MAX` before v9.
    pub max_p2p_bytes: usize,
    /// `usize::MAX` before v9.
    pub max_coll_bytes: usize,
    /// 1 before v10.
    pub max_multi_request_size: i32,
    /// false before v11.
    pub force_flush: bool,
}

/// One destination of a grouped receive.
#[derive(Debug, Clone, Copy)]
pub struct RecvBuffer {
    pub data: *mut c_void,
    pub size: usize,
    pub tag: i32,
    pub mhandle: MemHandle,
}

/// The point-to-point network call surface used by the rest of the runtime.
///
/// One implementation per supported generation; the orchestrator picks it
/// once at load time.
pub trait NetTransport: Send + Sync {
    /// Plugin display name
    fn name(&self) -> &str;

    /// Generation of the underlying table
    fn generation(&self) -> AbiGeneration;

    /// From v11 on, a second `init` before `finalize` is `AlreadyInitialized`.
    fn init(&self, comm_id: u64) -> TransportResult<()>;

    /// Release what `init` created. A no-op before v11.
    fn finalize(&self) -> TransportResult<()>;

    fn devices(&self) -> TransportResult<i32>;

    fn properties(&self, dev: i32) -> TransportResult<NetProperties>;

    fn listen(&self, dev: i32, handle: &mut ConnectHandle) -> TransportResult<ListenComm>;

    /// `None` means the connection is still being established; call again.
    fn connect(&self, dev: i32, handle: &mut ConnectHandle) -> TransportResult<Option<SendComm>>;

    /// `None` means no peer has connected yet; call again.
    fn accept(&self, listen: ListenComm) -> TransportResult<Option<RecvComm>>;

    /// # Safety
    /// `data..data+size` must be memory of type `ptr_type` that outlives the
    /// registration.
    unsafe fn reg_mr(
        &self,
        comm: Opaque,
        data: *mut c_void,
        size: usize,
        ptr_type: PtrSupport,
    ) -> TransportResult<MemHandle>;

    fn dereg_mr(&self, comm: Opaque, mhandle: MemHandle) -> TransportResult<()>;

    /// `None` means the plugin cannot accept the send right now; retry.
    ///
    /// # Safety
    /// `data..data+size` must stay valid until the request completes.
    unsafe fn isend(
        &self,
        comm: SendComm,
        data: *mut c_void,
        size: usize,
        tag: i32,
        mhandle: MemHandle,
        phandle: Opaque,
    ) -> TransportResult<Option<Request>>;

    /// `None` means the plugin cannot accept the receive right now; retry.
    ///
    /// # Safety
    /// Every buffer must stay valid until the request completes.
    unsafe fn irecv(
        &self,
        comm: RecvComm,
        buffers: &[RecvBuffer],
        phandle: Opaque,
    ) -> TransportResult<Option<Request>>;

    /// Polls a request; on completion fills `sizes` and returns true.
    ///
    /// `sizes` needs one slot per buffer of the receive that created the
    /// request, or one slot for a send. A shorter slice is rejected with
    /// `InvalidArgument` before the plugin is called.
    fn test(&self, request: Request, sizes: &mut [usize]) -> TransportResult<bool>;

    fn close_send(&self, comm: SendComm) -> TransportResult<()>;

    fn close_recv(&self, comm: RecvComm) -> TransportResult<()>;

    fn close_listen(&self, comm: ListenComm) -> TransportResult<()>;

    /// Fuse physical devices into a virtual one. v9 and newer.
    fn make_vdevice(&self, devs: &[i32]) -> TransportResult<i32>;
}

/// The collective-offload call surface used by the rest of the runtime.
pub trait CollNetTransport: Send + Sync {
    fn name(&self) -> &str;

    fn generation(&self) -> AbiGeneration;

    fn init(&self, comm_id: u64) -> TransportResult<()>;

    /// A no-op before v11.
    fn finalize(&self) -> TransportResult<()>;

    fn devices(&self) -> TransportResult<i32>;

    fn properties(&self, dev: i32) -> TransportResult<NetProperties>;

    fn listen(&self, dev: i32, handle: &mut ConnectHandle) -> TransportResult<ListenComm>;

    /// Joins the collective group described by every rank's handle.
    fn connect(
        &self,
        handles: &mut [ConnectHandle],
        listen: ListenComm,
    ) -> TransportResult<Option<CollComm>>;

    fn reduction_support(&self, data_type: DataType, op: ReduceOp) -> TransportResult<bool>;

    /// # Safety
    /// `data..data+size` must be memory of type `ptr_type` that outlives the
    /// registration.
    unsafe fn reg_mr(
        &self,
        comm: CollComm,
        data: *mut c_void,
        size: usize,
        ptr_type: PtrSupport,
    ) -> TransportResult<MemHandle>;

    fn dereg_mr(&self, comm: CollComm, mhandle: MemHandle) -> TransportResult<()>;

    /// # Safety
    /// Both buffers must stay valid until the request completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn iallreduce(
        &self,
        comm: CollComm,
        send: *mut c_void,
        recv: *mut c_void,
        count: usize,
        data_type: DataType,
        op: ReduceOp,
        send_mhandle: MemHandle,
        recv_mhandle: MemHandle,
    ) -> TransportResult<Option<Request>>;

    /// v9 and newer.
    ///
    /// # Safety
    /// Both buffers must stay valid until the request completes.
    unsafe fn iallgather(
        &self,
        comm: CollComm,
        send: *mut c_void,
        recv: *mut c_void,
        bytes_per_rank: usize,
        send_mhandle: MemHandle,
        recv_mhandle: MemHandle,
    ) -> TransportResult<Option<Request>>;

    /// # Safety
    /// `data..data+size` must stay valid until the request completes.
    unsafe fn iflush(
        &self,
        comm: CollComm,
        data: *mut c_void,
        size: usize,
        mhandle: MemHandle,
    ) -> TransportResult<Option<Request>>;

    /// Polls a request; `Some(size)` once complete.
    fn test(&self, request: Request) -> TransportResult<Option<usize>>;

    fn close_coll(&self, comm: CollComm) -> TransportResult<()>;

    fn close_listen(&self, comm: ListenComm) -> TransportResult<()>;
}
