//! Generation 9: sizes become `size_t` for registration and transfers,
//! properties gain virtual devices and transfer limits, `make_vdevice` and
//! the collective all-gather appear. Completion sizes are still `int`.
use std::ffi::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

use super::{
    AbiTable, ConnectHandle, DataType, LOGGER, LoggerFn, PendingRecvs, PtrSupport, RawResult,
    RecvBatch, ReduceOp, TableRef, VDeviceProps, base_properties, check, int_to_size, pending,
    required, size_to_int,
};
use crate::plugin_system::error::{TransportError, TransportResult};
use crate::plugin_system::generation::AbiGeneration;
use crate::plugin_system::module::SymbolSource;
use crate::plugin_system::traits::{
    CollComm, CollNetTransport, ListenComm, MemHandle, NetProperties, NetTransport, Opaque,
    RecvBuffer, RecvComm, Request, SendComm,
};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PropertiesV9 {
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
    pub vprops: VDeviceProps,
    pub max_p2p_bytes: usize,
    pub max_coll_bytes: usize,
}

impl PropertiesV9 {
    /// # Safety
    /// The string fields must be null or valid C strings.
    unsafe fn into_current(self) -> NetProperties {
        let mut props = unsafe { base_properties!(self).into_current() };
        props.virtual_devices = self.vprops.devices();
        props.max_p2p_bytes = self.max_p2p_bytes;
        props.max_coll_bytes = self.max_coll_bytes;
        props
    }
}

#[repr(C)]
pub struct NetworkV9 {
    pub name: *const c_char,
    pub init: unsafe extern "C" fn(logger: Option<LoggerFn>) -> RawResult,
    pub devices: unsafe extern "C" fn(ndev: *mut c_int) -> RawResult,
    pub get_properties: unsafe extern "C" fn(dev: c_int, props: *mut PropertiesV9) -> RawResult,
    pub listen: unsafe extern "C" fn(
        dev: c_int,
        handle: *mut c_void,
        listen_comm: *mut *mut c_void,
    ) -> RawResult,
    pub connect: unsafe extern "C" fn(
        dev: c_int,
        handle: *mut c_void,
        send_comm: *mut *mut c_void,
    ) -> RawResult,
    pub accept:
        unsafe extern "C" fn(listen_comm: *mut c_void, recv_comm: *mut *mut c_void) -> RawResult,
    pub reg_mr: unsafe extern "C" fn(
        comm: *mut c_void,
        data: *mut c_void,
        size: usize,
        ptr_type: c_int,
        mhandle: *mut *mut c_void,
    ) -> RawResult,
    pub dereg_mr: unsafe extern "C" fn(comm: *mut c_void, mhandle: *mut c_void) -> RawResult,
    pub isend: unsafe extern "C" fn(
        send_comm: *mut c_void,
        data: *mut c_void,
        size: usize,
        tag: c_int,
        mhandle: *mut c_void,
        request: *mut *mut c_void,
    ) -> RawResult,
    pub irecv: unsafe extern "C" fn(
        recv_comm: *mut c_void,
        n: c_int,
        data: *mut *mut c_void,
        sizes: *mut usize,
        tags: *mut c_int,
        mhandles: *mut *mut c_void,
        request: *mut *mut c_void,
    ) -> RawResult,
    pub test:
        unsafe extern "C" fn(request: *mut c_void, done: *mut c_int, sizes: *mut c_int) -> RawResult,
    pub close_send: unsafe extern "C" fn(send_comm: *mut c_void) -> RawResult,
    pub close_recv: unsafe extern "C" fn(recv_comm: *mut c_void) -> RawResult,
    pub close_listen: unsafe extern "C" fn(listen_comm: *mut c_void) -> RawResult,
    pub make_vdevice:
        Option<unsafe extern "C" fn(d: *mut c_int, props: *mut VDeviceProps) -> RawResult>,
}

impl AbiTable for NetworkV9 {
    const GENERATION: AbiGeneration = AbiGeneration::V9;

    fn name_ptr(&self) -> *const c_char {
        self.name
    }
}

#[repr(C)]
pub struct CollectiveV9 {
    pub name: *const c_char,
    pub init: unsafe extern "C" fn(logger: Option<LoggerFn>) -> RawResult,
    pub devices: unsafe extern "C" fn(ndev: *mut c_int) -> RawResult,
    pub get_properties: unsafe extern "C" fn(dev: c_int, props: *mut PropertiesV9) -> RawResult,
    pub listen: unsafe extern "C" fn(
        dev: c_int,
        handle: *mut c_void,
        listen_comm: *mut *mut c_void,
    ) -> RawResult,
    pub connect: unsafe extern "C" fn(
        handles: *mut *mut c_void,
        nranks: c_int,
        listen_comm: *mut c_void,
        coll_comm: *mut *mut c_void,
    ) -> RawResult,
    pub reduction_support:
        unsafe extern "C" fn(data_type: c_int, red_op: c_int, supported: *mut c_int) -> RawResult,
    pub reg_mr: unsafe extern "C" fn(
        coll_comm: *mut c_void,
        data: *mut c_void,
        size: usize,
        ptr_type: c_int,
        mhandle: *mut *mut c_void,
    ) -> RawResult,
    pub dereg_mr: unsafe extern "C" fn(coll_comm: *mut c_void, mhandle: *mut c_void) -> RawResult,
    pub iallreduce: unsafe extern "C" fn(
        coll_comm: *mut c_void,
        send_data: *mut c_void,
        recv_data: *mut c_void,
        count: usize,
        data_type: c_int,
        red_op: c_int,
        send_mhandle: *mut c_void,
        recv_mhandle: *mut c_void,
        request: *mut *mut c_void,
    ) -> RawResult,
    pub iallgather: Option<
        unsafe extern "C" fn(
            coll_comm: *mut c_void,
            send_data: *mut c_void,
            recv_data: *mut c_void,
            bytes_per_rank: usize,
            send_mhandle: *mut c_void,
            recv_mhandle: *mut c_void,
            request: *mut *mut c_void,
        ) -> RawResult,
    >,
    pub iflush: Option<
        unsafe extern "C" fn(
            coll_comm: *mut c_void,
            data: *mut c_void,
            size: usize,
            mhandle: *mut c_void,
            request: *mut *mut c_void,
        ) -> RawResult,
    >,
    pub test:
        unsafe extern "C" fn(request: *mut c_void, done: *mut c_int, size: *mut c_int) -> RawResult,
    pub close_coll: unsafe extern "C" fn(coll_comm: *mut c_void) -> RawResult,
    pub close_listen: unsafe extern "C" fn(listen_comm: *mut c_void) -> RawResult,
}

impl AbiTable for CollectiveV9 {
    const GENERATION: AbiGeneration = AbiGeneration::V9;

    fn name_ptr(&self) -> *const c_char {
        self.name
    }
}

/// Presents a generation-9 network table through [`NetTransport`].
///
/// Profiler handles have no slot in this generation and are dropped.
pub struct NetworkV9Adapter {
    table: TableRef<NetworkV9>,
    name: String,
    pending: PendingRecvs,
    _module: Arc<dyn SymbolSource>,
}

impl NetworkV9Adapter {
    pub fn new(table: TableRef<NetworkV9>, module: Arc<dyn SymbolSource>) -> Self {
        let name = unsafe { table.display_name() };
        Self {
            table,
            name,
            pending: PendingRecvs::default(),
            _module: module,
        }
    }

    fn table(&self) -> &NetworkV9 {
        unsafe { self.table.get() }
    }
}

impl NetTransport for NetworkV9Adapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn generation(&self) -> AbiGeneration {
        AbiGeneration::V9
    }

    fn init(&self, _comm_id: u64) -> TransportResult<()> {
        check(unsafe { (self.table().init)(LOGGER) }, "init")
    }

    fn finalize(&self) -> TransportResult<()> {
        Ok(())
    }

    fn devices(&self) -> TransportResult<i32> {
        let mut ndev: c_int = 0;
        check(unsafe { (self.table().devices)(&mut ndev) }, "devices")?;
        Ok(ndev)
    }

    fn properties(&self, dev: i32) -> TransportResult<NetProperties> {
        let mut props: PropertiesV9 = unsafe { std::mem::zeroed() };
        check(unsafe { (self.table().get_properties)(dev, &mut props) }, "properties")?;
        Ok(unsafe { props.into_current() })
    }

    fn listen(&self, dev: i32, handle: &mut ConnectHandle) -> TransportResult<ListenComm> {
        let mut comm = ptr::null_mut();
        check(
            unsafe { (self.table().listen)(dev, handle.as_mut_ptr(), &mut comm) },
            "listen",
        )?;
        required(comm, "listen")
    }

    fn connect(&self, dev: i32, handle: &mut ConnectHandle) -> TransportResult<Option<SendComm>> {
        let mut comm = ptr::null_mut();
        check(
            unsafe { (self.table().connect)(dev, handle.as_mut_ptr(), &mut comm) },
            "connect",
        )?;
        Ok(pending(comm))
    }

    fn accept(&self, listen: ListenComm) -> TransportResult<Option<RecvComm>> {
        let mut comm = ptr::null_mut();
        check(unsafe { (self.table().accept)(listen.as_ptr(), &mut comm) }, "accept")?;
        Ok(pending(comm))
    }

    unsafe fn reg_mr(
        &self,
        comm: Opaque,
        data: *mut c_void,
        size: usize,
        ptr_type: PtrSupport,
    ) -> TransportResult<MemHandle> {
        let mut mhandle = ptr::null_mut();
        check(
            unsafe { (self.table().reg_mr)(comm.as_ptr(), data, size, ptr_type.bits(), &mut mhandle) },
            "reg_mr",
        )?;
        required(mhandle, "reg_mr")
    }

    fn dereg_mr(&self, comm: Opaque, mhandle: MemHandle) -> TransportResult<()> {
        check(
            unsafe { (self.table().dereg_mr)(comm.as_ptr(), mhandle.as_ptr()) },
            "dereg_mr",
        )
    }

    unsafe fn isend(
        &self,
        comm: SendComm,
        data: *mut c_void,
        size: usize,
        tag: i32,
        mhandle: MemHandle,
        _phandle: Opaque,
    ) -> TransportResult<Option<Request>> {
        let mut request = ptr::null_mut();
        check(
            unsafe {
                (self.table().isend)(comm.as_ptr(), data, size, tag, mhandle.as_ptr(), &mut request)
            },
            "isend",
        )?;
        Ok(pending(request))
    }

    unsafe fn irecv(
        &self,
        comm: RecvComm,
        buffers: &[RecvBuffer],
        _phandle: Opaque,
    ) -> TransportResult<Option<Request>> {
        let mut batch = RecvBatch::new(buffers, Ok)?;
        let n = batch.count()?;
        let mut request = ptr::null_mut();
        check(
            unsafe {
                (self.table().irecv)(
                    comm.as_ptr(),
                    n,
                    batch.data.as_mut_ptr(),
                    batch.sizes.as_mut_ptr(),
                    batch.tags.as_mut_ptr(),
                    batch.mhandles.as_mut_ptr(),
                    &mut request,
                )
            },
            "irecv",
        )?;
        Ok(self.pending.record(pending(request), buffers.len()))
    }

    fn test(&self, request: Request, sizes: &mut [usize]) -> TransportResult<bool> {
        let mut raw_sizes: Vec<c_int> = self.pending.scratch(request, sizes)?;
        let mut done: c_int = 0;
        check(
            unsafe { (self.table().test)(request.as_ptr(), &mut done, raw_sizes.as_mut_ptr()) },
            "test",
        )?;
        if done == 0 {
            return Ok(false);
        }
        self.pending.complete(request);
        for (out, raw) in sizes.iter_mut().zip(raw_sizes) {
            *out = int_to_size(raw, "test")?;
        }
        Ok(true)
    }

    fn close_send(&self, comm: SendComm) -> TransportResult<()> {
        check(unsafe { (self.table().close_send)(comm.as_ptr()) }, "close_send")
    }

    fn close_recv(&self, comm: RecvComm) -> TransportResult<()> {
        check(unsafe { (self.table().close_recv)(comm.as_ptr()) }, "close_recv")
    }

    fn close_listen(&self, comm: ListenComm) -> TransportResult<()> {
        check(unsafe { (self.table().close_listen)(comm.as_ptr()) }, "close_listen")
    }

    fn make_vdevice(&self, devs: &[i32]) -> TransportResult<i32> {
        let make_vdevice = self.table().make_vdevice.ok_or(TransportError::Unsupported {
            operation: "make_vdevice",
            generation: AbiGeneration::V9,
        })?;
        let mut props = VDeviceProps::from_devices(devs, "make_vdevice")?;
        let mut dev: c_int = -1;
        check(unsafe { make_vdevice(&mut dev, &mut props) }, "make_vdevice")?;
        Ok(dev)
    }
}

/// Presents a generation-9 collective table through [`CollNetTransport`].
pub struct CollectiveV9Adapter {
    table: TableRef<CollectiveV9>,
    name: String,
    _module: Arc<dyn SymbolSource>,
}

impl CollectiveV9Adapter {
    pub fn new(table: TableRef<CollectiveV9>, module: Arc<dyn SymbolSource>) -> Self {
        let name = unsafe { table.display_name() };
        Self { table, name, _module: module }
    }

    fn table(&self) -> &CollectiveV9 {
        unsafe { self.table.get() }
    }
}

impl CollNetTransport for CollectiveV9Adapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn generation(&self) -> AbiGeneration {
        AbiGeneration::V9
    }

    fn init(&self, _comm_id: u64) -> TransportResult<()> {
        check(unsafe { (self.table().init)(LOGGER) }, "init")
    }

    fn finalize(&self) -> TransportResult<()> {
        Ok(())
    }

    fn devices(&self) -> TransportResult<i32> {
        let mut ndev: c_int = 0;
        check(unsafe { (self.table().devices)(&mut ndev) }, "devices")?;
        Ok(ndev)
    }

    fn properties(&self, dev: i32) -> TransportResult<NetProperties> {
        let mut props: PropertiesV9 = unsafe { std::mem::zeroed() };
        check(unsafe { (self.table().get_properties)(dev, &mut props) }, "properties")?;
        Ok(unsafe { props.into_current() })
    }

    fn listen(&self, dev: i32, handle: &mut ConnectHandle) -> TransportResult<ListenComm> {
        let mut comm = ptr::null_mut();
        check(
            unsafe { (self.table().listen)(dev, handle.as_mut_ptr(), &mut comm) },
            "listen",
        )?;
        required(comm, "listen")
    }

    fn connect(
        &self,
        handles: &mut [ConnectHandle],
        listen: ListenComm,
    ) -> TransportResult<Option<CollComm>> {
        let nranks = size_to_int(handles.len(), "connect")?;
        let mut handle_ptrs: Vec<*mut c_void> = handles.iter_mut().map(|h| h.as_mut_ptr()).collect();
        let mut comm = ptr::null_mut();
        check(
            unsafe {
                (self.table().connect)(handle_ptrs.as_mut_ptr(), nranks, listen.as_ptr(), &mut comm)
            },
            "connect",
        )?;
        Ok(pending(comm))
    }

    fn reduction_support(&self, data_type: DataType, op: ReduceOp) -> TransportResult<bool> {
        let mut supported: c_int = 0;
        check(
            unsafe { (self.table().reduction_support)(data_type.code(), op.code(), &mut supported) },
            "reduction_support",
        )?;
        Ok(supported != 0)
    }

    unsafe fn reg_mr(
        &self,
        comm: CollComm,
        data: *mut c_void,
        size: usize,
        ptr_type: PtrSupport,
    ) -> TransportResult<MemHandle> {
        let mut mhandle = ptr::null_mut();
        check(
            unsafe { (self.table().reg_mr)(comm.as_ptr(), data, size, ptr_type.bits(), &mut mhandle) },
            "reg_mr",
        )?;
        required(mhandle, "reg_mr")
    }

    fn dereg_mr(&self, comm: CollComm, mhandle: MemHandle) -> TransportResult<()> {
        check(
            unsafe { (self.table().dereg_mr)(comm.as_ptr(), mhandle.as_ptr()) },
            "dereg_mr",
        )
    }

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
    ) -> TransportResult<Option<Request>> {
        let mut request = ptr::null_mut();
        check(
            unsafe {
                (self.table().iallreduce)(
                    comm.as_ptr(),
                    send,
                    recv,
                    count,
                    data_type.code(),
                    op.code(),
                    send_mhandle.as_ptr(),
                    recv_mhandle.as_ptr(),
                    &mut request,
                )
            },
            "iallreduce",
        )?;
        Ok(pending(request))
    }

    unsafe fn iallgather(
        &self,
        comm: CollComm,
        send: *mut c_void,
        recv: *mut c_void,
        bytes_per_rank: usize,
        send_mhandle: MemHandle,
        recv_mhandle: MemHandle,
    ) -> TransportResult<Option<Request>> {
        let iallgather = self.table().iallgather.ok_or(TransportError::Unsupported {
            operation: "iallgather",
            generation: AbiGeneration::V9,
        })?;
        let mut request = ptr::null_mut();
        check(
            unsafe {
                iallgather(
                    comm.as_ptr(),
                    send,
                    recv,
                    bytes_per_rank,
                    send_mhandle.as_ptr(),
                    recv_mhandle.as_ptr(),
                    &mut request,
                )
            },
            "iallgather",
        )?;
        Ok(pending(request))
    }

    unsafe fn iflush(
        &self,
        comm: CollComm,
        data: *mut c_void,
        size: usize,
        mhandle: MemHandle,
    ) -> TransportResult<Option<Request>> {
        let iflush = self.table().iflush.ok_or(TransportError::Unsupported {
            operation: "iflush",
            generation: AbiGeneration::V9,
        })?;
        let mut request = ptr::null_mut();
        check(
            unsafe { iflush(comm.as_ptr(), data, size, mhandle.as_ptr(), &mut request) },
            "iflush",
        )?;
        Ok(pending(request))
    }

    fn test(&self, request: Request) -> TransportResult<Option<usize>> {
        let mut done: c_int = 0;
        let mut size: c_int = 0;
        check(unsafe { (self.table().test)(request.as_ptr(), &mut done, &mut size) }, "test")?;
        if done == 0 {
            return Ok(None);
        }
        int_to_size(size, "test").map(Some)
    }

    fn close_coll(&self, comm: CollComm) -> TransportResult<()> {
        check(unsafe { (self.table().close_coll)(comm.as_ptr()) }, "close_coll")
    }

    fn close_listen(&self, comm: ListenComm) -> TransportResult<()> {
        check(unsafe { (self.table().close_listen)(comm.as_ptr()) }, "close_listen")
    }
}
