#![cfg(test)]

//! In-process stand-ins for plugin libraries: a symbol table keyed by name,
//! mock function tables for every generation, and a thread-local record of
//! what the mock entry points were called with.
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::plugin_system::abi::v8::{CollectiveV8, NetworkV8, PropertiesV8};
use crate::plugin_system::abi::v9::{CollectiveV9, NetworkV9, PropertiesV9};
use crate::plugin_system::abi::v10::{CollectiveV10, NetworkV10, PropertiesV10};
use crate::plugin_system::abi::v11::{CollectiveV11, NetworkV11, PropertiesV11};
use crate::plugin_system::abi::{LoggerFn, RawResult, VDeviceProps};
use crate::plugin_system::generation::{AbiGeneration, TransportFamily};
use crate::plugin_system::module::{SymbolAddr, SymbolSource};

pub const LISTEN_COMM: *mut c_void = ptr::without_provenance_mut(0x1100);
pub const SEND_COMM: *mut c_void = ptr::without_provenance_mut(0x1200);
pub const COLL_COMM: *mut c_void = ptr::without_provenance_mut(0x1300);
pub const MHANDLE: *mut c_void = ptr::without_provenance_mut(0x1400);
pub const REQUEST: *mut c_void = ptr::without_provenance_mut(0x1500);
pub const PLUGIN_CTX: *mut c_void = ptr::without_provenance_mut(0xC0C0);
pub const VDEVICE: c_int = 42;

/// A module whose exports are a fixed map, counting every lookup.
pub struct FakeModule {
    label: String,
    symbols: HashMap<CString, SymbolAddr>,
    lookups: AtomicUsize,
}

impl FakeModule {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            symbols: HashMap::new(),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_symbol(mut self, name: &CStr, addr: SymbolAddr) -> Self {
        self.symbols.insert(name.to_owned(), addr);
        self
    }

    pub fn with_network(self, generation: AbiGeneration, name: &'static CStr) -> Self {
        let addr = network_table(generation, name);
        self.with_symbol(generation.symbol_name(TransportFamily::Network), addr)
    }

    pub fn with_collective(self, generation: AbiGeneration, name: &'static CStr) -> Self {
        let addr = collective_table(generation, name);
        self.with_symbol(generation.symbol_name(TransportFamily::Collective), addr)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl SymbolSource for FakeModule {
    fn label(&self) -> &str {
        &self.label
    }

    fn lookup(&self, name: &CStr) -> Option<SymbolAddr> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.symbols.get(name).copied()
    }
}

// ---- Call recording ----

pub struct MockState {
    pub devices: c_int,
    /// Entry point that should fail, and the code it returns.
    pub fail: Option<(&'static str, RawResult)>,
    pub calls: Vec<&'static str>,
    pub logger_seen: bool,
    pub comm_id: Option<u64>,
    pub last_ctx: Option<*mut c_void>,
    pub last_sizes: Vec<usize>,
    pub last_phandles: Vec<*mut c_void>,
    /// Sizes reported by `test` on completion.
    pub completed: Vec<i64>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            devices: 2,
            fail: None,
            calls: Vec::new(),
            logger_seen: false,
            comm_id: None,
            last_ctx: None,
            last_sizes: Vec::new(),
            last_phandles: Vec::new(),
            completed: Vec::new(),
        }
    }
}

thread_local! {
    static STATE: RefCell<MockState> = RefCell::new(MockState::default());
}

pub fn reset_mock() {
    STATE.with(|s| *s.borrow_mut() = MockState::default());
}

pub fn with_mock<R>(f: impl FnOnce(&mut MockState) -> R) -> R {
    STATE.with(|s| f(&mut s.borrow_mut()))
}

fn enter(op: &'static str) -> RawResult {
    with_mock(|s| {
        s.calls.push(op);
        match s.fail {
            Some((failing, code)) if failing == op => code,
            _ => 0,
        }
    })
}

// ---- Mock entry points ----

unsafe extern "C" fn init_legacy(logger: Option<LoggerFn>) -> RawResult {
    with_mock(|s| s.logger_seen = logger.is_some());
    enter("init")
}

unsafe extern "C" fn init_v11(ctx: *mut *mut c_void, comm_id: u64, logger: Option<LoggerFn>) -> RawResult {
    with_mock(|s| {
        s.logger_seen = logger.is_some();
        s.comm_id = Some(comm_id);
    });
    let code = enter("init");
    if code == 0 {
        unsafe { *ctx = PLUGIN_CTX };
    }
    code
}

unsafe extern "C" fn finalize_v11(ctx: *mut c_void) -> RawResult {
    with_mock(|s| s.last_ctx = Some(ctx));
    enter("finalize")
}

unsafe extern "C" fn devices(ndev: *mut c_int) -> RawResult {
    let code = enter("devices");
    unsafe { *ndev = with_mock(|s| s.devices) };
    code
}

/// Writes a fixed set of common property values into any generation's struct.
macro_rules! fill_common_properties {
    ($props:expr) => {{
        $props.name = c"mock0".as_ptr().cast_mut();
        $props.pci_path = ptr::null_mut();
        $props.guid = 0xfeed;
        $props.ptr_support = 0x3;
        $props.speed = 400_000;
        $props.port = 1;
        $props.latency = 1.5;
        $props.max_comms = 65536;
        $props.max_recvs = 8;
    }};
}

unsafe extern "C" fn properties_v8(_dev: c_int, props: *mut PropertiesV8) -> RawResult {
    let props = unsafe { &mut *props };
    fill_common_properties!(props);
    enter("properties")
}

unsafe extern "C" fn properties_v9(_dev: c_int, props: *mut PropertiesV9) -> RawResult {
    let props = unsafe { &mut *props };
    fill_common_properties!(props);
    props.vprops = VDeviceProps { ndevs: 2, devs: [0, 1, 0, 0] };
    props.max_p2p_bytes = 1 << 30;
    props.max_coll_bytes = 1 << 28;
    enter("properties")
}

unsafe extern "C" fn properties_v10(_dev: c_int, props: *mut PropertiesV10) -> RawResult {
    let props = unsafe { &mut *props };
    fill_common_properties!(props);
    props.vprops = VDeviceProps { ndevs: 1, devs: [3, 0, 0, 0] };
    props.max_p2p_bytes = 1 << 30;
    props.max_coll_bytes = 1 << 28;
    props.max_multi_request_size = 8;
    enter("properties")
}

unsafe extern "C" fn properties_v11(_dev: c_int, props: *mut PropertiesV11) -> RawResult {
    let props = unsafe { &mut *props };
    fill_common_properties!(props);
    props.max_p2p_bytes = 1 << 30;
    props.max_coll_bytes = 1 << 28;
    props.max_multi_request_size = 16;
    props.force_flush = 1;
    enter("properties")
}

unsafe extern "C" fn listen(_dev: c_int, handle: *mut c_void, comm: *mut *mut c_void) -> RawResult {
    unsafe {
        *handle.cast::<u8>() = 0xAB;
        *comm = LISTEN_COMM;
    }
    enter("listen")
}

unsafe extern "C" fn listen_v11(
    ctx: *mut c_void,
    dev: c_int,
    handle: *mut c_void,
    comm: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_ctx = Some(ctx));
    unsafe { listen(dev, handle, comm) }
}

unsafe extern "C" fn connect(_dev: c_int, _handle: *mut c_void, comm: *mut *mut c_void) -> RawResult {
    unsafe { *comm = SEND_COMM };
    enter("connect")
}

unsafe extern "C" fn connect_v11(
    ctx: *mut c_void,
    dev: c_int,
    handle: *mut c_void,
    comm: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_ctx = Some(ctx));
    unsafe { connect(dev, handle, comm) }
}

unsafe extern "C" fn accept(_listen: *mut c_void, comm: *mut *mut c_void) -> RawResult {
    // No peer yet.
    unsafe { *comm = ptr::null_mut() };
    enter("accept")
}

unsafe extern "C" fn reg_mr_int(
    _comm: *mut c_void,
    _data: *mut c_void,
    size: c_int,
    _ptr_type: c_int,
    mhandle: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![size as usize]);
    unsafe { *mhandle = MHANDLE };
    enter("reg_mr")
}

unsafe extern "C" fn reg_mr(
    _comm: *mut c_void,
    _data: *mut c_void,
    size: usize,
    _ptr_type: c_int,
    mhandle: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![size]);
    unsafe { *mhandle = MHANDLE };
    enter("reg_mr")
}

unsafe extern "C" fn dereg_mr(_comm: *mut c_void, _mhandle: *mut c_void) -> RawResult {
    enter("dereg_mr")
}

unsafe extern "C" fn isend_v8(
    _comm: *mut c_void,
    _data: *mut c_void,
    size: c_int,
    _tag: c_int,
    _mhandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![size as usize]);
    unsafe { *request = REQUEST };
    enter("isend")
}

unsafe extern "C" fn isend_v9(
    _comm: *mut c_void,
    _data: *mut c_void,
    size: usize,
    _tag: c_int,
    _mhandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![size]);
    unsafe { *request = REQUEST };
    enter("isend")
}

unsafe extern "C" fn isend_v10(
    comm: *mut c_void,
    data: *mut c_void,
    size: usize,
    tag: c_int,
    mhandle: *mut c_void,
    phandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_phandles = vec![phandle]);
    unsafe { isend_v9(comm, data, size, tag, mhandle, request) }
}

unsafe extern "C" fn irecv_v8(
    _comm: *mut c_void,
    n: c_int,
    _data: *mut *mut c_void,
    sizes: *mut c_int,
    _tags: *mut c_int,
    _mhandles: *mut *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    let sizes = unsafe { std::slice::from_raw_parts(sizes, n as usize) };
    with_mock(|s| s.last_sizes = sizes.iter().map(|&size| size as usize).collect());
    unsafe { *request = REQUEST };
    enter("irecv")
}

unsafe extern "C" fn irecv_v9(
    _comm: *mut c_void,
    n: c_int,
    _data: *mut *mut c_void,
    sizes: *mut usize,
    _tags: *mut c_int,
    _mhandles: *mut *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    let sizes = unsafe { std::slice::from_raw_parts(sizes, n as usize) };
    with_mock(|s| s.last_sizes = sizes.to_vec());
    unsafe { *request = REQUEST };
    enter("irecv")
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn irecv_v10(
    comm: *mut c_void,
    n: c_int,
    data: *mut *mut c_void,
    sizes: *mut usize,
    tags: *mut c_int,
    mhandles: *mut *mut c_void,
    phandles: *mut *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    let phandles = unsafe { std::slice::from_raw_parts(phandles, n as usize) };
    with_mock(|s| s.last_phandles = phandles.to_vec());
    unsafe { irecv_v9(comm, n, data, sizes, tags, mhandles, request) }
}

unsafe extern "C" fn test_int(_request: *mut c_void, done: *mut c_int, sizes: *mut c_int) -> RawResult {
    let completed = with_mock(|s| s.completed.clone());
    unsafe {
        *done = 1;
        if !sizes.is_null() {
            for (i, size) in completed.iter().enumerate() {
                *sizes.add(i) = *size as c_int;
            }
        }
    }
    enter("test")
}

unsafe extern "C" fn test_size(_request: *mut c_void, done: *mut c_int, sizes: *mut usize) -> RawResult {
    let completed = with_mock(|s| s.completed.clone());
    unsafe {
        *done = 1;
        if !sizes.is_null() {
            for (i, size) in completed.iter().enumerate() {
                *sizes.add(i) = *size as usize;
            }
        }
    }
    enter("test")
}

unsafe extern "C" fn close(_comm: *mut c_void) -> RawResult {
    enter("close")
}

unsafe extern "C" fn make_vdevice(d: *mut c_int, props: *mut VDeviceProps) -> RawResult {
    let props = unsafe { &*props };
    with_mock(|s| s.last_sizes = props.devices().into_iter().map(|d| d as usize).collect());
    unsafe { *d = VDEVICE };
    enter("make_vdevice")
}

unsafe extern "C" fn coll_connect(
    _handles: *mut *mut c_void,
    nranks: c_int,
    _listen: *mut c_void,
    comm: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![nranks as usize]);
    unsafe { *comm = COLL_COMM };
    enter("connect")
}

unsafe extern "C" fn reduction_support(_data_type: c_int, red_op: c_int, supported: *mut c_int) -> RawResult {
    // Sum only.
    unsafe { *supported = (red_op == 0) as c_int };
    enter("reduction_support")
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn iallreduce_int(
    _comm: *mut c_void,
    _send: *mut c_void,
    _recv: *mut c_void,
    count: c_int,
    _data_type: c_int,
    _red_op: c_int,
    _send_mhandle: *mut c_void,
    _recv_mhandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![count as usize]);
    unsafe { *request = REQUEST };
    enter("iallreduce")
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn iallreduce(
    _comm: *mut c_void,
    _send: *mut c_void,
    _recv: *mut c_void,
    count: usize,
    _data_type: c_int,
    _red_op: c_int,
    _send_mhandle: *mut c_void,
    _recv_mhandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![count]);
    unsafe { *request = REQUEST };
    enter("iallreduce")
}

unsafe extern "C" fn iallgather(
    _comm: *mut c_void,
    _send: *mut c_void,
    _recv: *mut c_void,
    bytes_per_rank: usize,
    _send_mhandle: *mut c_void,
    _recv_mhandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![bytes_per_rank]);
    unsafe { *request = REQUEST };
    enter("iallgather")
}

unsafe extern "C" fn iflush_int(
    _comm: *mut c_void,
    _data: *mut c_void,
    size: c_int,
    _mhandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![size as usize]);
    unsafe { *request = REQUEST };
    enter("iflush")
}

unsafe extern "C" fn iflush(
    _comm: *mut c_void,
    _data: *mut c_void,
    size: usize,
    _mhandle: *mut c_void,
    request: *mut *mut c_void,
) -> RawResult {
    with_mock(|s| s.last_sizes = vec![size]);
    unsafe { *request = REQUEST };
    enter("iflush")
}

// ---- Mock tables ----
//
// Leaked so they outlive the fake module, as an exported static would.

fn name_ptr(name: &'static CStr) -> *const c_char {
    name.as_ptr()
}

pub fn network_v8(name: &'static CStr) -> &'static NetworkV8 {
    Box::leak(Box::new(NetworkV8 {
        name: name_ptr(name),
        init: init_legacy,
        devices,
        get_properties: properties_v8,
        listen,
        connect,
        accept,
        reg_mr: reg_mr_int,
        dereg_mr,
        isend: isend_v8,
        irecv: irecv_v8,
        test: test_int,
        close_send: close,
        close_recv: close,
        close_listen: close,
    }))
}

pub fn network_v9(name: &'static CStr, with_vdevice: bool) -> &'static NetworkV9 {
    Box::leak(Box::new(NetworkV9 {
        name: name_ptr(name),
        init: init_legacy,
        devices,
        get_properties: properties_v9,
        listen,
        connect,
        accept,
        reg_mr,
        dereg_mr,
        isend: isend_v9,
        irecv: irecv_v9,
        test: test_int,
        close_send: close,
        close_recv: close,
        close_listen: close,
        make_vdevice: with_vdevice.then_some(make_vdevice as _),
    }))
}

pub fn network_v10(name: &'static CStr) -> &'static NetworkV10 {
    Box::leak(Box::new(NetworkV10 {
        name: name_ptr(name),
        init: init_legacy,
        devices,
        get_properties: properties_v10,
        listen,
        connect,
        accept,
        reg_mr,
        dereg_mr,
        isend: isend_v10,
        irecv: irecv_v10,
        test: test_int,
        close_send: close,
        close_recv: close,
        close_listen: close,
        make_vdevice: Some(make_vdevice),
    }))
}

pub fn network_v11(name: &'static CStr) -> &'static NetworkV11 {
    Box::leak(Box::new(NetworkV11 {
        name: name_ptr(name),
        init: init_v11,
        finalize: finalize_v11,
        devices,
        get_properties: properties_v11,
        listen: listen_v11,
        connect: connect_v11,
        accept,
        reg_mr,
        dereg_mr,
        isend: isend_v10,
        irecv: irecv_v10,
        test: test_size,
        close_send: close,
        close_recv: close,
        close_listen: close,
        make_vdevice: Some(make_vdevice),
    }))
}

pub fn collective_v8(name: &'static CStr) -> &'static CollectiveV8 {
    Box::leak(Box::new(CollectiveV8 {
        name: name_ptr(name),
        init: init_legacy,
        devices,
        get_properties: properties_v8,
        listen,
        connect: coll_connect,
        reduction_support,
        reg_mr: reg_mr_int,
        dereg_mr,
        iallreduce: iallreduce_int,
        iflush: Some(iflush_int),
        test: test_int,
        close_coll: close,
        close_listen: close,
    }))
}

pub fn collective_v9(name: &'static CStr) -> &'static CollectiveV9 {
    Box::leak(Box::new(CollectiveV9 {
        name: name_ptr(name),
        init: init_legacy,
        devices,
        get_properties: properties_v9,
        listen,
        connect: coll_connect,
        reduction_support,
        reg_mr,
        dereg_mr,
        iallreduce,
        iallgather: Some(iallgather),
        iflush: None,
        test: test_int,
        close_coll: close,
        close_listen: close,
    }))
}

pub fn collective_v10(name: &'static CStr) -> &'static CollectiveV10 {
    Box::leak(Box::new(CollectiveV10 {
        name: name_ptr(name),
        init: init_legacy,
        devices,
        get_properties: properties_v10,
        listen,
        connect: coll_connect,
        reduction_support,
        reg_mr,
        dereg_mr,
        iallreduce,
        iallgather: Some(iallgather),
        iflush: Some(iflush),
        test: test_int,
        close_coll: close,
        close_listen: close,
    }))
}

pub fn collective_v11(name: &'static CStr) -> &'static CollectiveV11 {
    Box::leak(Box::new(CollectiveV11 {
        name: name_ptr(name),
        init: init_v11,
        finalize: finalize_v11,
        devices,
        get_properties: properties_v11,
        listen: listen_v11,
        connect: coll_connect,
        reduction_support,
        reg_mr,
        dereg_mr,
        iallreduce,
        iallgather: Some(iallgather),
        iflush: Some(iflush),
        test: test_size,
        close_coll: close,
        close_listen: close,
    }))
}

pub fn network_table(generation: AbiGeneration, name: &'static CStr) -> SymbolAddr {
    match generation {
        AbiGeneration::V11 => SymbolAddr::of(network_v11(name)),
        AbiGeneration::V10 => SymbolAddr::of(network_v10(name)),
        AbiGeneration::V9 => SymbolAddr::of(network_v9(name, true)),
        AbiGeneration::V8 => SymbolAddr::of(network_v8(name)),
    }
}

pub fn collective_table(generation: AbiGeneration, name: &'static CStr) -> SymbolAddr {
    match generation {
        AbiGeneration::V11 => SymbolAddr::of(collective_v11(name)),
        AbiGeneration::V10 => SymbolAddr::of(collective_v10(name)),
        AbiGeneration::V9 => SymbolAddr::of(collective_v9(name)),
        AbiGeneration::V8 => SymbolAddr::of(collective_v8(name)),
    }
}

// ---- Log capture ----

/// Records every log line emitted on the current thread.
struct CaptureLogger;

thread_local! {
    static RECORDS: RefCell<Vec<(String, log::Level, String)>> = const { RefCell::new(Vec::new()) };
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        RECORDS.with(|r| {
            r.borrow_mut().push((
                record.target().to_string(),
                record.level(),
                record.args().to_string(),
            ))
        });
    }

    fn flush(&self) {}
}

static CAPTURE: CaptureLogger = CaptureLogger;

/// Install the capturing logger (once per process) and clear this thread's records.
pub fn capture_logs() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Another logger may already be installed by a different test binary setup.
        if log::set_logger(&CAPTURE).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    RECORDS.with(|r| r.borrow_mut().clear());
}

/// Messages this thread logged under `target`.
pub fn logged(target: &str) -> Vec<(log::Level, String)> {
    RECORDS.with(|r| {
        r.borrow()
            .iter()
            .filter(|(t, _, _)| t == target)
            .map(|(_, level, message)| (*level, message.clone()))
            .collect()
    })
}
