//! A network plugin that only speaks ABI generation 10.
//!
//! Two host devices, no collective family. Connection and data-path entry
//! points report an internal error: the loader tests never drive traffic.
use std::ffi::{c_char, c_int, c_void};
use std::ptr;

const SUCCESS: c_int = 0;
const INTERNAL_ERROR: c_int = 3;

type Logger = unsafe extern "C" fn(level: c_int, message: *const c_char);

#[repr(C)]
pub struct VDeviceProps {
    ndevs: c_int,
    devs: [c_int; 4],
}

#[repr(C)]
pub struct PropertiesV10 {
    name: *mut c_char,
    pci_path: *mut c_char,
    guid: u64,
    ptr_support: c_int,
    reg_is_global: c_int,
    speed: c_int,
    port: c_int,
    latency: f32,
    max_comms: c_int,
    max_recvs: c_int,
    net_device_type: c_int,
    net_device_version: c_int,
    vprops: VDeviceProps,
    max_p2p_bytes: usize,
    max_coll_bytes: usize,
    max_multi_request_size: c_int,
}

#[repr(C)]
pub struct NetworkV10 {
    name: *const c_char,
    init: unsafe extern "C" fn(Option<Logger>) -> c_int,
    devices: unsafe extern "C" fn(*mut c_int) -> c_int,
    get_properties: unsafe extern "C" fn(c_int, *mut PropertiesV10) -> c_int,
    listen: unsafe extern "C" fn(c_int, *mut c_void, *mut *mut c_void) -> c_int,
    connect: unsafe extern "C" fn(c_int, *mut c_void, *mut *mut c_void) -> c_int,
    accept: unsafe extern "C" fn(*mut c_void, *mut *mut c_void) -> c_int,
    reg_mr: unsafe extern "C" fn(*mut c_void, *mut c_void, usize, c_int, *mut *mut c_void) -> c_int,
    dereg_mr: unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int,
    isend: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        usize,
        c_int,
        *mut c_void,
        *mut c_void,
        *mut *mut c_void,
    ) -> c_int,
    irecv: unsafe extern "C" fn(
        *mut c_void,
        c_int,
        *mut *mut c_void,
        *mut usize,
        *mut c_int,
        *mut *mut c_void,
        *mut *mut c_void,
        *mut *mut c_void,
    ) -> c_int,
    test: unsafe extern "C" fn(*mut c_void, *mut c_int, *mut c_int) -> c_int,
    close_send: unsafe extern "C" fn(*mut c_void) -> c_int,
    close_recv: unsafe extern "C" fn(*mut c_void) -> c_int,
    close_listen: unsafe extern "C" fn(*mut c_void) -> c_int,
    make_vdevice: Option<unsafe extern "C" fn(*mut c_int, *mut VDeviceProps) -> c_int>,
}

// The table is immutable data read by the host.
unsafe impl Sync for NetworkV10 {}

unsafe extern "C" fn init(logger: Option<Logger>) -> c_int {
    if let Some(logger) = logger {
        logger(1, b"v10 test plugin initialized\0".as_ptr().cast());
    }
    SUCCESS
}

unsafe extern "C" fn devices(ndev: *mut c_int) -> c_int {
    *ndev = 2;
    SUCCESS
}

unsafe extern "C" fn get_properties(dev: c_int, props: *mut PropertiesV10) -> c_int {
    if !(0..2).contains(&dev) {
        return 4;
    }
    ptr::write(
        props,
        PropertiesV10 {
            name: b"test0\0".as_ptr() as *mut c_char,
            pci_path: ptr::null_mut(),
            guid: 0x1000 + dev as u64,
            ptr_support: 0x1,
            reg_is_global: 0,
            speed: 100_000,
            port: dev + 1,
            latency: 0.0,
            max_comms: 1024,
            max_recvs: 1,
            net_device_type: 0,
            net_device_version: 0,
            vprops: VDeviceProps { ndevs: 1, devs: [dev, 0, 0, 0] },
            max_p2p_bytes: 1 << 31,
            max_coll_bytes: 1 << 31,
            max_multi_request_size: 1,
        },
    );
    SUCCESS
}

unsafe extern "C" fn no_endpoint(_: c_int, _: *mut c_void, _: *mut *mut c_void) -> c_int {
    INTERNAL_ERROR
}

unsafe extern "C" fn no_accept(_: *mut c_void, _: *mut *mut c_void) -> c_int {
    INTERNAL_ERROR
}

unsafe extern "C" fn no_reg(_: *mut c_void, _: *mut c_void, _: usize, _: c_int, _: *mut *mut c_void) -> c_int {
    INTERNAL_ERROR
}

unsafe extern "C" fn no_dereg(_: *mut c_void, _: *mut c_void) -> c_int {
    INTERNAL_ERROR
}

unsafe extern "C" fn no_send(
    _: *mut c_void,
    _: *mut c_void,
    _: usize,
    _: c_int,
    _: *mut c_void,
    _: *mut c_void,
    _: *mut *mut c_void,
) -> c_int {
    INTERNAL_ERROR
}

unsafe extern "C" fn no_recv(
    _: *mut c_void,
    _: c_int,
    _: *mut *mut c_void,
    _: *mut usize,
    _: *mut c_int,
    _: *mut *mut c_void,
    _: *mut *mut c_void,
    _: *mut *mut c_void,
) -> c_int {
    INTERNAL_ERROR
}

unsafe extern "C" fn no_test(_: *mut c_void, _: *mut c_int, _: *mut c_int) -> c_int {
    INTERNAL_ERROR
}

unsafe extern "C" fn close(_: *mut c_void) -> c_int {
    SUCCESS
}

#[no_mangle]
#[allow(non_upper_case_globals)]
pub static networkPlugin_v10: NetworkV10 = NetworkV10 {
    name: b"v10-test\0".as_ptr() as *const c_char,
    init,
    devices,
    get_properties,
    listen: no_endpoint,
    connect: no_endpoint,
    accept: no_accept,
    reg_mr: no_reg,
    dereg_mr: no_dereg,
    isend: no_send,
    irecv: no_recv,
    test: no_test,
    close_send: close,
    close_recv: close,
    close_listen: close,
    make_vdevice: None,
};
