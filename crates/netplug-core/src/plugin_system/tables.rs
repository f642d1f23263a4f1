//! Per-family dispatch from a resolved generation to its table type and to
//! the binding or adapter that presents it through the current call surface.
use std::sync::Arc;

use crate::plugin_system::abi::v8::{CollectiveV8, CollectiveV8Adapter, NetworkV8, NetworkV8Adapter};
use crate::plugin_system::abi::v9::{CollectiveV9, CollectiveV9Adapter, NetworkV9, NetworkV9Adapter};
use crate::plugin_system::abi::v10::{
    CollectiveV10, CollectiveV10Adapter, NetworkV10, NetworkV10Adapter,
};
use crate::plugin_system::abi::v11::{
    CollectiveV11, CollectiveV11Binding, NetworkV11, NetworkV11Binding,
};
use crate::plugin_system::abi::TableRef;
use crate::plugin_system::generation::{AbiGeneration, TransportFamily};
use crate::plugin_system::module::{SymbolAddr, SymbolSource};
use crate::plugin_system::resolver::FamilyTables;
use crate::plugin_system::traits::{CollNetTransport, NetTransport};

/// A resolved point-to-point network table of any supported generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTable {
    V11(TableRef<NetworkV11>),
    V10(TableRef<NetworkV10>),
    V9(TableRef<NetworkV9>),
    V8(TableRef<NetworkV8>),
}

impl NetworkTable {
    /// # Safety
    /// `addr` must point at a network table laid out as `generation` declares.
    pub unsafe fn at(generation: AbiGeneration, addr: SymbolAddr) -> Self {
        unsafe {
            match generation {
                AbiGeneration::V11 => NetworkTable::V11(TableRef::from_addr(addr)),
                AbiGeneration::V10 => NetworkTable::V10(TableRef::from_addr(addr)),
                AbiGeneration::V9 => NetworkTable::V9(TableRef::from_addr(addr)),
                AbiGeneration::V8 => NetworkTable::V8(TableRef::from_addr(addr)),
            }
        }
    }

    pub fn generation(&self) -> AbiGeneration {
        match self {
            NetworkTable::V11(t) => t.generation(),
            NetworkTable::V10(t) => t.generation(),
            NetworkTable::V9(t) => t.generation(),
            NetworkTable::V8(t) => t.generation(),
        }
    }

    /// Address of the table inside the module.
    pub fn addr(&self) -> *const () {
        match self {
            NetworkTable::V11(t) => t.as_ptr().cast(),
            NetworkTable::V10(t) => t.as_ptr().cast(),
            NetworkTable::V9(t) => t.as_ptr().cast(),
            NetworkTable::V8(t) => t.as_ptr().cast(),
        }
    }

    /// # Safety
    /// The exporting module must still be loaded.
    pub unsafe fn display_name(&self) -> String {
        unsafe {
            match self {
                NetworkTable::V11(t) => t.display_name(),
                NetworkTable::V10(t) => t.display_name(),
                NetworkTable::V9(t) => t.display_name(),
                NetworkTable::V8(t) => t.display_name(),
            }
        }
    }

    /// Present the table through [`NetTransport`], keeping `module` loaded.
    pub fn bind(self, module: Arc<dyn SymbolSource>) -> Arc<dyn NetTransport> {
        match self {
            NetworkTable::V11(t) => Arc::new(NetworkV11Binding::new(t, module)),
            NetworkTable::V10(t) => Arc::new(NetworkV10Adapter::new(t, module)),
            NetworkTable::V9(t) => Arc::new(NetworkV9Adapter::new(t, module)),
            NetworkTable::V8(t) => Arc::new(NetworkV8Adapter::new(t, module)),
        }
    }
}

/// A resolved collective-offload table of any supported generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveTable {
    V11(TableRef<CollectiveV11>),
    V10(TableRef<CollectiveV10>),
    V9(TableRef<CollectiveV9>),
    V8(TableRef<CollectiveV8>),
}

impl CollectiveTable {
    /// # Safety
    /// `addr` must point at a collective table laid out as `generation` declares.
    pub unsafe fn at(generation: AbiGeneration, addr: SymbolAddr) -> Self {
        unsafe {
            match generation {
                AbiGeneration::V11 => CollectiveTable::V11(TableRef::from_addr(addr)),
                AbiGeneration::V10 => CollectiveTable::V10(TableRef::from_addr(addr)),
                AbiGeneration::V9 => CollectiveTable::V9(TableRef::from_addr(addr)),
                AbiGeneration::V8 => CollectiveTable::V8(TableRef::from_addr(addr)),
            }
        }
    }

    pub fn generation(&self) -> AbiGeneration {
        match self {
            CollectiveTable::V11(t) => t.generation(),
            CollectiveTable::V10(t) => t.generation(),
            CollectiveTable::V9(t) => t.generation(),
            CollectiveTable::V8(t) => t.generation(),
        }
    }

    pub fn addr(&self) -> *const () {
        match self {
            CollectiveTable::V11(t) => t.as_ptr().cast(),
            CollectiveTable::V10(t) => t.as_ptr().cast(),
            CollectiveTable::V9(t) => t.as_ptr().cast(),
            CollectiveTable::V8(t) => t.as_ptr().cast(),
        }
    }

    /// # Safety
    /// The exporting module must still be loaded.
    pub unsafe fn display_name(&self) -> String {
        unsafe {
            match self {
                CollectiveTable::V11(t) => t.display_name(),
                CollectiveTable::V10(t) => t.display_name(),
                CollectiveTable::V9(t) => t.display_name(),
                CollectiveTable::V8(t) => t.display_name(),
            }
        }
    }

    pub fn bind(self, module: Arc<dyn SymbolSource>) -> Arc<dyn CollNetTransport> {
        match self {
            CollectiveTable::V11(t) => Arc::new(CollectiveV11Binding::new(t, module)),
            CollectiveTable::V10(t) => Arc::new(CollectiveV10Adapter::new(t, module)),
            CollectiveTable::V9(t) => Arc::new(CollectiveV9Adapter::new(t, module)),
            CollectiveTable::V8(t) => Arc::new(CollectiveV8Adapter::new(t, module)),
        }
    }
}

/// The point-to-point network family.
#[derive(Debug)]
pub enum Network {}

impl FamilyTables for Network {
    const FAMILY: TransportFamily = TransportFamily::Network;
    type Table = NetworkTable;
    type Transport = dyn NetTransport;

    unsafe fn table_at(generation: AbiGeneration, addr: SymbolAddr) -> NetworkTable {
        unsafe { NetworkTable::at(generation, addr) }
    }

    fn generation_of(table: &NetworkTable) -> AbiGeneration {
        table.generation()
    }

    unsafe fn display_name(table: &NetworkTable) -> String {
        unsafe { table.display_name() }
    }

    fn bind(table: NetworkTable, module: Arc<dyn SymbolSource>) -> Arc<dyn NetTransport> {
        table.bind(module)
    }
}

/// The collective-offload family.
#[derive(Debug)]
pub enum Collective {}

impl FamilyTables for Collective {
    const FAMILY: TransportFamily = TransportFamily::Collective;
    type Table = CollectiveTable;
    type Transport = dyn CollNetTransport;

    unsafe fn table_at(generation: AbiGeneration, addr: SymbolAddr) -> CollectiveTable {
        unsafe { CollectiveTable::at(generation, addr) }
    }

    fn generation_of(table: &CollectiveTable) -> AbiGeneration {
        table.generation()
    }

    unsafe fn display_name(table: &CollectiveTable) -> String {
        unsafe { table.display_name() }
    }

    fn bind(table: CollectiveTable, module: Arc<dyn SymbolSource>) -> Arc<dyn CollNetTransport> {
        table.bind(module)
    }
}
