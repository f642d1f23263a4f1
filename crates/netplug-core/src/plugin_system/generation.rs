use std::ffi::CStr;
use std::fmt;

use serde::Serialize;

use crate::kernel::constants::{COLLECTIVE_SYMBOL_PREFIX, NETWORK_SYMBOL_PREFIX};

/// One frozen shape of the plugin function-table interface.
///
/// The set is closed; adding a generation means adding a variant, its symbol
/// names, its table types and its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "u32")]
pub enum AbiGeneration {
    V8,
    V9,
    V10,
    V11,
}

impl AbiGeneration {
    /// The generation the rest of the runtime is written against.
    pub const CURRENT: AbiGeneration = AbiGeneration::V11;

    /// Probe order: newest first.
    pub const DESCENDING: [AbiGeneration; 4] = [
        AbiGeneration::V11,
        AbiGeneration::V10,
        AbiGeneration::V9,
        AbiGeneration::V8,
    ];

    /// Number of supported generations
    pub const COUNT: usize = Self::DESCENDING.len();

    /// The ordinal used in symbol names and diagnostics.
    pub fn number(self) -> u32 {
        match self {
            AbiGeneration::V8 => 8,
            AbiGeneration::V9 => 9,
            AbiGeneration::V10 => 10,
            AbiGeneration::V11 => 11,
        }
    }

    /// Look a generation up by its ordinal.
    pub fn from_number(number: u32) -> Option<Self> {
        Self::DESCENDING.into_iter().find(|g| g.number() == number)
    }

    /// Whether tables of this generation are bound without an adapter.
    pub fn is_current(self) -> bool {
        self == Self::CURRENT
    }

    /// Dense index, used for cache slots.
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Exported symbol holding this generation's table for `family`.
    ///
    /// Spelled out literally: plugins are matched on these exact bytes.
    pub fn symbol_name(self, family: TransportFamily) -> &'static CStr {
        match (family, self) {
            (TransportFamily::Network, AbiGeneration::V11) => c"networkPlugin_v11",
            (TransportFamily::Network, AbiGeneration::V10) => c"networkPlugin_v10",
            (TransportFamily::Network, AbiGeneration::V9) => c"networkPlugin_v9",
            (TransportFamily::Network, AbiGeneration::V8) => c"networkPlugin_v8",
            (TransportFamily::Collective, AbiGeneration::V11) => c"collectivePlugin_v11",
            (TransportFamily::Collective, AbiGeneration::V10) => c"collectivePlugin_v10",
            (TransportFamily::Collective, AbiGeneration::V9) => c"collectivePlugin_v9",
            (TransportFamily::Collective, AbiGeneration::V8) => c"collectivePlugin_v8",
        }
    }
}

impl fmt::Display for AbiGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

impl From<AbiGeneration> for u32 {
    fn from(generation: AbiGeneration) -> Self {
        generation.number()
    }
}

/// The two independently resolved transport roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportFamily {
    /// Point-to-point network transport
    Network,
    /// Collective-offload network transport
    Collective,
}

impl TransportFamily {
    pub const ALL: [TransportFamily; 2] = [TransportFamily::Network, TransportFamily::Collective];

    /// Prefix of this family's exported symbols.
    pub fn symbol_prefix(self) -> &'static str {
        match self {
            TransportFamily::Network => NETWORK_SYMBOL_PREFIX,
            TransportFamily::Collective => COLLECTIVE_SYMBOL_PREFIX,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TransportFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFamily::Network => write!(f, "network"),
            TransportFamily::Collective => write!(f, "collective"),
        }
    }
}
