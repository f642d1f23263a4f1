/// Environment variable selecting the network plugin library (`none` disables loading)
pub const ENV_NET_PLUGIN: &str = "NETPLUG_NET_PLUGIN";

/// Environment variable enabling or disabling the collective family
pub const ENV_COLLNET_ENABLE: &str = "NETPLUG_COLLNET_ENABLE";

/// Library stem used when no plugin name is configured.
/// Expands to `libnetplug-net.so` on Linux.
pub const DEFAULT_PLUGIN_STEM: &str = "netplug-net";

/// Plugin name that disables plugin loading altogether
pub const PLUGIN_DISABLED: &str = "none";

/// Exported symbol prefix of the point-to-point network family
pub const NETWORK_SYMBOL_PREFIX: &str = "networkPlugin";

/// Exported symbol prefix of the collective-offload family
pub const COLLECTIVE_SYMBOL_PREFIX: &str = "collectivePlugin";

/// Log target for resolution diagnostics
pub const LOG_TARGET_NET: &str = "netplug::net";

/// Log target for messages emitted by the plugin through its logger callback
pub const LOG_TARGET_PLUGIN: &str = "netplug::plugin";

/// Log target for library open/close and adoption
pub const LOG_TARGET_LOADER: &str = "netplug::loader";

/// Size in bytes of the opaque connection handle exchanged out of band
pub const NET_HANDLE_MAXSIZE: usize = 128;

/// Maximum physical devices folded into one virtual device
pub const MAX_DEVS_PER_VDEVICE: usize = 4;
