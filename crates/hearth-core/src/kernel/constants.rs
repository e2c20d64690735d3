/// Manifest file every plugin directory carries
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Default plugins directory
pub const DEFAULT_PLUGINS_DIR: &str = "plugins";

/// Default per-plugin data directory
pub const DEFAULT_DATA_DIR: &str = "plugin-data";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "hearth.json";

/// Symbol a native plugin library exports to create its plugin
pub const ENTRY_SYMBOL: &[u8] = b"hearth_plugin_create";

/// Polls performed by a verified unload before reporting a leak
pub const DEFAULT_UNLOAD_MAX_ATTEMPTS: u32 = 10;

/// Delay between unload polls, in milliseconds
pub const DEFAULT_UNLOAD_RETRY_DELAY_MS: u64 = 50;

