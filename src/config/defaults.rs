/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Event Socket defaults
pub const DEFAULT_ESL_HOST: &str = "127.0.0.1";
pub const DEFAULT_ESL_PORT: u16 = 8021;
pub const DEFAULT_ESL_PASSWORD: &str = "ClueCon";
pub const DEFAULT_CONNECT_TIMEOUT: &str = "10s";
pub const DEFAULT_RECONNECT_INTERVAL: &str = "5s";

// Metrics endpoint defaults
pub const DEFAULT_METRICS_HOST: &str = "localhost";
pub const DEFAULT_METRICS_PORT: u16 = 8031;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_METRICS_PREFIX: &str = "bbb_fs_";

// Environment
pub const ENV_PREFIX: &str = "FSX_";
pub const DEFAULT_LOG_TARGET: &str = "fs_audio_exporter";
