//! Configuration loading and types for posixstore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, the on-disk engine, request constraints, the
//! placement ring, and observability.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// On-disk engine settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Request validation limits.
    #[serde(default)]
    pub constraints: ConstraintsConfig,

    /// Placement ring settings.
    #[serde(default)]
    pub ring: RingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// On-disk engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root under which every volume (account) directory lives.
    #[serde(default = "default_devices")]
    pub devices: PathBuf,

    /// Require each device to be a real mount point.
    #[serde(default)]
    pub mount_check: bool,

    /// Peer used for volume-info lookups.
    #[serde(default = "default_mount_ip")]
    pub mount_ip: String,

    /// When false, container counts are refreshed after every object write.
    #[serde(default = "default_true")]
    pub object_only: bool,

    /// Lock files and the `db_file.db` sentinel live here.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Stat every listed file to report its byte size.
    #[serde(default)]
    pub accurate_size_in_listing: bool,

    /// Recompute container counts on HEAD, the way a listing does.
    #[serde(default)]
    pub container_update_object_count: bool,

    /// Give each server process its own numbered mount directory.
    #[serde(default)]
    pub allow_mount_per_server: bool,

    /// Take an exclusive flock on the parent before creating a directory.
    #[serde(default)]
    pub mkdir_locking: bool,

    /// Place writes under a sibling `<device>_PUT` tree.
    #[serde(default)]
    pub use_put_mount: bool,

    /// Skip fsync and cache drops after writes.
    #[serde(default)]
    pub relaxed_writes: bool,

    /// List every directory, not only directory objects.
    #[serde(default)]
    pub implicit_dir_objects: bool,

    /// Accept legacy pickle-encoded metadata on read.
    #[serde(default)]
    pub read_pickled_metadata: bool,

    /// Read and hash chunk size in bytes.
    #[serde(default = "default_disk_chunk_size")]
    pub disk_chunk_size: usize,

    /// Writers fdatasync after this many bytes.
    #[serde(default = "default_bytes_per_sync")]
    pub bytes_per_sync: u64,

    /// Readers drop page cache after this many bytes.
    #[serde(default = "default_keep_cache_window")]
    pub keep_cache_window: u64,

    /// Owner applied to new files and directories.
    #[serde(default)]
    pub object_uid: Option<u32>,

    /// Group applied to new files and directories.
    #[serde(default)]
    pub object_gid: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            mount_check: false,
            mount_ip: default_mount_ip(),
            object_only: true,
            run_dir: default_run_dir(),
            accurate_size_in_listing: false,
            container_update_object_count: false,
            allow_mount_per_server: false,
            mkdir_locking: false,
            use_put_mount: false,
            relaxed_writes: false,
            implicit_dir_objects: false,
            read_pickled_metadata: false,
            disk_chunk_size: default_disk_chunk_size(),
            bytes_per_sync: default_bytes_per_sync(),
            keep_cache_window: default_keep_cache_window(),
            object_uid: None,
            object_gid: None,
        }
    }
}

/// Limits applied to requests before they reach the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintsConfig {
    /// Admit `X-Object-Manifest` and friends instead of rejecting them.
    #[serde(default)]
    pub ignore_unsupported_headers: bool,

    /// Longest allowed path segment (directory component), in bytes.
    #[serde(default = "default_max_component_length")]
    pub max_object_name_component_length: usize,

    /// Largest accepted object body (default 5 GiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_max_object_name_length")]
    pub max_object_name_length: usize,

    #[serde(default = "default_max_container_name_length")]
    pub max_container_name_length: usize,

    #[serde(default = "default_max_meta_name_length")]
    pub max_meta_name_length: usize,

    #[serde(default = "default_max_meta_value_length")]
    pub max_meta_value_length: usize,

    #[serde(default = "default_max_meta_count")]
    pub max_meta_count: usize,

    #[serde(default = "default_max_meta_overall_size")]
    pub max_meta_overall_size: usize,

    /// Default and maximum `limit` for listings.
    #[serde(default = "default_container_listing_limit")]
    pub container_listing_limit: usize,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self {
            ignore_unsupported_headers: false,
            max_object_name_component_length: default_max_component_length(),
            max_file_size: default_max_file_size(),
            max_object_name_length: default_max_object_name_length(),
            max_container_name_length: default_max_container_name_length(),
            max_meta_name_length: default_max_meta_name_length(),
            max_meta_value_length: default_max_meta_value_length(),
            max_meta_count: default_max_meta_count(),
            max_meta_overall_size: default_max_meta_overall_size(),
            container_listing_limit: default_container_listing_limit(),
        }
    }
}

/// Placement ring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RingConfig {
    /// Path of the JSON ring file; it must exist at startup.
    #[serde(default = "default_ring_path")]
    pub path: PathBuf,

    /// Token stripped from account names before device lookup.
    #[serde(default = "default_reseller_prefix")]
    pub reseller_prefix: String,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            path: default_ring_path(),
            reseller_prefix: default_reseller_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Controls Prometheus metrics collection and the `/healthcheck` probe.
/// Both are enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/healthcheck` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6010
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_devices() -> PathBuf {
    PathBuf::from("/mnt/swiftonfile")
}

fn default_mount_ip() -> String {
    "localhost".to_string()
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("/var/run/swift")
}

fn default_disk_chunk_size() -> usize {
    65_536
}

fn default_bytes_per_sync() -> u64 {
    512 * 1024 * 1024
}

fn default_keep_cache_window() -> u64 {
    1024 * 1024
}

fn default_max_component_length() -> usize {
    255
}

fn default_max_file_size() -> u64 {
    5_368_709_122 // 5 GiB + 2, as the host object server allows
}

fn default_max_object_name_length() -> usize {
    1024
}

fn default_max_container_name_length() -> usize {
    256
}

fn default_max_meta_name_length() -> usize {
    128
}

fn default_max_meta_value_length() -> usize {
    256
}

fn default_max_meta_count() -> usize {
    90
}

fn default_max_meta_overall_size() -> usize {
    4096
}

fn default_container_listing_limit() -> usize {
    10_000
}

fn default_ring_path() -> PathBuf {
    PathBuf::from("/etc/swift/object.ring.json")
}

fn default_reseller_prefix() -> String {
    "AUTH_".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
