use std::{path::PathBuf, time::Duration};

use tracing::warn;

use crate::format::{FormatPolicy, FormatProfile};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 180;
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
const DEFAULT_COOKIES_FILE: &str = "cookies.txt";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub yt_dlp_bin: PathBuf,
    pub extraction_timeout: Duration,
    pub max_concurrent_downloads: usize,
    /// Parent of every per-request scratch directory.
    pub scratch_root: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub default_profile: FormatProfile,
    pub size_ceiling_override: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            yt_dlp_bin: PathBuf::from(DEFAULT_YT_DLP_BIN),
            extraction_timeout: Duration::from_secs(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            scratch_root: temp.join("clipstream"),
            cache_dir: Some(temp.join("yt_dlp_cache")),
            cookies_file: Some(PathBuf::from(DEFAULT_COOKIES_FILE)),
            default_profile: FormatProfile::default(),
            size_ceiling_override: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_profile = match read_string_env("DOWNLOAD_PROFILE") {
            Some(value) => value.parse::<FormatProfile>().unwrap_or_else(|error| {
                warn!("DOWNLOAD_PROFILE ignored: {error}");
                defaults.default_profile
            }),
            None => defaults.default_profile,
        };

        Self {
            bind_addr: resolve_bind_addr(),
            yt_dlp_bin: read_string_env("YT_DLP_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.yt_dlp_bin),
            extraction_timeout: read_u64_env("YT_DLP_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.extraction_timeout),
            max_concurrent_downloads: read_usize_env("MAX_CONCURRENT_DOWNLOADS")
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_concurrent_downloads),
            scratch_root: read_string_env("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            cache_dir: read_string_env("YT_DLP_CACHE_DIR")
                .map(PathBuf::from)
                .or(defaults.cache_dir),
            cookies_file: read_string_env("COOKIES_FILE")
                .map(PathBuf::from)
                .or(defaults.cookies_file),
            default_profile,
            size_ceiling_override: read_u64_env("MAX_FILESIZE_MB")
                .filter(|value| *value > 0)
                .and_then(megabytes_to_bytes),
        }
    }

    /// Policy for one request: the requested profile or the server default,
    /// with the server-wide ceiling applied on top.
    pub fn policy_for(&self, requested: Option<FormatProfile>) -> FormatPolicy {
        FormatPolicy::for_profile(requested.unwrap_or(self.default_profile))
            .with_size_ceiling(self.size_ceiling_override)
    }
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_usize_env(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn megabytes_to_bytes(megabytes: u64) -> Option<u64> {
    let bytes = megabytes.checked_mul(1024 * 1024);
    if bytes.is_none() {
        warn!("MAX_FILESIZE_MB ignored: {megabytes} MiB does not fit in a byte count");
    }
    bytes
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
