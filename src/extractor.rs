use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{config::ServerConfig, error::DownloadError, format::FormatPolicy};

/// Output template handed to the engine, relative to the scratch directory.
pub const OUTPUT_TEMPLATE: &str = "%(id)s.%(ext)s";

// Emitted once the final file is in place, after merging.
const PRINT_METADATA: &str = "after_move:%(.{id,title,ext,filepath})j";

/// What the engine reports about the file it produced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaMetadata {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default, rename = "filepath")]
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub policy: &'a FormatPolicy,
    /// Absolute template, rooted in the request's scratch directory.
    pub output_template: String,
}

/// The external extraction engine. Implementations resolve a URL, pick a
/// rendition according to the policy and write exactly one file.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn resolve_and_fetch(
        &self,
        request: &FetchRequest<'_>,
    ) -> Result<MediaMetadata, DownloadError>;

    fn build_output_path(&self, metadata: &MediaMetadata, template: &str) -> PathBuf {
        PathBuf::from(render_output_template(metadata, template))
    }
}

/// Expands the `%(field)s` placeholders this service uses. Missing fields
/// render as `NA`, the engine's own placeholder.
pub fn render_output_template(metadata: &MediaMetadata, template: &str) -> String {
    template
        .replace("%(id)s", &metadata.id)
        .replace("%(title)s", metadata.title.as_deref().unwrap_or("NA"))
        .replace("%(ext)s", metadata.ext.as_deref().unwrap_or("NA"))
}

/// Runs the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    cache_dir: Option<PathBuf>,
    cookies_file: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cache_dir: None,
            cookies_file: None,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            binary: config.yt_dlp_bin.clone(),
            cache_dir: config.cache_dir.clone(),
            cookies_file: config.cookies_file.clone(),
        }
    }

    fn build_args(&self, request: &FetchRequest<'_>, cookies: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
            "--print".to_string(),
            PRINT_METADATA.to_string(),
            "-o".to_string(),
            request.output_template.clone(),
        ];
        args.extend(request.policy.to_args());

        match &self.cache_dir {
            Some(dir) => {
                args.push("--cache-dir".to_string());
                args.push(dir.to_string_lossy().into_owned());
            }
            None => args.push("--no-cache-dir".to_string()),
        }

        if let Some(cookies) = cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args.push("--".to_string());
        args.push(request.url.to_string());
        args
    }

    async fn usable_cookies_file(&self) -> Option<&Path> {
        let path = self.cookies_file.as_deref()?;
        match tokio::fs::try_exists(path).await {
            Ok(true) => Some(path),
            Ok(false) => None,
            Err(error) => {
                warn!("could not check cookies file {:?}: {error}", path);
                None
            }
        }
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    async fn resolve_and_fetch(
        &self,
        request: &FetchRequest<'_>,
    ) -> Result<MediaMetadata, DownloadError> {
        let cookies = self.usable_cookies_file().await;
        let args = self.build_args(request, cookies);
        debug!(binary = ?self.binary, ?args, "running extraction engine");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    DownloadError::EngineUnavailable(format!(
                        "{} is not installed on this server",
                        self.binary.display()
                    ))
                } else {
                    DownloadError::EngineUnavailable(format!(
                        "could not start {}: {error}",
                        self.binary.display()
                    ))
                }
            })?;

        if !output.status.success() {
            return Err(DownloadError::Extraction(run_error_message(&output.stderr)));
        }

        parse_printed_metadata(&output.stdout).ok_or_else(|| {
            DownloadError::Extraction(
                "no file was produced; every matching rendition may exceed the size ceiling"
                    .to_string(),
            )
        })
    }
}

/// Last JSON line printed by the engine, if any.
pub fn parse_printed_metadata(stdout: &[u8]) -> Option<MediaMetadata> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<MediaMetadata>(line).ok())
        .next_back()
}

/// Condenses engine stderr into one line fit for an error payload.
pub fn run_error_message(stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let line = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("the extraction engine could not complete the download");
    let message = line.strip_prefix("ERROR:").map(str::trim).unwrap_or(line);

    if message.to_ascii_lowercase().contains("unsupported url") {
        "unsupported or invalid URL".to_string()
    } else {
        message.to_string()
    }
}
