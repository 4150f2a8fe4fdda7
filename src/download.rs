use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::{sync::Semaphore, time::timeout};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    config::{ServerConfig, non_empty},
    error::{ApiError, DownloadError},
    extractor::{FetchRequest, MediaExtractor, MediaMetadata, OUTPUT_TEMPLATE},
    format::{FormatPolicy, FormatProfile},
    sanitize::build_content_disposition,
    scratch::ScratchDir,
    transfer::FileTransfer,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub extractor: Arc<dyn MediaExtractor>,
    download_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: ServerConfig, extractor: Arc<dyn MediaExtractor>) -> Self {
        let permits = config.max_concurrent_downloads.max(1);
        Self {
            config: Arc::new(config),
            extractor,
            download_semaphore: Arc::new(Semaphore::new(permits)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub url: Option<String>,
    pub profile: Option<String>,
}

/// A fetched file whose scratch directory now belongs to the transfer.
pub struct PreparedDownload {
    pub metadata: MediaMetadata,
    pub transfer: FileTransfer,
}

pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("download", %request_id);

    async move {
        let url = validate_url(query.url.as_deref())?;
        let profile = parse_profile(query.profile.as_deref())?;
        let profile = profile.unwrap_or(state.config.default_profile);
        let policy = state.config.policy_for(Some(profile));
        info!(url, %profile, "download requested");

        let prepared = prepare_download(&state, request_id, url, &policy)
            .await
            .inspect_err(|error| warn!("download failed: {error}"))?;

        build_response(prepared, &policy)
    }
    .instrument(span)
    .await
}

fn validate_url(raw: Option<&str>) -> Result<&str, DownloadError> {
    let url = raw
        .and_then(non_empty)
        .ok_or_else(|| DownloadError::InvalidUrl("the url query parameter is required".into()))?;
    let parsed = Url::parse(url)
        .map_err(|error| DownloadError::InvalidUrl(format!("invalid URL: {error}")))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(DownloadError::InvalidUrl(
            "only http and https URLs are supported".into(),
        ));
    }

    Ok(url)
}

fn parse_profile(raw: Option<&str>) -> Result<Option<FormatProfile>, DownloadError> {
    raw.and_then(non_empty)
        .map(str::parse::<FormatProfile>)
        .transpose()
        .map_err(|error| DownloadError::InvalidProfile(error.to_string()))
}

/// Runs the engine inside a fresh scratch directory and opens its output. On
/// any failure the directory is gone by the time this returns.
pub async fn prepare_download(
    state: &AppState,
    request_id: Uuid,
    url: &str,
    policy: &FormatPolicy,
) -> Result<PreparedDownload, DownloadError> {
    let permit = state
        .download_semaphore
        .acquire()
        .await
        .map_err(|_| {
            DownloadError::EngineUnavailable("download capacity is unavailable".into())
        })?;

    let scratch = ScratchDir::create_in(&state.config.scratch_root, request_id)?;
    let request = FetchRequest {
        url,
        policy,
        output_template: scratch
            .path()
            .join(OUTPUT_TEMPLATE)
            .to_string_lossy()
            .into_owned(),
    };

    let extraction: Result<(MediaMetadata, PathBuf), DownloadError> = async {
        let limit = state.config.extraction_timeout;
        let metadata = timeout(limit, state.extractor.resolve_and_fetch(&request))
            .await
            .map_err(|_| DownloadError::Timeout(limit.as_secs()))??;
        let path = resolve_downloaded_file(
            state.extractor.as_ref(),
            scratch.path(),
            &metadata,
            &request.output_template,
        )
        .await?;
        Ok((metadata, path))
    }
    .await;
    drop(permit);

    match extraction {
        Ok((metadata, path)) => {
            debug!(path = %path.display(), "engine output resolved");
            let transfer = FileTransfer::open(&path, scratch).await?;
            Ok(PreparedDownload { metadata, transfer })
        }
        Err(error) => {
            scratch.release_offloaded().await;
            Err(error)
        }
    }
}

fn build_response(
    prepared: PreparedDownload,
    policy: &FormatPolicy,
) -> Result<Response, ApiError> {
    let PreparedDownload { metadata, transfer } = prepared;
    let disposition =
        build_content_disposition(metadata.title.as_deref(), &policy.merge_container);

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(policy.content_type()));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(transfer.len));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|_| ApiError::internal("could not build the download header"))?,
    );

    info!(id = %metadata.id, bytes = transfer.len, "streaming download");
    let body = Body::from_stream(transfer.into_stream());
    Ok((headers, body).into_response())
}

/// Finds the file the engine wrote: the path it printed, then the rendered
/// output template, then whatever regular file sits in the scratch directory.
/// Anything resolving outside the scratch directory is ignored.
async fn resolve_downloaded_file(
    extractor: &dyn MediaExtractor,
    scratch_dir: &Path,
    metadata: &MediaMetadata,
    output_template: &str,
) -> Result<PathBuf, DownloadError> {
    let canonical_dir = tokio::fs::canonicalize(scratch_dir).await.map_err(|error| {
        DownloadError::filesystem("could not resolve the scratch directory", scratch_dir, error)
    })?;

    let mut candidates = Vec::new();
    if let Some(printed) = &metadata.file_path {
        candidates.push(printed.clone());
        if printed.is_relative() {
            candidates.push(scratch_dir.join(printed));
        }
    }
    candidates.push(extractor.build_output_path(metadata, output_template));

    for candidate in &candidates {
        if let Some(path) = resolve_candidate(&canonical_dir, candidate).await? {
            return Ok(path);
        }
    }

    let mut entries = tokio::fs::read_dir(scratch_dir).await.map_err(|error| {
        DownloadError::filesystem("could not list the scratch directory", scratch_dir, error)
    })?;
    while let Some(entry) = entries.next_entry().await.map_err(|error| {
        DownloadError::filesystem("could not list the scratch directory", scratch_dir, error)
    })? {
        let path = entry.path();
        if is_partial_download(&path) {
            continue;
        }
        if let Some(path) = resolve_candidate(&canonical_dir, &path).await? {
            return Ok(path);
        }
    }

    Err(DownloadError::Extraction(
        "the extraction engine did not produce a file".to_string(),
    ))
}

async fn resolve_candidate(
    canonical_dir: &Path,
    candidate: &Path,
) -> Result<Option<PathBuf>, DownloadError> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(DownloadError::filesystem(
                "could not inspect the downloaded file",
                candidate,
                error,
            ));
        }
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical = tokio::fs::canonicalize(candidate).await.map_err(|error| {
        DownloadError::filesystem("could not resolve the downloaded file", candidate, error)
    })?;

    if !canonical.starts_with(canonical_dir) {
        warn!("ignoring engine output outside the scratch directory: {:?}", canonical);
        return Ok(None);
    }

    Ok(Some(canonical))
}

fn is_partial_download(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "part" | "ytdl" | "temp"))
}
