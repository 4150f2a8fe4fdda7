use std::{io, path::PathBuf};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Everything that can go wrong while preparing or sending one download.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("{0}")]
    InvalidProfile(String),

    #[error("{0}")]
    Extraction(String),

    #[error("extraction did not finish within {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    EngineUnavailable(String),

    #[error("{context} ({}): {source}", .path.display())]
    Filesystem {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("client disconnected after {sent} of {expected} bytes")]
    StreamInterrupted { sent: u64, expected: u64 },
}

impl DownloadError {
    pub fn filesystem(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            context,
            path: path.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUrl(_) | Self::InvalidProfile(_) => StatusCode::BAD_REQUEST,
            Self::Extraction(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Filesystem { .. } | Self::StreamInterrupted { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "INVALID_URL",
            Self::InvalidProfile(_) => "INVALID_PROFILE",
            Self::Extraction(_) => "EXTRACTION_FAILED",
            Self::Timeout(_) => "EXTRACTION_TIMEOUT",
            Self::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            Self::Filesystem { .. } => "FILESYSTEM_ERROR",
            Self::StreamInterrupted { .. } => "STREAM_INTERRUPTED",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(error: DownloadError) -> Self {
        // Filesystem details stay in the logs, the client only learns what failed.
        let message = match &error {
            DownloadError::Filesystem { context, .. } => context.to_string(),
            other => other.to_string(),
        };

        Self {
            status: error.status(),
            message,
            code: Some(error.code()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DownloadError::InvalidUrl("nope".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DownloadError::Extraction("gone".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(DownloadError::Timeout(5).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            DownloadError::EngineUnavailable("missing".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_filesystem_message_hides_path() {
        let error = DownloadError::filesystem(
            "could not create the scratch directory",
            "/srv/secret/dl-1",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(error.to_string().contains("/srv/secret/dl-1"));

        let api = ApiError::from(error);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "could not create the scratch directory");
        assert_eq!(api.code, Some("FILESYSTEM_ERROR"));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::from(DownloadError::Extraction("Video unavailable".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"error": "Video unavailable", "code": "EXTRACTION_FAILED"})
        );
    }
}
