//! HTTP service that hands a media URL to yt-dlp and streams the single file
//! it produces back to the caller, deleting the working directory afterwards.

pub mod config;
pub mod download;
pub mod error;
pub mod extractor;
pub mod format;
pub mod sanitize;
pub mod scratch;
pub mod transfer;

use axum::{
    Json, Router,
    http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH},
    routing::get,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::download::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/download", get(download::download))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ServerConfig,
        error::DownloadError,
        extractor::{FetchRequest, MediaExtractor, MediaMetadata},
    };
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{
            Method, Request, StatusCode,
            header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN},
        },
    };
    use std::{path::Path, sync::Arc};
    use tower::ServiceExt;

    struct CannedExtractor;

    #[async_trait]
    impl MediaExtractor for CannedExtractor {
        async fn resolve_and_fetch(
            &self,
            request: &FetchRequest<'_>,
        ) -> Result<MediaMetadata, DownloadError> {
            if request.url.contains("broken") {
                return Err(DownloadError::Extraction("no video formats found".into()));
            }

            let dir = Path::new(&request.output_template).parent().unwrap();
            tokio::fs::write(dir.join("canned.mp4"), b"canned media").await.unwrap();
            Ok(MediaMetadata {
                id: "canned".to_string(),
                title: Some("Canned: clip".to_string()),
                ext: Some("mp4".to_string()),
                file_path: None,
            })
        }
    }

    fn app(root: &Path) -> Router {
        let config = ServerConfig {
            scratch_root: root.to_path_buf(),
            ..ServerConfig::default()
        };
        router(AppState::new(config, Arc::new(CannedExtractor)))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(ORIGIN, "https://frontend.example")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let root = tempfile::tempdir().unwrap();
        let response = app(root.path()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_download_route() {
        let root = tempfile::tempdir().unwrap();
        let uri = format!(
            "/download?url={}",
            urlencoding::encode("https://example.com/watch?v=canned&t=3")
        );

        let response = app(root.path()).oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"Canned_ clip.mp4\"; filename*=UTF-8''Canned%3A%20clip.mp4"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"canned media");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_route_failure_is_json() {
        let root = tempfile::tempdir().unwrap();
        let response = app(root.path())
            .oneshot(get("/download?url=https%3A%2F%2Fexample.com%2Fbroken"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "no video formats found");
        assert_eq!(body["code"], "EXTRACTION_FAILED");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_route_requires_url() {
        let root = tempfile::tempdir().unwrap();
        let response = app(root.path()).oneshot(get("/download")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "INVALID_URL");
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let root = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/download")
            .header(ORIGIN, "https://anywhere.example")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();

        let response = app(root.path()).oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
