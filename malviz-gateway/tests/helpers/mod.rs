//! Test Helper Utilities
//!
//! Shared utilities for testing malviz-gateway: a scripted engine that
//! records its invocations, multipart request builders, and response decoding.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use malviz_common::config::RetentionPolicy;
use malviz_gateway::engine::{AnalysisEngine, EngineError, EngineOutput};
use malviz_gateway::pipeline::AnalysisPipeline;
use malviz_gateway::staging::StagingArea;
use malviz_gateway::{build_router, AppState, HttpOptions};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BOUNDARY: &str = "malviz-test-boundary-7MA4YWxkTrZu0gW";

/// What the fake engine does when run
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Finish with this process output
    Output(EngineOutput),
    /// Report a timeout
    Timeout(Duration),
}

/// File as the engine saw it at invocation time
#[derive(Debug, Clone)]
pub struct SeenFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Scripted [`AnalysisEngine`] with an invocation spy
pub struct FakeEngine {
    behavior: FakeBehavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenFile>>,
}

impl FakeEngine {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Engine that exits with `code`, printing `stdout` and `stderr`
    pub fn exits(code: i32, stdout: &str, stderr: &str) -> Self {
        Self::new(FakeBehavior::Output(EngineOutput {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }))
    }

    pub fn timing_out(limit: Duration) -> Self {
        Self::new(FakeBehavior::Timeout(limit))
    }

    /// Sleep before reading the staged file (widens race windows)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenFile> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisEngine for FakeEngine {
    fn name(&self) -> String {
        "fake-engine".to_string()
    }

    async fn run(&self, staged_path: &Path) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        // The staged file must be complete before the engine starts
        let contents = tokio::fs::read(staged_path)
            .await
            .expect("staged file must exist when the engine runs");
        self.seen.lock().unwrap().push(SeenFile {
            path: staged_path.to_path_buf(),
            contents,
        });

        match &self.behavior {
            FakeBehavior::Output(output) => Ok(output.clone()),
            FakeBehavior::Timeout(limit) => Err(EngineError::Timeout(*limit)),
        }
    }
}

/// Build a router over `engine` staging into `root`
pub fn test_app(engine: Arc<dyn AnalysisEngine>, root: &Path, retention: RetentionPolicy) -> Router {
    test_app_with_http(engine, root, retention, HttpOptions::default())
}

pub fn test_app_with_http(
    engine: Arc<dyn AnalysisEngine>,
    root: &Path,
    retention: RetentionPolicy,
    http: HttpOptions,
) -> Router {
    let staging = StagingArea::new(root, retention);
    let state = AppState::new(AnalysisPipeline::new(staging, engine)).with_http_options(http);
    build_router(state)
}

/// One multipart form part
pub enum Part<'a> {
    File {
        field: &'a str,
        file_name: &'a str,
        content: &'a [u8],
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

/// Encode parts as a `multipart/form-data` body using [`BOUNDARY`]
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                field,
                file_name,
                content,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        field, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(content);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        field, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// `POST /analyze/` carrying `parts`
pub fn analyze_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze/")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

/// `POST /analyze/` with a single `file` field
pub fn upload_request(file_name: &str, content: &[u8]) -> Request<Body> {
    analyze_request(&[Part::File {
        field: "file",
        file_name,
        content,
    }])
}

/// Status and decoded JSON body
pub async fn response_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body)
        .unwrap_or_else(|e| panic!("response body is not JSON ({}): {:?}", e, body));
    (status, json)
}

/// Every regular file below `root`
pub fn staged_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(staged_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}
