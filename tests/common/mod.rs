#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::{Value, json};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use zip::ZipWriter;
use zip::write::FileOptions;

use diagram_crop::detectors::{CloudParser, CloudParserConfig};

pub async fn serve(router: impl FnOnce(String) -> Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = router(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

pub fn png(image: DynamicImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

/// A light page with one dark horizontal stroke across the middle.
pub fn page_png(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = RgbImage::from_pixel(width, height, Rgb([248, 246, 240]));
    let y = height / 2;
    for x in width / 4..width * 3 / 4 {
        buffer.put_pixel(x, y, Rgb([15, 15, 15]));
    }
    png(DynamicImage::ImageRgb8(buffer))
}

/// A transparent figure with one opaque grey dot at (1, 1).
pub fn figure_png() -> Vec<u8> {
    let mut buffer = RgbaImage::from_pixel(6, 4, Rgba([0, 0, 0, 0]));
    buffer.put_pixel(1, 1, Rgba([90, 90, 90, 255]));
    png(DynamicImage::ImageRgba8(buffer))
}

pub fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    DoneAfter(usize),
    FailAfter(usize),
    Never,
}

pub struct MockParser {
    pub base: String,
    pub slot_code: i64,
    pub upload_status: StatusCode,
    pub upload_delay: Duration,
    pub outcome: Outcome,
    pub archive: Vec<u8>,
    pub polls: AtomicUsize,
    pub slot_requests: Mutex<Vec<(Option<String>, Value)>>,
    pub uploaded: Mutex<Option<Vec<u8>>>,
}

pub struct MockParserBuilder {
    slot_code: i64,
    upload_status: StatusCode,
    upload_delay: Duration,
    outcome: Outcome,
    archive: Vec<u8>,
}

impl MockParserBuilder {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            slot_code: 0,
            upload_status: StatusCode::OK,
            upload_delay: Duration::ZERO,
            outcome,
            archive: zip_with(&[("images/figure.png", figure_png().as_slice())]),
        }
    }

    pub fn slot_code(mut self, code: i64) -> Self {
        self.slot_code = code;
        self
    }

    pub fn upload_status(mut self, status: StatusCode) -> Self {
        self.upload_status = status;
        self
    }

    pub fn upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn archive(mut self, archive: Vec<u8>) -> Self {
        self.archive = archive;
        self
    }

    pub async fn start(self) -> Arc<MockParser> {
        let slot = Arc::new(Mutex::new(None::<Arc<MockParser>>));
        let handle = slot.clone();
        serve(move |base| {
            let state = Arc::new(MockParser {
                base,
                slot_code: self.slot_code,
                upload_status: self.upload_status,
                upload_delay: self.upload_delay,
                outcome: self.outcome,
                archive: self.archive,
                polls: AtomicUsize::new(0),
                slot_requests: Mutex::new(Vec::new()),
                uploaded: Mutex::new(None),
            });
            *handle.lock().unwrap() = Some(state.clone());
            Router::new()
                .route("/api/v4/file-urls/batch", post(request_slot))
                .route("/upload/:name", put(receive_upload))
                .route("/api/v4/extract-results/batch/:batch_id", get(job_status))
                .route("/results/full.zip", get(download_archive))
                .with_state(state)
        })
        .await;
        slot.lock().unwrap().take().unwrap()
    }
}

impl MockParser {
    pub fn config(&self, poll_interval: Duration, poll_budget: Duration) -> CloudParserConfig {
        CloudParserConfig {
            base_url: self.base.clone(),
            key: "mk-test".to_string(),
            model_version: "vlm".to_string(),
            poll_interval,
            poll_budget,
            request_timeout: Duration::from_secs(2),
        }
    }

    pub fn parser(&self, poll_interval: Duration, poll_budget: Duration) -> CloudParser {
        CloudParser::new(
            reqwest::Client::new(),
            self.config(poll_interval, poll_budget),
        )
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

async fn request_slot(
    State(state): State<Arc<MockParser>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    state.slot_requests.lock().unwrap().push((auth, body));
    if state.slot_code != 0 {
        return Json(json!({"code": state.slot_code, "msg": "invalid token", "data": null}));
    }
    Json(json!({
        "code": 0,
        "msg": "ok",
        "data": {
            "batch_id": "batch-42",
            "file_urls": [format!("{}/upload/page.png", state.base)]
        }
    }))
}

async fn receive_upload(State(state): State<Arc<MockParser>>, body: Bytes) -> StatusCode {
    *state.uploaded.lock().unwrap() = Some(body.to_vec());
    tokio::time::sleep(state.upload_delay).await;
    state.upload_status
}

async fn job_status(
    State(state): State<Arc<MockParser>>,
    Path(batch_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let poll = state.polls.fetch_add(1, Ordering::SeqCst) + 1;
    if batch_id != "batch-42" {
        return (StatusCode::NOT_FOUND, Json(json!({"code": 404})));
    }
    // The first poll always hits a transient server error.
    if poll == 1 {
        return (StatusCode::BAD_GATEWAY, Json(json!({"code": 502})));
    }
    let result = match state.outcome {
        Outcome::DoneAfter(n) if poll >= n => json!({
            "state": "done",
            "full_zip_url": format!("{}/results/full.zip", state.base)
        }),
        Outcome::FailAfter(n) if poll >= n => json!({"state": "failed", "err_msg": "bad page"}),
        _ => json!({"state": "running"}),
    };
    (
        StatusCode::OK,
        Json(json!({"code": 0, "data": {"extract_result": [result]}})),
    )
}

async fn download_archive(State(state): State<Arc<MockParser>>) -> Vec<u8> {
    state.archive.clone()
}

/// Chat-completions stand-in. Grounding and fallback requests are told apart
/// by their token limit.
pub struct MockVision {
    pub status: StatusCode,
    pub grounding_reply: String,
    pub fallback_reply: String,
    pub requests: Mutex<Vec<(Option<String>, Value)>>,
}

impl MockVision {
    pub async fn start(
        status: StatusCode,
        grounding_reply: &str,
        fallback_reply: &str,
    ) -> (Arc<MockVision>, String) {
        let state = Arc::new(MockVision {
            status,
            grounding_reply: grounding_reply.to_string(),
            fallback_reply: fallback_reply.to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let app_state = state.clone();
        let base = serve(move |_| {
            Router::new()
                .route("/v1/chat/completions", post(chat_completion))
                .with_state(app_state)
        })
        .await;
        (state, format!("{}/v1/chat/completions", base))
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

async fn chat_completion(
    State(state): State<Arc<MockVision>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let max_tokens = body["max_tokens"].as_u64();
    state.requests.lock().unwrap().push((auth, body));

    if !state.status.is_success() {
        return (
            state.status,
            Json(json!({"code": 20015, "message": "model not found", "data": null})),
        );
    }
    let reply = if max_tokens == Some(150) {
        &state.grounding_reply
    } else {
        &state.fallback_reply
    };
    (
        StatusCode::OK,
        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": reply}}]
        })),
    )
}
