use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::io::{Cursor, Read};
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::{Detection, DetectionFuture, Detector, Layer};
use crate::enhance::flatten_and_normalize;
use crate::settings::CloudParserSettings;
use crate::source::SourceImage;

const IMAGE_DIR_MARKER: &str = "images/";
const IMAGE_EXTENSIONS: [&str; 3] = [".png", ".jpg", ".jpeg"];

#[derive(Debug, Clone)]
pub struct CloudParserConfig {
    pub base_url: String,
    pub key: String,
    pub model_version: String,
    pub poll_interval: Duration,
    pub poll_budget: Duration,
    /// Upper bound for each upload-slot, upload and archive request.
    pub request_timeout: Duration,
}

impl CloudParserConfig {
    /// `None` unless the parser is enabled and a key is present.
    pub fn from_settings(settings: &CloudParserSettings) -> Option<Self> {
        if !settings.is_configured() {
            return None;
        }
        Some(Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            key: settings.key.clone()?,
            model_version: settings.model_version.clone(),
            poll_interval: settings.poll_interval,
            poll_budget: settings.poll_budget,
            request_timeout: settings.request_timeout,
        })
    }
}

/// Lifecycle of one cloud parse job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted { batch_id: String, upload_url: String },
    Polling { batch_id: String },
    Done { zip_url: String },
    Failed(String),
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done { .. } | JobState::Failed(_) | JobState::TimedOut
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PollStatus {
    Pending,
    Done(String),
    Failed(String),
}

/// Submits the whole page to the cloud document parser and pulls the first
/// embedded figure out of the result archive.
#[derive(Debug, Clone)]
pub struct CloudParser {
    http: reqwest::Client,
    config: CloudParserConfig,
}

impl CloudParser {
    pub fn new(http: reqwest::Client, config: CloudParserConfig) -> Self {
        Self { http, config }
    }

    pub fn from_settings(settings: &CloudParserSettings) -> Option<Self> {
        CloudParserConfig::from_settings(settings)
            .map(|config| Self::new(reqwest::Client::new(), config))
    }

    /// Drives the job until it reaches a terminal state.
    pub async fn run_job(&self, source: &SourceImage) -> JobState {
        let mut state = self.submit(source.file_name()).await;
        loop {
            debug!("cloud parser job state: {:?}", state);
            if state.is_terminal() {
                return state;
            }
            state = match state {
                JobState::Submitted {
                    batch_id,
                    upload_url,
                } => match self
                    .bounded("image upload", self.upload(&upload_url, source.bytes()))
                    .await
                {
                    Ok(()) => JobState::Polling { batch_id },
                    Err(err) => JobState::Failed(format!("{:#}", err)),
                },
                JobState::Polling { batch_id } => self.poll_until_complete(&batch_id).await,
                terminal => terminal,
            };
        }
    }

    async fn submit(&self, file_name: &str) -> JobState {
        let slot = self.bounded("upload slot request", self.request_upload_slot(file_name));
        match slot.await {
            Ok((batch_id, upload_url)) => {
                info!("cloud parser batch id: {}", batch_id);
                JobState::Submitted {
                    batch_id,
                    upload_url,
                }
            }
            Err(err) => JobState::Failed(format!("{:#}", err)),
        }
    }

    async fn request_upload_slot(&self, file_name: &str) -> Result<(String, String)> {
        let url = format!("{}/api/v4/file-urls/batch", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.key)
            .json(&upload_slot_body(file_name, &self.config.model_version))
            .send()
            .await
            .with_context(|| "upload slot request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("upload slot request returned {}", status));
        }
        let text = response
            .text()
            .await
            .with_context(|| "failed to read upload slot response body")?;
        parse_upload_slot(&text)
    }

    async fn upload(&self, upload_url: &str, bytes: &[u8]) -> Result<()> {
        let response = self
            .http
            .put(upload_url)
            .body(bytes.to_vec())
            .send()
            .await
            .with_context(|| "image upload failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("image upload returned {}", status));
        }
        Ok(())
    }

    async fn poll_until_complete(&self, batch_id: &str) -> JobState {
        let deadline = Instant::now() + self.config.poll_budget;
        let mut attempt = 0usize;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return JobState::TimedOut;
            }
            sleep(self.config.poll_interval.min(remaining)).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return JobState::TimedOut;
            }
            attempt += 1;
            match timeout(remaining, self.poll_once(batch_id)).await {
                Ok(Ok(PollStatus::Done(zip_url))) => return JobState::Done { zip_url },
                Ok(Ok(PollStatus::Failed(message))) => return JobState::Failed(message),
                Ok(Ok(PollStatus::Pending)) => {
                    debug!("cloud parser still pending (poll {})", attempt);
                }
                Ok(Err(err)) => {
                    debug!("cloud parser poll {} ignored: {:#}", attempt, err);
                }
                Err(_) => return JobState::TimedOut,
            }
        }
    }

    async fn poll_once(&self, batch_id: &str) -> Result<PollStatus> {
        let url = format!(
            "{}/api/v4/extract-results/batch/{}",
            self.config.base_url, batch_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.key)
            .send()
            .await
            .with_context(|| "status request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("status request returned {}", status));
        }
        let text = response
            .text()
            .await
            .with_context(|| "failed to read status response body")?;
        parse_poll_status(&text)
    }

    async fn bounded<T>(
        &self,
        what: &str,
        request: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.config.request_timeout;
        match timeout(limit, request).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "{} timed out after {:.1}s",
                what,
                limit.as_secs_f32()
            )),
        }
    }

    async fn fetch_archive(&self, zip_url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(zip_url)
            .send()
            .await
            .with_context(|| "archive download failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("archive download returned {}", status));
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| "failed to read archive body")?;
        Ok(bytes.to_vec())
    }
}

impl Detector for CloudParser {
    fn layer(&self) -> Layer {
        Layer::CloudParser
    }

    fn detect<'a>(&'a self, source: &'a SourceImage) -> DetectionFuture<'a> {
        Box::pin(async move {
            let zip_url = match self.run_job(source).await {
                JobState::Done { zip_url } => zip_url,
                JobState::Failed(message) => {
                    info!("cloud parser job failed: {}", message);
                    return Ok(Detection::NotFound);
                }
                JobState::TimedOut => {
                    warn!(
                        "cloud parser gave up after {:.1}s of polling",
                        self.config.poll_budget.as_secs_f32()
                    );
                    return Ok(Detection::NotFound);
                }
                other => {
                    warn!("cloud parser stopped in non-terminal state {:?}", other);
                    return Ok(Detection::NotFound);
                }
            };

            let archive = self
                .bounded("archive download", self.fetch_archive(&zip_url))
                .await?;
            let Some(image) = first_archive_image(&archive)? else {
                info!("cloud parser archive contains no figure images");
                return Ok(Detection::NotFound);
            };
            let png = flatten_and_normalize(&image)?;
            Ok(Detection::Prebuilt { png })
        })
    }
}

pub(crate) fn upload_slot_body(file_name: &str, model_version: &str) -> serde_json::Value {
    json!({
        "files": [{"name": file_name}],
        "model_version": model_version,
        "enable_formula": true,
        "enable_table": true
    })
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T> {
        if self.code != 0 {
            return Err(anyhow!(
                "cloud parser returned code {}: {}",
                self.code,
                self.msg.unwrap_or_default()
            ));
        }
        self.data
            .ok_or_else(|| anyhow!("cloud parser response has no data"))
    }
}

#[derive(Debug, Deserialize)]
struct UploadSlot {
    batch_id: String,
    #[serde(default)]
    file_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(default)]
    extract_result: Vec<ExtractResult>,
}

#[derive(Debug, Deserialize)]
struct ExtractResult {
    #[serde(default)]
    state: String,
    full_zip_url: Option<String>,
    err_msg: Option<String>,
}

fn parse_upload_slot(text: &str) -> Result<(String, String)> {
    let envelope: Envelope<UploadSlot> =
        serde_json::from_str(text).with_context(|| "failed to parse upload slot response")?;
    let slot = envelope.into_data()?;
    let upload_url = slot
        .file_urls
        .into_iter()
        .next()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| anyhow!("upload slot response has no upload URL"))?;
    if slot.batch_id.trim().is_empty() {
        return Err(anyhow!("upload slot response has an empty batch id"));
    }
    Ok((slot.batch_id, upload_url))
}

fn parse_poll_status(text: &str) -> Result<PollStatus> {
    let envelope: Envelope<BatchResult> =
        serde_json::from_str(text).with_context(|| "failed to parse status response")?;
    let data = envelope.into_data()?;
    let Some(result) = data.extract_result.into_iter().next() else {
        return Ok(PollStatus::Pending);
    };
    Ok(match result.state.as_str() {
        "done" => match result.full_zip_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => PollStatus::Done(url),
            None => PollStatus::Failed("job finished without an archive URL".to_string()),
        },
        "failed" => PollStatus::Failed(
            result
                .err_msg
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        _ => PollStatus::Pending,
    })
}

/// Returns the first archive entry under an `images/` path with a known
/// image extension.
pub fn first_archive_image(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).with_context(|| "failed to read zip archive")?;
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| "failed to read zip entry")?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_lowercase();
        if !is_figure_entry(&name) {
            continue;
        }
        debug!("cloud parser archive figure: {}", file.name());
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| "failed to read zip entry content")?;
        return Ok(Some(data));
    }
    Ok(None)
}

fn is_figure_entry(lower_name: &str) -> bool {
    lower_name.contains(IMAGE_DIR_MARKER)
        && IMAGE_EXTENSIONS
            .iter()
            .any(|ext| lower_name.ends_with(ext))
}
