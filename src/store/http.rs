//! Client for the recordings HTTP service
//!
//! Endpoints:
//! - `GET /api/recordings`: list
//! - `POST /api/recordings`: multipart upload (`audio` plus metadata fields)
//! - `GET /api/recordings/:id`: record
//! - `DELETE /api/recordings/:id`
//!
//! Payloads are fetched from the record's `url`, relative to the base URL.

use std::env;
use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::{multipart, Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{check_upload, StoredRecording, TrackStore, UploadMetadata};
use crate::engine::format::classify;
use crate::error::{OverdubError, Result};

const DEFAULT_URL: &str = "http://localhost:3001";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    recording: Option<StoredRecording>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Recordings service client
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    client: Client,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| OverdubError::Storage {
                reason: e.to_string(),
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Configure from `OVERDUB_STORE_URL` and `OVERDUB_STORE_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("OVERDUB_STORE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let timeout_ms = env::var("OVERDUB_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Self::new(base_url, timeout_ms)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<Response> {
        request.send().map_err(|e| OverdubError::Storage {
            reason: if e.is_timeout() {
                format!("request to {} timed out", self.base_url)
            } else if e.is_connect() {
                format!("cannot connect to {}: {}", self.base_url, e)
            } else {
                e.to_string()
            },
        })
    }

    /// Map non-success statuses onto store errors
    fn check(&self, response: Response, id: Option<&str>) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let reason = response
            .json::<ErrorBody>()
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| status.to_string());

        Err(match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => OverdubError::TrackNotFound { id: id.to_string() },
            (StatusCode::BAD_REQUEST, _) | (StatusCode::PAYLOAD_TOO_LARGE, _) => {
                OverdubError::UploadRejected { reason }
            }
            _ => OverdubError::Storage { reason },
        })
    }

    fn invalid_body(e: reqwest::Error) -> OverdubError {
        OverdubError::Storage {
            reason: format!("Invalid response from store: {}", e),
        }
    }
}

impl TrackStore for HttpStore {
    fn upload(&self, payload: &[u8], metadata: UploadMetadata) -> Result<StoredRecording> {
        check_upload(payload)?;
        let metadata = metadata.normalised();
        let format = classify(payload).container();

        let audio = multipart::Part::bytes(payload.to_vec())
            .file_name(format!("recording.{}", format.extension()))
            .mime_str(format.mime_type())
            .map_err(|e| OverdubError::Storage {
                reason: e.to_string(),
            })?;
        let form = multipart::Form::new()
            .part("audio", audio)
            .text("title", metadata.title)
            .text("description", metadata.description)
            .text("author", metadata.author)
            .text("bpm", metadata.bpm.to_string());

        debug!("[STORE] Uploading {} bytes to {}", payload.len(), self.base_url);
        let response = self.send(
            self.client
                .post(self.endpoint("/api/recordings"))
                .multipart(form),
        )?;
        let body: UploadResponse = self
            .check(response, None)?
            .json()
            .map_err(Self::invalid_body)?;

        match body.recording {
            Some(record) if body.success => {
                info!("[STORE] Uploaded {} -> {}", record.id, record.url);
                Ok(record)
            }
            _ => Err(OverdubError::UploadRejected {
                reason: body
                    .error
                    .unwrap_or_else(|| "store did not return a recording".to_string()),
            }),
        }
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let record = self.get(id)?;
        let response = self.send(self.client.get(self.endpoint(&record.url)))?;
        let bytes = self
            .check(response, Some(id))?
            .bytes()
            .map_err(Self::invalid_body)?;
        Ok(bytes.to_vec())
    }

    fn get(&self, id: &str) -> Result<StoredRecording> {
        let url = self.endpoint(&format!("/api/recordings/{}", id));
        let response = self.send(self.client.get(url))?;
        self.check(response, Some(id))?
            .json()
            .map_err(Self::invalid_body)
    }

    fn list(&self) -> Result<Vec<StoredRecording>> {
        let response = self.send(self.client.get(self.endpoint("/api/recordings")))?;
        self.check(response, None)?
            .json()
            .map_err(Self::invalid_body)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("/api/recordings/{}", id));
        let response = self.send(self.client.delete(url))?;
        self.check(response, Some(id))?;
        info!("[STORE] Deleted {}", id);
        Ok(())
    }
}
