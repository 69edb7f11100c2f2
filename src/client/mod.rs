//! HTTP client for the PPE detection API.
//!
//! One reqwest client per process, bearer auth from the session context,
//! JSON endpoints plus multipart uploads with whole-request progress
//! reporting.

pub mod paging;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

use crate::config::{SessionContext, Settings};
use crate::models::{
    AuthResponse, BatchUploadResponse, ImagePage, ImageRecord, LabelsResponse, ProfileResponse,
    SingleUploadResponse, UserProfile,
};
use paging::{Page, PageSource, PageWindow};

const USER_AGENT: &str = "ppescan/0.3 (github.com/monokrome/ppescan)";

/// Streaming chunk size for upload bodies. Small enough that progress
/// moves visibly, large enough not to dominate per-chunk overhead.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Errors from API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure or client-side request failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server rejected the credentials (401).
    #[error("authentication required; run `ppe login`")]
    Unauthorized,
    /// Any other non-success status, with the server's message when the
    /// body carried one.
    #[error("server error (HTTP {status}): {message}")]
    Status { status: u16, message: String },
    /// The call succeeded but the payload was not what the contract
    /// promises.
    #[error("unexpected response: {0}")]
    Contract(String),
    /// The configured base URL is not a valid URL.
    #[error("invalid API base URL '{0}'")]
    BaseUrl(String),
}

/// Server error envelope: `{ "error": { "message": "..." } }`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// One file's worth of multipart payload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub file_name: String,
    pub content_type: String,
    pub payload: Arc<Vec<u8>>,
}

/// Whole-request upload progress: counts bytes handed to the transport
/// and publishes a percentage on a watch channel. The transport gives no
/// per-file granularity; one percentage covers the whole request.
#[derive(Clone)]
pub struct ProgressReporter {
    sent: Arc<AtomicU64>,
    total: u64,
    tx: watch::Sender<u8>,
}

impl ProgressReporter {
    /// Reporter for `total` payload bytes plus a receiver observers can
    /// watch.
    pub fn new(total: u64) -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0u8);
        (
            Self {
                sent: Arc::new(AtomicU64::new(0)),
                total,
                tx,
            },
            rx,
        )
    }

    /// Reporter publishing over an existing sender, so observers that
    /// subscribed before the request keep their receiver across commits.
    pub fn with_sender(total: u64, tx: watch::Sender<u8>) -> Self {
        let _ = tx.send(0);
        Self {
            sent: Arc::new(AtomicU64::new(0)),
            total,
            tx,
        }
    }

    fn add(&self, bytes: u64) {
        let sent = self.sent.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let _ = self.tx.send(self.to_percent(sent));
    }

    /// Current whole-request percentage.
    pub fn percent(&self) -> u8 {
        self.to_percent(self.sent.load(Ordering::Relaxed))
    }

    fn to_percent(&self, sent: u64) -> u8 {
        if self.total == 0 {
            100
        } else {
            (sent.saturating_mul(100) / self.total).min(100) as u8
        }
    }
}

/// Build a multipart part that reports bytes to `reporter` as the
/// transport pulls them.
fn progress_part(part: &UploadPart, reporter: ProgressReporter) -> Result<Part, ApiError> {
    let len = part.payload.len() as u64;
    let buf = Bytes::copy_from_slice(&part.payload);
    let chunks: Vec<Bytes> = (0..buf.len())
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| buf.slice(start..usize::min(start + UPLOAD_CHUNK_BYTES, buf.len())))
        .collect();
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        reporter.add(chunk.len() as u64);
        Ok::<Bytes, std::io::Error>(chunk)
    }));

    Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
        .file_name(part.file_name.clone())
        .mime_str(&part.content_type)
        .map_err(ApiError::Transport)
}

/// Client for the detection API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client from settings and the loaded session.
    pub fn new(settings: &Settings, session: &SessionContext) -> Result<Self, ApiError> {
        let base_url = Url::parse(&settings.api_base_url)
            .map_err(|_| ApiError::BaseUrl(settings.api_base_url.clone()))?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.request_timeout))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            http,
            base_url,
            token: session.token().map(str::to_string),
        })
    }

    /// Absolute URL for an API path relative to the base.
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Public URL of an image's stored file, usable as a display
    /// fallback when a record carries no direct URLs.
    pub fn image_file_url(&self, id: &str) -> String {
        self.endpoint(&format!("images/{id}/file"))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, self.endpoint(path));
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Map non-success statuses to errors, decoding the server's error
    /// envelope when present.
    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error)
            .and_then(|error| error.message)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    body.trim().to_string()
                }
            });
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    // --- Auth ---

    /// Log in and return the issued token with the user it belongs to.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let response = self
            .request(Method::POST, "auth/login")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    /// Register a new account.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ApiError> {
        let response = self
            .request(Method::POST, "auth/register")
            .json(&serde_json::json!({ "name": name, "email": email, "password": password }))
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    /// Fetch the profile behind the current token.
    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        let response = self.request(Method::GET, "auth/profile").send().await?;
        let profile: ProfileResponse = Self::ensure_success(response).await?.json().await?;
        Ok(profile.user)
    }

    // --- Uploads ---

    /// Upload one file as a single-resource create. The idempotency key
    /// makes a user-initiated retry of the same request safe.
    pub async fn upload_single(
        &self,
        part: &UploadPart,
        idempotency_key: &str,
        reporter: &ProgressReporter,
    ) -> Result<SingleUploadResponse, ApiError> {
        let form = Form::new().part("image", progress_part(part, reporter.clone())?);
        let response = self
            .request(Method::POST, "images")
            .header("Idempotency-Key", idempotency_key)
            .multipart(form)
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    /// Upload several files as one batch create. Batches carry no
    /// idempotency key; the server dedups batch items itself.
    pub async fn upload_batch(
        &self,
        parts: &[UploadPart],
        reporter: &ProgressReporter,
    ) -> Result<BatchUploadResponse, ApiError> {
        let mut form = Form::new();
        for part in parts {
            form = form.part("images", progress_part(part, reporter.clone())?);
        }
        let response = self
            .request(Method::POST, "images")
            .multipart(form)
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    // --- Images ---

    /// Fetch one page of the image collection.
    pub async fn list_images(&self, window: &PageWindow) -> Result<ImagePage, ApiError> {
        let response = self
            .request(Method::GET, "images")
            .query(&list_query(window))
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    /// Fetch one image with its detections.
    pub async fn get_image(&self, id: &str) -> Result<ImageRecord, ApiError> {
        let response = self
            .request(Method::GET, &format!("images/{id}"))
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    /// Delete an image.
    pub async fn delete_image(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::DELETE, &format!("images/{id}"))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Download the stored image file.
    pub async fn get_image_file(&self, id: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .request(Method::GET, &format!("images/{id}/file"))
            .send()
            .await?;
        let bytes = Self::ensure_success(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// List the labels the detection model can produce.
    pub async fn get_labels(&self) -> Result<Vec<String>, ApiError> {
        let response = self.request(Method::GET, "labels").send().await?;
        let labels: LabelsResponse = Self::ensure_success(response).await?.json().await?;
        Ok(labels.labels)
    }
}

/// Query parameters for a listing window. Instants go out as RFC 3339.
fn list_query(window: &PageWindow) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("limit", window.limit.to_string()),
        ("offset", window.offset.to_string()),
    ];
    if let Some(ref label) = window.filter.label {
        if !label.is_empty() {
            query.push(("label", label.clone()));
        }
    }
    if let Some(from) = window.filter.from {
        query.push(("from", from.to_rfc3339()));
    }
    if let Some(to) = window.filter.to {
        query.push(("to", to.to_rfc3339()));
    }
    query
}

#[async_trait]
impl PageSource for ApiClient {
    type Item = ImageRecord;

    async fn fetch_page(&self, window: &PageWindow) -> Result<Page<ImageRecord>, ApiError> {
        let page = self.list_images(window).await?;
        Ok(Page {
            items: page.items,
            next_offset: page.next_offset,
        })
    }
}
