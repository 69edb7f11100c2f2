//! Wire models for the PPE detection backend.
//!
//! Field names follow the backend's camelCase JSON; the structs keep
//! Rust naming and map with serde renames. Anything the server may omit
//! is defaulted so a sparse record never fails to decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One labeled bounding-box prediction attached to an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Detected PPE class (e.g. "helmet", "vest"). May be empty for
    /// predictions the model could not classify.
    #[serde(default)]
    pub label: String,
    /// Model confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Normalized bounding box, all coordinates in [0, 1].
    #[serde(rename = "boundingBox", default)]
    pub bounding_box: BoundingBox,
}

/// Normalized bounding box for a detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A stored image with its analysis results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    /// Filename as uploaded by the user.
    #[serde(rename = "originalName", default)]
    pub original_name: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Byte size of the original file.
    #[serde(default)]
    pub size: u64,
    /// Whether detection has finished for this image.
    #[serde(default)]
    pub processed: bool,
    /// Detections for this image. Malformed or absent lists decode as
    /// empty rather than failing the whole record.
    #[serde(default, deserialize_with = "lenient_detections")]
    pub detections: Vec<Detection>,
    /// Stable hash over the detection set, used for change tracking.
    #[serde(rename = "detectionsHash", default)]
    pub detections_hash: Option<String>,
    /// Direct URL of the original image, if the server exposes one.
    #[serde(rename = "originalImageUrl", default)]
    pub original_image_url: Option<String>,
    /// URL of the annotated (boxes drawn) image, if available.
    #[serde(rename = "annotatedImageUrl", default)]
    pub annotated_image_url: Option<String>,
}

impl ImageRecord {
    /// Preferred display URL: annotated if present, else the original.
    /// Callers fall back to the API file endpoint when both are absent.
    pub fn display_url(&self) -> Option<&str> {
        self.annotated_image_url
            .as_deref()
            .or(self.original_image_url.as_deref())
    }
}

/// Accept anything in the `detections` slot. Non-arrays and elements
/// that do not decode are dropped instead of erroring the record.
fn lenient_detections<'de, D>(deserializer: D) -> Result<Vec<Detection>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// One page of the image collection, with the server's pagination
/// metadata. The History listing consumes the metadata directly; the
/// exhaustive fetch loop only looks at `items` and `next_offset`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePage {
    #[serde(default)]
    pub items: Vec<ImageRecord>,
    /// Offset of the next page, or `None` when this is the last page.
    #[serde(default)]
    pub next_offset: Option<u32>,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Response to a single-file upload.
#[derive(Debug, Clone, Deserialize)]
pub struct SingleUploadResponse {
    /// Server-assigned image id. Absence under a 2xx response is a
    /// contract violation surfaced to the user.
    #[serde(default)]
    pub id: Option<String>,
    /// Set when the idempotency key matched an earlier upload and the
    /// server returned the existing record instead of reprocessing.
    #[serde(default)]
    pub existing: bool,
}

/// Per-item result inside a batch upload response, aligned positionally
/// with the request's file order.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItemResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl BatchItemResult {
    /// "success" and "duplicate" both count as success; a duplicate is
    /// the server collapsing an identical earlier upload.
    pub fn is_success(&self) -> bool {
        self.status == "success" || self.status == "duplicate"
    }
}

/// A server-side validation failure for one named file in a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchNamedError {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub error: String,
}

/// Response to a multi-file upload.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUploadResponse {
    #[serde(default)]
    pub results: Vec<BatchItemResult>,
    #[serde(default)]
    pub errors: Vec<BatchNamedError>,
}

/// Authenticated user as returned by the auth endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: String,
}

/// Response to login/register: a bearer token plus the user it belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

/// Response to `GET /auth/profile`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub user: UserProfile,
}

/// Response to `GET /labels`.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelsResponse {
    #[serde(default)]
    pub labels: Vec<String>,
}
