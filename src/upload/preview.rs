//! Data-URL preview generation.
//!
//! Previews are cosmetic: generation is fire-and-forget relative to
//! staging, performs its own independent read per file, and a failed
//! read simply leaves the preview slot empty. Nothing here may block or
//! fail an upload.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode bytes as a renderable `data:` URL.
pub fn data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{content_type};base64,{}", STANDARD.encode(bytes))
}

/// Read a staged file and produce its preview. `None` on any read
/// failure; there is no retry.
pub async fn generate(path: &Path, content_type: &str) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    Some(data_url(content_type, &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_shape() {
        let url = data_url("image/png", b"abc");
        assert_eq!(url, "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn test_generate_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        tokio::fs::write(&path, b"pixels").await.unwrap();

        let url = generate(&path, "image/png").await.unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_generate_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let url = generate(&dir.path().join("absent.jpg"), "image/jpeg").await;
        assert!(url.is_none());
    }
}
