//! Output sinks for fetched image artifacts.
//!
//! Downloads and clipboard writes go through small traits so command
//! handlers stay testable without touching the real filesystem or
//! terminal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

/// Persists downloaded bytes and reports where they landed.
#[async_trait]
pub trait DownloadSink {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf>;
}

/// Writes downloads into a fixed directory, creating it on first use.
pub struct DirDownloadSink {
    dir: PathBuf,
}

impl DirDownloadSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DownloadSink for DirDownloadSink {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        // Strip any path components so a hostile server-supplied name
        // cannot escape the download directory.
        let safe_name = Path::new(file_name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let path = self.dir.join(safe_name);
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "saved download");
        Ok(path)
    }
}

/// Puts text on the user's clipboard.
pub trait ClipboardSink {
    fn copy(&self, text: &str) -> std::io::Result<()>;
}

/// Clipboard via the OSC 52 terminal escape. Works over SSH and in most
/// modern terminal emulators; terminals without support ignore the
/// sequence, so the text is also echoed as a fallback.
pub struct TerminalClipboard;

impl ClipboardSink for TerminalClipboard {
    fn copy(&self, text: &str) -> std::io::Result<()> {
        use std::io::Write;
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "\x1b]52;c;{}\x07", BASE64.encode(text))?;
        writeln!(stdout, "{text}")?;
        stdout.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dir_sink_creates_directory_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirDownloadSink::new(dir.path().join("nested").join("downloads"));

        let path = sink.save("scan.jpg", b"jpeg-bytes").await.unwrap();
        assert!(path.ends_with("scan.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_dir_sink_strips_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirDownloadSink::new(dir.path());

        let path = sink.save("../../etc/passwd", b"x").await.unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
        assert!(path.ends_with("passwd"));
    }
}
