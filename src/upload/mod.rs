//! Upload staging and orchestration.
//!
//! An [`UploadSession`] owns the staged-file list for one upload flow:
//! files are validated and staged, previews fill in asynchronously, and
//! a single commit covers everything staged. The session reconciles the
//! backend's two response shapes (single vs batch) into one per-file
//! outcome model.

pub mod idempotency;
pub mod preview;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::client::{ApiClient, ApiError, ProgressReporter, UploadPart};
use crate::models::{BatchUploadResponse, SingleUploadResponse};
use validate::RejectReason;

/// Error message for a 2xx single-file response without an id.
pub const MISSING_RESULT_ID: &str = "upload succeeded but no result id was returned";
/// Error message for a batch item covered by neither result list.
pub const NO_RESULT_FOR_FILE: &str = "server returned no result for this file";

/// A user-selected file, described but not yet staged.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub name: String,
    /// Declared media type, derived from the filename. No content
    /// sniffing happens client-side.
    pub content_type: String,
    pub size: u64,
    /// Last-modified time in milliseconds since the Unix epoch.
    pub modified_ms: i64,
}

impl CandidateFile {
    /// Describe a file on disk.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            content_type,
            size: metadata.len(),
            modified_ms,
        })
    }

    /// Identity key from name, size and mtime. Two distinct files that
    /// agree on all three collide by design; content is never hashed
    /// client-side.
    pub fn identity_key(&self) -> String {
        format!("{}-{}-{}", self.name, self.size, self.modified_ms)
    }
}

/// Upload status of a staged file. Transitions are monotonic:
/// Pending → Uploading → Completed | Error, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
}

/// One staged file together with its (eventual) outcome.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Identity key, unique within the staged set.
    pub key: String,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub modified_ms: i64,
    payload: Arc<Vec<u8>>,
    /// Data-URL preview, filled asynchronously after staging. Stays
    /// empty forever if the preview read failed.
    pub preview: Option<String>,
    pub status: UploadStatus,
    /// Settled percentage for this file. While a commit is in flight
    /// the live value is the session's single whole-request percentage,
    /// observable via [`UploadSession::progress`].
    pub progress: u8,
    /// Server-assigned id on success.
    pub result_id: Option<String>,
    /// Whether the server collapsed this upload onto an existing record.
    pub replayed: bool,
    pub error: Option<String>,
}

impl StagedFile {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn to_part(&self) -> UploadPart {
        UploadPart {
            file_name: self.name.clone(),
            content_type: self.content_type.clone(),
            payload: Arc::clone(&self.payload),
        }
    }
}

/// Where an upload session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Files being added, removed and previewed.
    Staging,
    /// One network call in flight covering all staged files.
    Uploading,
    /// Every staged file has a terminal outcome. Further edits return
    /// the session to Staging.
    Settled,
}

/// A file rejected during staging, with the user-facing reason.
#[derive(Debug, Clone)]
pub struct FileRejection {
    pub name: String,
    pub reason: RejectReason,
}

fn rejection_summary(rejections: &[FileRejection]) -> String {
    rejections
        .iter()
        .map(|rejection| format!("{}: {}", rejection.name, rejection.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors from staging files.
#[derive(Debug, Error)]
pub enum StageError {
    /// At least one candidate failed validation. The whole add-batch is
    /// rejected and nothing is staged; all reasons are reported jointly.
    #[error("{}", rejection_summary(.0))]
    Rejected(Vec<FileRejection>),
    /// A validated candidate could not be read from disk.
    #[error("failed to read {name}: {source}")]
    Unreadable {
        name: String,
        source: std::io::Error,
    },
    /// Staging is not allowed while a commit is in flight.
    #[error("an upload is already in progress")]
    UploadInProgress,
}

/// Errors from commit preconditions.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("please select at least one file to upload")]
    NothingStaged,
    #[error("an upload is already in progress")]
    AlreadyUploading,
}

/// Outcome of one commit, summarized over all staged files. Transport
/// and contract failures are reported here rather than propagated; the
/// per-file detail lives on the staged files themselves.
#[derive(Debug, Clone)]
pub struct CommitSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Id of the created resource, for single-file commits.
    pub single_result_id: Option<String>,
    /// Whether a single-file commit was an idempotent replay.
    pub replayed: bool,
    /// Message when the transport call itself failed. Every staged file
    /// is then errored with this same message, since the client cannot
    /// know what the server persisted.
    pub transport_error: Option<String>,
}

/// Owns the staged-file list and drives uploads for one session.
pub struct UploadSession {
    files: Vec<StagedFile>,
    phase: SessionPhase,
    preview_tx: mpsc::UnboundedSender<(String, String)>,
    preview_rx: mpsc::UnboundedReceiver<(String, String)>,
    progress_tx: watch::Sender<u8>,
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadSession {
    pub fn new() -> Self {
        let (preview_tx, preview_rx) = mpsc::unbounded_channel();
        let (progress_tx, _) = watch::channel(0u8);
        Self {
            files: Vec::new(),
            phase: SessionPhase::Staging,
            preview_tx,
            preview_rx,
            progress_tx,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Read view of the staged files.
    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Subscribe to the whole-request upload percentage. One value is
    /// broadcast for the entire commit; every staged row shares it.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress_tx.subscribe()
    }

    /// Stage a batch of candidates.
    ///
    /// All candidates are validated first; if any fails, the whole
    /// add-batch is rejected with every reason surfaced, so the user
    /// corrects explicitly instead of getting partial silent acceptance.
    /// Restaging an identity key already present replaces that entry
    /// and resets its outcome.
    pub async fn stage(&mut self, candidates: Vec<CandidateFile>) -> Result<(), StageError> {
        if self.phase == SessionPhase::Uploading {
            return Err(StageError::UploadInProgress);
        }

        let rejections: Vec<FileRejection> = candidates
            .iter()
            .filter_map(|candidate| {
                validate::validate(&candidate.content_type, candidate.size)
                    .err()
                    .map(|reason| FileRejection {
                        name: candidate.name.clone(),
                        reason,
                    })
            })
            .collect();
        if !rejections.is_empty() {
            return Err(StageError::Rejected(rejections));
        }

        // Read everything before mutating the staged set, so a read
        // failure also rejects the add-batch as a whole.
        let mut accepted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let bytes = tokio::fs::read(&candidate.path)
                .await
                .map_err(|source| StageError::Unreadable {
                    name: candidate.name.clone(),
                    source,
                })?;
            accepted.push((candidate, Arc::new(bytes)));
        }

        for (candidate, payload) in accepted {
            let key = candidate.identity_key();
            self.spawn_preview(&key, &candidate);
            let file = StagedFile {
                key: key.clone(),
                name: candidate.name,
                content_type: candidate.content_type,
                size: candidate.size,
                modified_ms: candidate.modified_ms,
                payload,
                preview: None,
                status: UploadStatus::Pending,
                progress: 0,
                result_id: None,
                replayed: false,
                error: None,
            };
            match self.files.iter().position(|staged| staged.key == key) {
                Some(index) => {
                    debug!(key, "restaging file, replacing existing entry");
                    self.files[index] = file;
                }
                None => self.files.push(file),
            }
        }

        self.phase = SessionPhase::Staging;
        Ok(())
    }

    fn spawn_preview(&self, key: &str, candidate: &CandidateFile) {
        let tx = self.preview_tx.clone();
        let key = key.to_string();
        let path = candidate.path.clone();
        let content_type = candidate.content_type.clone();
        tokio::spawn(async move {
            if let Some(url) = preview::generate(&path, &content_type).await {
                let _ = tx.send((key, url));
            }
        });
    }

    /// Fill preview slots for reads that have completed. Previews for
    /// keys no longer staged are dropped; an abandoned read has no side
    /// effect beyond this channel.
    pub fn absorb_previews(&mut self) {
        while let Ok((key, url)) = self.preview_rx.try_recv() {
            if let Some(file) = self.files.iter_mut().find(|staged| staged.key == key) {
                if file.preview.is_none() {
                    file.preview = Some(url);
                }
            }
        }
    }

    /// Remove one staged file with its outcome state. Returns whether
    /// anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|staged| staged.key != key);
        let removed = self.files.len() != before;
        if removed && self.phase == SessionPhase::Settled {
            self.phase = SessionPhase::Staging;
        }
        removed
    }

    /// Drop every staged file and reset outcome/progress state.
    pub fn clear(&mut self) {
        self.files.clear();
        self.phase = SessionPhase::Staging;
        let _ = self.progress_tx.send(0);
    }

    /// Upload everything staged in one request.
    ///
    /// Exactly one staged file is sent as a single-resource create with
    /// an idempotency key; more than one goes as a batch create without
    /// one. Transport failures settle every file as errored and are
    /// reported in the summary, not propagated.
    pub async fn commit(&mut self, client: &ApiClient) -> Result<CommitSummary, CommitError> {
        if self.files.is_empty() {
            return Err(CommitError::NothingStaged);
        }
        if self.phase == SessionPhase::Uploading {
            return Err(CommitError::AlreadyUploading);
        }

        self.phase = SessionPhase::Uploading;
        for file in &mut self.files {
            file.status = UploadStatus::Uploading;
            file.progress = 0;
            file.result_id = None;
            file.replayed = false;
            file.error = None;
        }

        let total: u64 = self.files.iter().map(|file| file.payload.len() as u64).sum();
        let reporter = ProgressReporter::with_sender(total, self.progress_tx.clone());

        let summary = if self.files.len() == 1 {
            let file = &self.files[0];
            let key = idempotency::derive_key(&file.name, file.size, file.modified_ms);
            match client.upload_single(&file.to_part(), &key, &reporter).await {
                Ok(response) => self.settle_single(response),
                Err(err) => self.settle_transport_failure(err),
            }
        } else {
            let parts: Vec<UploadPart> = self.files.iter().map(StagedFile::to_part).collect();
            match client.upload_batch(&parts, &reporter).await {
                Ok(response) => self.settle_batch(response),
                Err(err) => self.settle_transport_failure(err),
            }
        };

        self.phase = SessionPhase::Settled;
        Ok(summary)
    }

    /// Reconcile the single-file response shape.
    fn settle_single(&mut self, response: SingleUploadResponse) -> CommitSummary {
        let file = &mut self.files[0];
        match response.id {
            Some(id) => {
                // An `existing` marker with an id is an idempotent
                // replay: success, not an error.
                file.status = UploadStatus::Completed;
                file.progress = 100;
                file.result_id = Some(id.clone());
                file.replayed = response.existing;
                CommitSummary {
                    succeeded: 1,
                    failed: 0,
                    single_result_id: Some(id),
                    replayed: response.existing,
                    transport_error: None,
                }
            }
            None => {
                // The call succeeded but the contract was violated.
                // Distinct from transport failure; never retried.
                file.status = UploadStatus::Error;
                file.progress = 0;
                file.error = Some(MISSING_RESULT_ID.to_string());
                CommitSummary {
                    succeeded: 0,
                    failed: 1,
                    single_result_id: None,
                    replayed: false,
                    transport_error: None,
                }
            }
        }
    }

    /// Reconcile the batch response shape into one outcome per file.
    fn settle_batch(&mut self, response: BatchUploadResponse) -> CommitSummary {
        // Results align positionally with the request's file order.
        for (index, result) in response.results.iter().enumerate() {
            let Some(file) = self.files.get_mut(index) else {
                break;
            };
            if result.is_success() {
                file.status = UploadStatus::Completed;
                file.progress = 100;
                file.result_id = result.id.clone();
                file.replayed = result.status == "duplicate";
            } else {
                file.status = UploadStatus::Error;
                file.progress = 0;
                file.error = Some(format!("upload failed with status '{}'", result.status));
            }
        }

        // Named errors match by filename. This fallback carries the
        // cases where the server dropped or reordered entries.
        for named in &response.errors {
            if let Some(file) = self
                .files
                .iter_mut()
                .find(|staged| staged.name == named.filename)
            {
                file.status = UploadStatus::Error;
                file.progress = 0;
                file.result_id = None;
                file.replayed = false;
                file.error = Some(named.error.clone());
            }
        }

        // Anything still marked uploading was covered by neither list;
        // settle it as an error so every staged file has an outcome.
        for file in &mut self.files {
            if file.status == UploadStatus::Uploading {
                file.status = UploadStatus::Error;
                file.progress = 0;
                file.error = Some(NO_RESULT_FOR_FILE.to_string());
            }
        }

        let succeeded = self
            .files
            .iter()
            .filter(|file| file.status == UploadStatus::Completed)
            .count();
        CommitSummary {
            succeeded,
            failed: self.files.len() - succeeded,
            single_result_id: None,
            replayed: false,
            transport_error: None,
        }
    }

    /// The transport call itself failed: settle every staged file with
    /// the same error.
    fn settle_transport_failure(&mut self, err: ApiError) -> CommitSummary {
        let message = err.to_string();
        for file in &mut self.files {
            file.status = UploadStatus::Error;
            file.progress = 0;
            file.error = Some(message.clone());
        }
        CommitSummary {
            succeeded: 0,
            failed: self.files.len(),
            single_result_id: None,
            replayed: false,
            transport_error: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchItemResult, BatchNamedError};

    async fn candidate(
        dir: &tempfile::TempDir,
        name: &str,
        contents: &[u8],
    ) -> CandidateFile {
        let path = dir.path().join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        CandidateFile::from_path(&path).await.unwrap()
    }

    async fn staged_session(names: &[&str]) -> (tempfile::TempDir, UploadSession) {
        let dir = tempfile::tempdir().unwrap();
        let mut session = UploadSession::new();
        let mut candidates = Vec::new();
        for name in names {
            candidates.push(candidate(&dir, name, b"image-bytes").await);
        }
        session.stage(candidates).await.unwrap();
        for file in &mut session.files {
            file.status = UploadStatus::Uploading;
        }
        (dir, session)
    }

    #[tokio::test]
    async fn test_stage_rejects_whole_batch_jointly() {
        let dir = tempfile::tempdir().unwrap();
        let good = candidate(&dir, "ok.jpg", b"bytes").await;
        let mut bad = candidate(&dir, "notes.txt", b"bytes").await;
        assert_eq!(bad.content_type, "text/plain");
        let mut huge = candidate(&dir, "huge.png", b"bytes").await;
        huge.size = validate::MAX_FILE_BYTES + 1;
        bad.name = "notes.txt".into();

        let mut session = UploadSession::new();
        let err = session.stage(vec![good, bad, huge]).await.unwrap_err();
        match err {
            StageError::Rejected(rejections) => {
                assert_eq!(rejections.len(), 2);
                assert_eq!(rejections[0].name, "notes.txt");
                assert_eq!(rejections[1].reason, RejectReason::TooLarge);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        // Nothing from the batch was staged, including the valid file.
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_stage_accepts_and_previews() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = UploadSession::new();
        session
            .stage(vec![
                candidate(&dir, "a.jpg", b"aaa").await,
                candidate(&dir, "b.png", b"bbb").await,
            ])
            .await
            .unwrap();

        assert_eq!(session.files().len(), 2);
        assert_eq!(session.files()[0].status, UploadStatus::Pending);
        assert_eq!(session.files()[0].content_type, "image/jpeg");
        assert_eq!(session.files()[0].payload(), b"aaa");

        // Preview tasks complete independently; poll until absorbed.
        for _ in 0..50 {
            session.absorb_previews();
            if session.files().iter().all(|file| file.preview.is_some()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(session.files()[0]
            .preview
            .as_deref()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_restage_replaces_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let first = candidate(&dir, "same.jpg", b"bytes").await;
        let second = first.clone();

        let mut session = UploadSession::new();
        session.stage(vec![first]).await.unwrap();
        session.files[0].status = UploadStatus::Error;
        session.files[0].error = Some("old outcome".into());

        session.stage(vec![second]).await.unwrap();
        assert_eq!(session.files().len(), 1);
        assert_eq!(session.files()[0].status, UploadStatus::Pending);
        assert!(session.files()[0].error.is_none());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (_dir, mut session) = staged_session(&["a.jpg", "b.jpg"]).await;
        session.phase = SessionPhase::Settled;
        let key = session.files()[0].key.clone();

        assert!(session.remove(&key));
        assert!(!session.remove(&key));
        assert_eq!(session.files().len(), 1);
        assert_eq!(session.phase(), SessionPhase::Staging);

        session.clear();
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_settle_single_success() {
        let (_dir, mut session) = staged_session(&["one.jpg"]).await;
        let summary = session.settle_single(SingleUploadResponse {
            id: Some("img-1".into()),
            existing: false,
        });

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.single_result_id.as_deref(), Some("img-1"));
        assert!(!summary.replayed);
        assert_eq!(session.files()[0].status, UploadStatus::Completed);
        assert_eq!(session.files()[0].progress, 100);
    }

    #[tokio::test]
    async fn test_settle_single_existing_is_success() {
        let (_dir, mut session) = staged_session(&["one.jpg"]).await;
        let summary = session.settle_single(SingleUploadResponse {
            id: Some("img-1".into()),
            existing: true,
        });

        assert_eq!(summary.succeeded, 1);
        assert!(summary.replayed);
        assert_eq!(session.files()[0].status, UploadStatus::Completed);
        assert!(session.files()[0].replayed);
    }

    #[tokio::test]
    async fn test_settle_single_missing_id_is_contract_error() {
        let (_dir, mut session) = staged_session(&["one.jpg"]).await;
        let summary = session.settle_single(SingleUploadResponse {
            id: None,
            existing: false,
        });

        assert_eq!(summary.failed, 1);
        assert!(summary.transport_error.is_none());
        assert_eq!(session.files()[0].status, UploadStatus::Error);
        assert_eq!(session.files()[0].error.as_deref(), Some(MISSING_RESULT_ID));
    }

    fn batch_result(status: &str, id: Option<&str>) -> BatchItemResult {
        BatchItemResult {
            status: status.into(),
            id: id.map(str::to_string),
            filename: None,
        }
    }

    #[tokio::test]
    async fn test_settle_batch_positional_alignment() {
        let (_dir, mut session) = staged_session(&["a.jpg", "b.jpg", "c.jpg"]).await;
        let summary = session.settle_batch(BatchUploadResponse {
            results: vec![
                batch_result("success", Some("1")),
                batch_result("duplicate", Some("2")),
                batch_result("failed", None),
            ],
            errors: vec![],
        });

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(session.files()[0].result_id.as_deref(), Some("1"));
        assert!(session.files()[1].replayed);
        assert_eq!(session.files()[2].status, UploadStatus::Error);
    }

    #[tokio::test]
    async fn test_settle_batch_filename_fallback() {
        // Server dropped one entry from results and reported it in the
        // named error list instead.
        let (_dir, mut session) = staged_session(&["a.jpg", "b.jpg"]).await;
        let summary = session.settle_batch(BatchUploadResponse {
            results: vec![batch_result("success", Some("1"))],
            errors: vec![BatchNamedError {
                filename: "b.jpg".into(),
                error: "unsupported image".into(),
            }],
        });

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(session.files()[1].status, UploadStatus::Error);
        assert_eq!(
            session.files()[1].error.as_deref(),
            Some("unsupported image")
        );
    }

    #[tokio::test]
    async fn test_settle_batch_uncovered_file_errors() {
        let (_dir, mut session) = staged_session(&["a.jpg", "b.jpg"]).await;
        let summary = session.settle_batch(BatchUploadResponse {
            results: vec![batch_result("success", Some("1"))],
            errors: vec![],
        });

        assert_eq!(summary.failed, 1);
        assert_eq!(
            session.files()[1].error.as_deref(),
            Some(NO_RESULT_FOR_FILE)
        );
    }

    #[tokio::test]
    async fn test_transport_failure_marks_every_file() {
        let (_dir, mut session) = staged_session(&["a.jpg", "b.jpg", "c.jpg"]).await;
        let summary = session.settle_transport_failure(ApiError::Status {
            status: 502,
            message: "bad gateway".into(),
        });

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 3);
        assert!(summary.transport_error.is_some());
        for file in session.files() {
            assert_eq!(file.status, UploadStatus::Error);
            assert_eq!(file.progress, 0);
            assert_eq!(file.error, summary.transport_error);
        }
    }

    #[tokio::test]
    async fn test_commit_preconditions() {
        let settings = crate::config::Settings::default();
        let client =
            ApiClient::new(&settings, &crate::config::SessionContext::ephemeral(None)).unwrap();

        let mut session = UploadSession::new();
        assert!(matches!(
            session.commit(&client).await,
            Err(CommitError::NothingStaged)
        ));
    }
}
