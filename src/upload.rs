//! Document uploads with status polling
//!
//! Each upload runs as its own task: send the file, then poll the document
//! status on a fixed interval until it completes, fails, or the attempt
//! budget runs out. Uploads are independent and can be cancelled one by one.

use crate::api::{BackendClient, DocumentStatusReport};
use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::models::{Document, DocumentStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where an upload currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPhase {
    Uploading,
    Processing {
        document_id: String,
        status: DocumentStatus,
        progress: u8,
    },
    Completed(Document),
    Failed(String),
    /// The backend was still processing after the last poll attempt
    TimedOut {
        document_id: String,
    },
    Cancelled,
}

impl UploadPhase {
    pub fn is_finished(&self) -> bool {
        !matches!(self, UploadPhase::Uploading | UploadPhase::Processing { .. })
    }

    /// Overall progress on a 0-100 scale
    pub fn percent(&self) -> u8 {
        match self {
            UploadPhase::Uploading => 0,
            UploadPhase::Processing { progress, .. } => (*progress).min(100),
            UploadPhase::Completed(_) => 100,
            _ => 0,
        }
    }
}

/// Check a file against the upload rules and return its size
pub fn validate_upload(path: &Path, config: &UploadConfig) -> Result<u64> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !config
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&extension))
    {
        return Err(Error::Validation(format!(
            "{}: only {} files can be uploaded",
            path.display(),
            config.allowed_extensions.join(", ")
        )));
    }

    let metadata = std::fs::metadata(path)
        .map_err(|e| Error::Validation(format!("{}: {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(Error::Validation(format!("{} is not a file", path.display())));
    }
    if metadata.len() > config.max_file_bytes {
        return Err(Error::Validation(format!(
            "{} is {} bytes, the limit is {} bytes",
            path.display(),
            metadata.len(),
            config.max_file_bytes
        )));
    }
    Ok(metadata.len())
}

/// A running upload
pub struct UploadHandle {
    path: PathBuf,
    progress: watch::Receiver<UploadPhase>,
    cancel: CancellationToken,
    task: JoinHandle<UploadPhase>,
}

impl UploadHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Watch phase changes
    pub fn subscribe(&self) -> watch::Receiver<UploadPhase> {
        self.progress.clone()
    }

    /// Stop this upload; other uploads keep running
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this upload after the handle has been consumed
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the final phase
    pub async fn wait(self) -> UploadPhase {
        match self.task.await {
            Ok(phase) => phase,
            Err(e) if e.is_cancelled() => UploadPhase::Cancelled,
            Err(e) => UploadPhase::Failed(format!("upload task failed: {}", e)),
        }
    }
}

/// Starts uploads and keeps their poll settings
#[derive(Clone)]
pub struct UploadManager {
    client: Arc<BackendClient>,
    config: UploadConfig,
}

impl UploadManager {
    pub fn new(client: Arc<BackendClient>, config: UploadConfig) -> Self {
        Self { client, config }
    }

    /// Validate `path` and start uploading it in the background
    pub fn start(&self, path: impl Into<PathBuf>) -> Result<UploadHandle> {
        let path = path.into();
        let size = validate_upload(&path, &self.config)?;
        debug!("Starting upload of {:?} ({} bytes)", path, size);

        let (tx, rx) = watch::channel(UploadPhase::Uploading);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_upload(
            self.client.clone(),
            path.clone(),
            self.config.clone(),
            cancel.clone(),
            tx,
        ));

        Ok(UploadHandle {
            path,
            progress: rx,
            cancel,
            task,
        })
    }
}

async fn run_upload(
    client: Arc<BackendClient>,
    path: PathBuf,
    config: UploadConfig,
    cancel: CancellationToken,
    tx: watch::Sender<UploadPhase>,
) -> UploadPhase {
    let phase = upload_and_poll(&client, &path, &config, &cancel, &tx).await;
    match &phase {
        UploadPhase::Completed(doc) => info!("Upload of {} completed ({})", doc.name, doc.id),
        UploadPhase::Failed(reason) => warn!("Upload of {:?} failed: {}", path, reason),
        UploadPhase::TimedOut { document_id } => {
            warn!("Gave up waiting for document {} to finish processing", document_id)
        }
        UploadPhase::Cancelled => info!("Upload of {:?} cancelled", path),
        _ => {}
    }
    let _ = tx.send(phase.clone());
    phase
}

async fn upload_and_poll(
    client: &BackendClient,
    path: &Path,
    config: &UploadConfig,
    cancel: &CancellationToken,
    tx: &watch::Sender<UploadPhase>,
) -> UploadPhase {
    if cancel.is_cancelled() {
        return UploadPhase::Cancelled;
    }
    let uploaded = tokio::select! {
        biased;
        _ = cancel.cancelled() => return UploadPhase::Cancelled,
        result = client.upload_document(path) => result,
    };
    if cancel.is_cancelled() {
        return UploadPhase::Cancelled;
    }
    let document = match uploaded {
        Ok(document) => document,
        Err(Error::DuplicateDocument(name)) => {
            return UploadPhase::Failed(format!("{} already exists", name));
        }
        Err(e) => return UploadPhase::Failed(e.to_string()),
    };

    let interval = Duration::from_millis(config.poll_interval_ms);
    let _ = tx.send(UploadPhase::Processing {
        document_id: document.id.clone(),
        status: document.status,
        progress: 0,
    });

    for attempt in 1..=config.max_poll_attempts {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return UploadPhase::Cancelled,
            _ = tokio::time::sleep(interval) => {}
        }

        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return UploadPhase::Cancelled,
            report = client.document_status(&document.id) => report,
        };
        // A response racing a cancel must not surface
        if cancel.is_cancelled() {
            return UploadPhase::Cancelled;
        }
        match report {
            Ok(DocumentStatusReport {
                status: DocumentStatus::Completed,
                ..
            }) => {
                return UploadPhase::Completed(Document {
                    status: DocumentStatus::Completed,
                    ..document
                });
            }
            Ok(DocumentStatusReport {
                status: DocumentStatus::Failed,
                error_message,
                ..
            }) => {
                return UploadPhase::Failed(
                    error_message.unwrap_or_else(|| "processing failed".to_string()),
                );
            }
            Ok(report) => {
                debug!(
                    "Document {} is {} ({}%), poll {}/{}",
                    document.id, report.status, report.progress, attempt, config.max_poll_attempts
                );
                let _ = tx.send(UploadPhase::Processing {
                    document_id: document.id.clone(),
                    status: report.status,
                    progress: report.progress,
                });
            }
            // Transient errors: keep polling
            Err(e) => warn!("Status poll {} for {} failed: {}", attempt, document.id, e),
        }
    }

    UploadPhase::TimedOut {
        document_id: document.id,
    }
}
