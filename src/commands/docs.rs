//! Document commands: list, upload, delete, status

use crate::api::{BackendClient, DocumentStatusReport};
use crate::cache::LocalCache;
use crate::config::Config;
use crate::error::Result;
use crate::models::Document;
use crate::progress::{add_upload_bar, update_upload_bar};
use crate::upload::{UploadHandle, UploadManager, UploadPhase};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

fn documents_key(user_id: &str) -> String {
    format!("documents:{}", user_id)
}

/// The user's documents, served from the local cache while fresh
pub async fn load_documents(
    config: &Config,
    client: &BackendClient,
    cache: Option<&LocalCache>,
    refresh: bool,
) -> Result<Vec<Document>> {
    let key = documents_key(client.user_id());

    if let (Some(cache), false) = (cache, refresh) {
        match cache.get::<Vec<Document>>(&key).await {
            Ok(Some(documents)) => {
                debug!("Using {} cached documents", documents.len());
                return Ok(documents);
            }
            Ok(None) => {}
            Err(e) => warn!("Document cache read failed: {}", e),
        }
    }

    let documents = client.list_documents().await?;
    if let Some(cache) = cache {
        if let Err(e) = cache.set(&key, &documents, config.cache.query_ttl()).await {
            warn!("Document cache write failed: {}", e);
        }
    }
    Ok(documents)
}

async fn invalidate_documents(client: &BackendClient, cache: Option<&LocalCache>) {
    if let Some(cache) = cache {
        if let Err(e) = cache.remove(&documents_key(client.user_id())).await {
            warn!("Document cache invalidation failed: {}", e);
        }
    }
}

pub async fn cmd_list_documents(
    config: &Config,
    client: &BackendClient,
    cache: Option<&LocalCache>,
    refresh: bool,
) -> Result<Vec<Document>> {
    load_documents(config, client, cache, refresh).await
}

/// Final state of one file upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub file: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadReport {
    fn from_phase(file: String, phase: &UploadPhase) -> Self {
        let (status, document_id, error) = match phase {
            UploadPhase::Completed(doc) => ("completed", Some(doc.id.clone()), None),
            UploadPhase::Failed(reason) => ("failed", None, Some(reason.clone())),
            UploadPhase::TimedOut { document_id } => (
                "timed_out",
                Some(document_id.clone()),
                Some("still processing".to_string()),
            ),
            UploadPhase::Cancelled => ("cancelled", None, None),
            UploadPhase::Uploading | UploadPhase::Processing { .. } => ("pending", None, None),
        };
        Self {
            file,
            status: status.to_string(),
            document_id,
            error,
        }
    }
}

/// Upload every file concurrently; Ctrl-C cancels the uploads still running
pub async fn cmd_upload_documents(
    config: &Config,
    client: Arc<BackendClient>,
    cache: Option<&LocalCache>,
    paths: Vec<PathBuf>,
    show_progress: bool,
) -> Result<Vec<UploadReport>> {
    let manager = UploadManager::new(client.clone(), config.upload.clone());
    let mut reports = Vec::new();
    let mut handles = Vec::new();

    for path in paths {
        match manager.start(&path) {
            Ok(handle) => handles.push(handle),
            Err(e) => reports.push(UploadReport {
                file: path.display().to_string(),
                status: "rejected".to_string(),
                document_id: None,
                error: Some(e.to_string()),
            }),
        }
    }

    reports.extend(await_uploads(handles, show_progress, tokio::signal::ctrl_c()).await);

    invalidate_documents(&client, cache).await;
    Ok(reports)
}

/// Wait for every upload. When `interrupt` fires first, the uploads still
/// running are cancelled and still awaited so each one reports its end state.
async fn await_uploads<I: Future>(
    handles: Vec<UploadHandle>,
    show_progress: bool,
    interrupt: I,
) -> Vec<UploadReport> {
    let cancels: Vec<_> = handles.iter().map(|h| h.canceller()).collect();
    let tracked = futures::future::join_all(
        handles
            .into_iter()
            .map(|handle| track_upload(handle, show_progress)),
    );
    tokio::pin!(tracked);

    tokio::select! {
        finished = &mut tracked => finished,
        _ = interrupt => {
            warn!("Interrupted, cancelling {} uploads", cancels.len());
            for cancel in &cancels {
                cancel.cancel();
            }
            tracked.await
        }
    }
}

async fn track_upload(handle: UploadHandle, show_progress: bool) -> UploadReport {
    let file = handle.file_name();
    let bar = show_progress.then(|| add_upload_bar(&file));

    let watcher = bar.clone().map(|bar| {
        let mut phases = handle.subscribe();
        tokio::spawn(async move {
            while phases.changed().await.is_ok() {
                let phase = phases.borrow_and_update().clone();
                update_upload_bar(&bar, &phase);
                if phase.is_finished() {
                    break;
                }
            }
        })
    });

    let phase = handle.wait().await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    if let Some(bar) = &bar {
        update_upload_bar(bar, &phase);
    }
    UploadReport::from_phase(file, &phase)
}

pub async fn cmd_delete_document(
    client: &BackendClient,
    cache: Option<&LocalCache>,
    document_id: &str,
) -> Result<()> {
    client.delete_document(document_id).await?;
    invalidate_documents(client, cache).await;
    Ok(())
}

pub async fn cmd_document_status(
    client: &BackendClient,
    document_id: &str,
) -> Result<DocumentStatusReport> {
    client.document_status(document_id).await
}

pub fn print_documents(documents: &[Document]) {
    println!("\n📄 Documents\n");

    if documents.is_empty() {
        println!("No documents yet. Use 'kbchat docs upload <file.pdf>' to add one.");
        return;
    }

    for doc in documents {
        println!("• {} [{}]", doc.name, doc.status);
        println!("  ID: {}", doc.id);
        println!("  Size: {} bytes, added {}", doc.file_size, doc.created_at);
    }
}

pub fn print_upload_reports(reports: &[UploadReport]) {
    for report in reports {
        let marker = if report.status == "completed" { "✓" } else { "✗" };
        match (&report.document_id, &report.error) {
            (Some(id), None) => println!("{} {} ({})", marker, report.file, id),
            (_, Some(error)) => println!("{} {}: {} ({})", marker, report.file, report.status, error),
            (None, None) => println!("{} {}: {}", marker, report.file, report.status),
        }
    }
}

pub fn print_document_status(document_id: &str, report: &DocumentStatusReport) {
    println!("Document {}: {} ({}%)", document_id, report.status, report.progress);
    if let Some(error) = &report.error_message {
        println!("  Error: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_interrupt_reports_every_upload_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/documents/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "document": {"id": "d1", "name": "a.pdf", "userId": "u1", "fileSize": 4,
                             "createdAt": "2024-01-01T00:00:00Z", "status": "processing"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/documents/d1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"success": true, "status": "chunking", "progress": 10}),
            ))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.upload.poll_interval_ms = 20;
        config.upload.max_poll_attempts = 500;
        let client = BackendClient::new(&server.uri(), "u1", &config).unwrap();
        let manager = UploadManager::new(Arc::new(client), config.upload.clone());

        let dir = TempDir::new().unwrap();
        let handles: Vec<_> = ["a.pdf", "b.pdf"]
            .iter()
            .map(|name| {
                let file = dir.path().join(name);
                std::fs::write(&file, b"%PDF").unwrap();
                manager.start(&file).unwrap()
            })
            .collect();

        let reports =
            await_uploads(handles, false, tokio::time::sleep(Duration::from_millis(80))).await;

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.status == "cancelled"));
    }
}
