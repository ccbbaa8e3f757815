// ==========================================
// UPLOAD SESSION
// ==========================================
// Files picked for a story, their previews, and the batch upload that sends
// them to the object store.
//
// Per file:
//
//   Created ──upload──▶ Saving ──▶ Saved          (preview revoked)
//      │                  │
//      │                  └──────▶ SaveFailed     (preview kept, retried by the next upload)
//      └──remove──▶ Removed                       (preview revoked)
//
// A batch reports every file separately. One failed file never hides the
// others that made it.

use futures::future::join_all;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::preview::{PreviewRef, PreviewRegistry};
use crate::error::{StoreError, UploadError};
use crate::resource::{FailureReason, ResourceHandle, ResourceId, ResourceMetadata, ResourceSource};
use crate::store::RemoteStore;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Created,
    Saving,
    Saved { url: String, path: String },
    SaveFailed { error: String },
    Removed,
}

/// A file picked by the user, already read into memory.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        LocalFile {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(LocalFile::new(name, bytes))
    }
}

/// Read-only view of one file for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEntryView {
    pub id: ResourceId,
    pub name: String,
    pub size: usize,
    pub state: UploadState,
    pub preview_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Saved { url: String, path: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub id: ResourceId,
    pub name: String,
    pub outcome: ItemOutcome,
}

/// Result of one `upload_to_story` call, in the order files were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub items: Vec<ItemResult>,
}

impl BatchReport {
    pub fn saved_urls(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match &item.outcome {
                ItemOutcome::Saved { url, .. } => Some(url.as_str()),
                ItemOutcome::Failed { .. } => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&ItemResult> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed { .. }))
            .collect()
    }

    pub fn all_saved(&self) -> bool {
        self.failures().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// (path, error); these stay tracked for the next cleanup
    pub failed: Vec<(String, String)>,
}

struct Entry {
    handle: ResourceHandle,
    name: String,
    bytes: Arc<[u8]>,
    state: UploadState,
    preview: Option<PreviewRef>,
}

#[derive(Default)]
struct Files {
    entries: Vec<Entry>,
    uploaded: Vec<String>,
    uploading: bool,
    closed: bool,
}

struct Job {
    id: ResourceId,
    name: String,
    bytes: Arc<[u8]>,
    path: String,
    content_type: &'static str,
}

const INTERRUPTED: &str = "Upload interrupted";

// Ends a batch however its future finishes: clears the in-progress flag and
// moves files that never settled to SaveFailed so the next upload takes them.
struct BatchGuard<'a> {
    files: &'a Mutex<Files>,
    ids: Vec<ResourceId>,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.files.lock();
        state.uploading = false;
        for entry in state.entries.iter_mut() {
            if entry.state == UploadState::Saving && self.ids.contains(&entry.handle.id()) {
                entry
                    .handle
                    .mark_failed(FailureReason::Upload(INTERRUPTED.to_string()));
                entry.state = UploadState::SaveFailed {
                    error: INTERRUPTED.to_string(),
                };
            }
        }
    }
}

pub struct UploadSession {
    store: Arc<dyn RemoteStore>,
    previews: Arc<PreviewRegistry>,
    files: Mutex<Files>,
    cancel: CancellationToken,
}

impl UploadSession {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self::with_previews(store, Arc::new(PreviewRegistry::new()))
    }

    pub fn with_previews(store: Arc<dyn RemoteStore>, previews: Arc<PreviewRegistry>) -> Self {
        UploadSession {
            store,
            previews,
            files: Mutex::new(Files::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn previews(&self) -> &Arc<PreviewRegistry> {
        &self.previews
    }

    /// Adds files in `Created` with a live preview each.
    pub fn add_files(&self, files: Vec<LocalFile>) -> Result<Vec<ResourceId>, UploadError> {
        if let Some(empty) = files.iter().find(|f| f.bytes.is_empty()) {
            return Err(UploadError::Validation(format!("{} is empty", empty.name)));
        }

        let mut state = self.files.lock();
        if state.closed {
            return Err(UploadError::Closed);
        }

        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let handle =
                ResourceHandle::create(ResourceSource::local(file.name.clone(), file.bytes.clone()));
            let id = handle.id();
            let preview = self.previews.create_preview(id, file.bytes.clone());
            tracing::debug!(resource = %id, name = %file.name, size = file.bytes.len(), "File added");

            state.entries.push(Entry {
                handle,
                name: file.name,
                bytes: file.bytes,
                state: UploadState::Created,
                preview: Some(preview),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    /// Marks the file removed and revokes its preview. `false` if it was
    /// unknown or already removed.
    pub fn remove_file(&self, id: ResourceId) -> bool {
        let mut state = self.files.lock();
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.handle.id() == id && e.state != UploadState::Removed)
        else {
            return false;
        };

        if let Some(preview) = entry.preview.take() {
            self.previews.revoke(&preview);
        }
        entry.handle.cancel();
        entry.state = UploadState::Removed;
        tracing::debug!(resource = %id, name = %entry.name, "File removed");
        true
    }

    /// Files still in the session, removed ones excluded.
    pub fn files(&self) -> Vec<UploadEntryView> {
        self.files
            .lock()
            .entries
            .iter()
            .filter(|e| e.state != UploadState::Removed)
            .map(|e| UploadEntryView {
                id: e.handle.id(),
                name: e.name.clone(),
                size: e.bytes.len(),
                state: e.state.clone(),
                preview_uri: e.preview.as_ref().map(|p| p.uri()),
            })
            .collect()
    }

    pub fn state_of(&self, id: ResourceId) -> Option<UploadState> {
        self.files
            .lock()
            .entries
            .iter()
            .find(|e| e.handle.id() == id)
            .map(|e| e.state.clone())
    }

    pub fn is_uploading(&self) -> bool {
        self.files.lock().uploading
    }

    /// Storage paths written by this session and not cleaned up yet.
    pub fn uploaded_paths(&self) -> Vec<String> {
        self.files.lock().uploaded.clone()
    }

    /// Uploads every `Created` or `SaveFailed` file concurrently.
    ///
    /// Validation problems come back before anything is sent. Once the batch
    /// runs, the call succeeds with a per-file report even if some files failed.
    pub async fn upload_to_story(&self, story_id: &str) -> Result<BatchReport, UploadError> {
        let story_id = story_id.trim();
        let jobs = {
            let mut state = self.files.lock();
            if state.closed {
                return Err(UploadError::Closed);
            }
            if story_id.is_empty() {
                return Err(UploadError::Validation("No story selected".to_string()));
            }
            if state.uploading {
                return Err(UploadError::Validation(
                    "An upload is already in progress".to_string(),
                ));
            }

            let mut jobs = Vec::new();
            for entry in state.entries.iter_mut() {
                if !matches!(entry.state, UploadState::Created | UploadState::SaveFailed { .. }) {
                    continue;
                }
                entry.state = UploadState::Saving;
                entry.handle.begin_load();
                jobs.push(Job {
                    id: entry.handle.id(),
                    name: entry.name.clone(),
                    bytes: entry.bytes.clone(),
                    path: storage_path(story_id, entry.handle.source()),
                    content_type: entry.handle.source().content_type(),
                });
            }

            if jobs.is_empty() {
                return Err(UploadError::Validation("No files to upload".to_string()));
            }
            state.uploading = true;
            jobs
        };

        tracing::info!(story = story_id, files = jobs.len(), "Uploading files");
        let guard = BatchGuard {
            files: &self.files,
            ids: jobs.iter().map(|job| job.id).collect(),
        };

        // Each file settles as soon as its upload returns, so nothing that
        // reached the store is lost if the batch is cut short.
        let uploads = jobs.iter().map(|job| {
            let cancel = self.cancel.clone();
            async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.store.upload(job.bytes.clone(), &job.path, job.content_type) => Some(result),
                };
                let result = result?;
                let mut state = self.files.lock();
                Some(self.settle(&mut state, job, result))
            }
        });
        let results: Vec<Option<ItemResult>> = join_all(uploads).await;
        drop(guard);

        if self.files.lock().closed {
            let kept = results.iter().flatten().count();
            tracing::debug!(story = story_id, kept, "Upload batch cut short by teardown");
            return Err(UploadError::Closed);
        }

        let report = BatchReport {
            items: results.into_iter().flatten().collect(),
        };
        let failed = report.failures().len();
        tracing::info!(
            story = story_id,
            saved = report.items.len() - failed,
            failed,
            "Upload batch finished"
        );
        Ok(report)
    }

    fn settle(
        &self,
        state: &mut Files,
        job: &Job,
        result: Result<String, StoreError>,
    ) -> ItemResult {
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.handle.id() == job.id && e.state == UploadState::Saving);

        let outcome = match (entry, result) {
            (Some(entry), Ok(url)) => {
                entry.handle.mark_ready(ResourceMetadata {
                    duration: None,
                    byte_len: job.bytes.len(),
                });
                if let Some(preview) = entry.preview.take() {
                    self.previews.revoke(&preview);
                }
                entry.state = UploadState::Saved {
                    url: url.clone(),
                    path: job.path.clone(),
                };
                state.uploaded.push(job.path.clone());
                ItemOutcome::Saved {
                    url,
                    path: job.path.clone(),
                }
            }
            (Some(entry), Err(e)) => {
                let error = e.to_string();
                tracing::warn!(resource = %job.id, name = %job.name, error = %error, "File upload failed");
                entry.handle.mark_failed(FailureReason::Upload(error.clone()));
                entry.state = UploadState::SaveFailed {
                    error: error.clone(),
                };
                ItemOutcome::Failed { error }
            }
            // removed while saving: remember the object so cleanup deletes it
            (None, Ok(url)) => {
                state.uploaded.push(job.path.clone());
                ItemOutcome::Saved {
                    url,
                    path: job.path.clone(),
                }
            }
            (None, Err(e)) => ItemOutcome::Failed {
                error: e.to_string(),
            },
        };

        ItemResult {
            id: job.id,
            name: job.name.clone(),
            outcome,
        }
    }

    /// Deletes uploaded objects, revokes every preview and forgets all files.
    /// Paths that fail to delete stay tracked for the next call.
    pub async fn cleanup(&self) -> CleanupReport {
        let paths = {
            let mut state = self.files.lock();
            for mut entry in state.entries.drain(..) {
                if let Some(preview) = entry.preview.take() {
                    self.previews.revoke(&preview);
                }
                entry.handle.cancel();
            }
            std::mem::take(&mut state.uploaded)
        };

        let results = join_all(paths.iter().map(|path| self.store.remove(path))).await;

        let mut report = CleanupReport::default();
        for (path, result) in paths.into_iter().zip(results) {
            match result {
                Ok(()) => report.removed.push(path),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to clean up uploaded file");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        if !report.failed.is_empty() {
            let mut state = self.files.lock();
            state
                .uploaded
                .extend(report.failed.iter().map(|(path, _)| path.clone()));
        }
        report
    }

    /// Aborts in-flight uploads and revokes every live preview. Idempotent.
    pub fn teardown(&self) {
        let mut state = self.files.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.cancel.cancel();

        for entry in state.entries.iter_mut() {
            if let Some(preview) = entry.preview.take() {
                self.previews.revoke(&preview);
            }
            entry.handle.cancel();
        }
        tracing::debug!(files = state.entries.len(), "Upload session torn down");
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// `stories/<story>/<uuid>.<ext>`
fn storage_path(story_id: &str, source: &ResourceSource) -> String {
    match source.extension() {
        Some(ext) => format!("stories/{}/{}.{}", story_id, Uuid::new_v4(), ext),
        None => format!("stories/{}/{}", story_id, Uuid::new_v4()),
    }
}
