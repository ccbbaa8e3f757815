// ==========================================
// RESOURCE HANDLE
// ==========================================
// One loading or uploading item and where it is in its lifecycle.
//
// State machine:
//
//   Idle ──begin_load──▶ Loading ──mark_ready──▶ Ready
//    ▲                     │  ▲
//    │               mark_retrying
//    │                     ▼  │
//   Failed ◀──mark_failed── Retrying(n)
//
//   cancel(): Idle | Loading | Retrying ──▶ Cancelled
//
// Ready, Failed and Cancelled are terminal for an attempt chain. Only
// begin_load() leaves Failed, and that starts a brand new chain.
//
// Every transition method returns whether it applied. A call that does not
// fit the current state leaves the handle unchanged.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        ResourceId(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        ResourceId(id)
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ==========================================
// RESOURCE SOURCE
// ==========================================
// Remote: something to download (a story recording URL)
// Local:  bytes picked by the user that still have to be uploaded
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSource {
    Remote { url: String },
    Local { name: String, bytes: Arc<[u8]> },
}

impl ResourceSource {
    pub fn remote(url: impl Into<String>) -> Self {
        ResourceSource::Remote { url: url.into() }
    }

    pub fn local(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        ResourceSource::Local {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// URL for remote sources, file name for local ones.
    pub fn label(&self) -> &str {
        match self {
            ResourceSource::Remote { url } => url,
            ResourceSource::Local { name, .. } => name,
        }
    }

    /// Lowercased extension of the file name or URL path, if any.
    pub fn extension(&self) -> Option<String> {
        let path = self.label();
        let path = path.split(['?', '#']).next().unwrap_or(path);
        let file = path.rsplit('/').next().unwrap_or(path);
        let (stem, ext) = file.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// MIME type guessed from the extension.
    pub fn content_type(&self) -> &'static str {
        match self.extension().as_deref() {
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("wav") => "audio/wav",
            Some("ogg") => "audio/ogg",
            Some("webm") => "audio/webm",
            Some("flac") => "audio/flac",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("pdf") => "application/pdf",
            _ => "application/octet-stream",
        }
    }
}

// ==========================================
// FAILURE REASON
// ==========================================
// Display gives the message shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Exhausted { attempts: u32, last_error: String },
    Initialization(String),
    Unsupported(String),
    Upload(String),
}

impl FailureReason {
    /// Underlying error text for logs.
    pub fn detail(&self) -> &str {
        match self {
            FailureReason::Exhausted { last_error, .. } => last_error,
            FailureReason::Initialization(detail) => detail,
            FailureReason::Unsupported(detail) => detail,
            FailureReason::Upload(detail) => detail,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exhausted { .. } => write!(
                f,
                "Failed to load audio file. Please check your connection and try again."
            ),
            FailureReason::Initialization(_) => write!(
                f,
                "Failed to initialize audio player. Please refresh the page."
            ),
            FailureReason::Unsupported(_) => write!(
                f,
                "This audio file could not be played. It may be corrupted or in an unsupported format."
            ),
            FailureReason::Upload(_) => write!(f, "Failed to upload file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandleState {
    Idle,
    Loading,
    Ready,
    Retrying(u32),
    Failed(FailureReason),
    Cancelled,
}

impl HandleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandleState::Ready | HandleState::Failed(_) | HandleState::Cancelled
        )
    }

    /// Loading or waiting for a retry.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, HandleState::Loading | HandleState::Retrying(_))
    }
}

/// What becomes known once a resource is ready.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceMetadata {
    pub duration: Option<Duration>,
    pub byte_len: usize,
}

#[derive(Debug, Clone)]
pub struct ResourceHandle {
    id: ResourceId,
    source: ResourceSource,
    state: HandleState,
    metadata: Option<ResourceMetadata>,
}

impl ResourceHandle {
    pub fn create(source: ResourceSource) -> Self {
        Self::with_id(ResourceId::new(), source)
    }

    pub fn with_id(id: ResourceId, source: ResourceSource) -> Self {
        ResourceHandle {
            id,
            source,
            state: HandleState::Idle,
            metadata: None,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn source(&self) -> &ResourceSource {
        &self.source
    }

    pub fn state(&self) -> &HandleState {
        &self.state
    }

    /// Only set while the handle is Ready.
    pub fn metadata(&self) -> Option<&ResourceMetadata> {
        match self.state {
            HandleState::Ready => self.metadata.as_ref(),
            _ => None,
        }
    }

    // Idle | Failed -> Loading
    pub fn begin_load(&mut self) -> bool {
        match self.state {
            HandleState::Idle | HandleState::Failed(_) => {
                self.state = HandleState::Loading;
                self.metadata = None;
                true
            }
            _ => false,
        }
    }

    // Loading | Retrying -> Retrying(attempt)
    pub fn mark_retrying(&mut self, attempt: u32) -> bool {
        if !self.state.is_in_flight() {
            return false;
        }
        self.state = HandleState::Retrying(attempt);
        true
    }

    // Loading | Retrying -> Ready
    pub fn mark_ready(&mut self, metadata: ResourceMetadata) -> bool {
        if !self.state.is_in_flight() {
            return false;
        }
        self.state = HandleState::Ready;
        self.metadata = Some(metadata);
        true
    }

    // Loading | Retrying -> Failed
    pub fn mark_failed(&mut self, reason: FailureReason) -> bool {
        if !self.state.is_in_flight() {
            return false;
        }
        self.state = HandleState::Failed(reason);
        true
    }

    // Any non-terminal state -> Cancelled. Idempotent.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = HandleState::Cancelled;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> ResourceHandle {
        ResourceHandle::create(ResourceSource::remote("https://cdn.example/story.mp3"))
    }

    #[test]
    fn new_handle_is_idle() {
        let handle = remote();
        assert_eq!(handle.state(), &HandleState::Idle);
        assert!(handle.metadata().is_none());
    }

    #[test]
    fn load_retry_ready_chain() {
        let mut handle = remote();
        assert!(handle.begin_load());
        assert!(handle.mark_retrying(1));
        assert!(handle.mark_retrying(2));
        assert!(handle.mark_ready(ResourceMetadata {
            duration: Some(Duration::from_secs(90)),
            byte_len: 1024,
        }));
        assert_eq!(handle.state(), &HandleState::Ready);
        assert_eq!(
            handle.metadata().and_then(|m| m.duration),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn begin_load_is_noop_when_ready_or_cancelled() {
        let mut handle = remote();
        handle.begin_load();
        handle.mark_ready(ResourceMetadata::default());
        assert!(!handle.begin_load());
        assert_eq!(handle.state(), &HandleState::Ready);

        let mut cancelled = remote();
        assert!(cancelled.cancel());
        assert!(!cancelled.begin_load());
        assert_eq!(cancelled.state(), &HandleState::Cancelled);
    }

    #[test]
    fn failed_starts_a_new_chain() {
        let mut handle = remote();
        handle.begin_load();
        handle.mark_failed(FailureReason::Exhausted {
            attempts: 3,
            last_error: "HTTP 404".into(),
        });
        assert!(!handle.mark_ready(ResourceMetadata::default()));
        assert!(!handle.mark_retrying(4));
        assert!(handle.begin_load());
        assert_eq!(handle.state(), &HandleState::Loading);
    }

    #[test]
    fn cancel_is_idempotent_and_skips_terminal_states() {
        let mut handle = remote();
        handle.begin_load();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.mark_ready(ResourceMetadata::default()));

        let mut ready = remote();
        ready.begin_load();
        ready.mark_ready(ResourceMetadata::default());
        assert!(!ready.cancel());
        assert_eq!(ready.state(), &HandleState::Ready);
    }

    #[test]
    fn failure_messages_are_distinct() {
        let exhausted = FailureReason::Exhausted {
            attempts: 3,
            last_error: "timeout".into(),
        };
        let init = FailureReason::Initialization("no device".into());
        assert_ne!(exhausted.to_string(), init.to_string());
        assert_eq!(exhausted.detail(), "timeout");
    }

    #[test]
    fn source_extension_and_content_type() {
        let remote = ResourceSource::remote("https://x.test/a/b/Voice.MP3?token=1");
        assert_eq!(remote.extension().as_deref(), Some("mp3"));
        assert_eq!(remote.content_type(), "audio/mpeg");

        let local = ResourceSource::local("scan.pdf", vec![1u8, 2, 3]);
        assert_eq!(local.content_type(), "application/pdf");

        let bare = ResourceSource::local("README", Vec::<u8>::new());
        assert_eq!(bare.extension(), None);
        assert_eq!(bare.content_type(), "application/octet-stream");
    }
}
