// Shared fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use keepsake::error::{EngineError, StoreError};
use keepsake::player::{EngineFactory, PlaybackEngine, SessionEvent, SessionEventKind};
use keepsake::resource::HandleState;
use keepsake::store::RemoteStore;

// ==========================================
// FAKE STORE
// ==========================================
#[derive(Default)]
pub struct FakeStore {
    unreachable_probes: AtomicU32,
    probe_times: Mutex<Vec<Instant>>,
    load_gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing_uploads: Mutex<HashSet<Vec<u8>>>,
    upload_gate: Mutex<Option<Arc<Notify>>>,
    upload_gates_by_bytes: Mutex<HashMap<Vec<u8>, Arc<Notify>>>,
    uploaded: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    fail_removes: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `n` probes report the resource as unreachable.
    pub fn fail_probes(&self, n: u32) {
        self.unreachable_probes.store(n, Ordering::SeqCst);
    }

    pub fn probe_times(&self) -> Vec<Instant> {
        self.probe_times.lock().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probe_times.lock().len()
    }

    /// Loads of `url` wait until the returned notify is signalled.
    pub fn gate_load(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.load_gates.lock().insert(url.to_string(), gate.clone());
        gate
    }

    /// Uploads of exactly these bytes fail with HTTP 500.
    pub fn fail_upload_of(&self, bytes: &[u8]) {
        self.failing_uploads.lock().insert(bytes.to_vec());
    }

    pub fn allow_upload_of(&self, bytes: &[u8]) {
        self.failing_uploads.lock().remove(bytes);
    }

    /// Every upload waits until the returned notify is signalled.
    pub fn gate_uploads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.upload_gate.lock() = Some(gate.clone());
        gate
    }

    /// Lets uploads through again after `gate_uploads`.
    pub fn open_uploads(&self) {
        *self.upload_gate.lock() = None;
    }

    /// Uploads of exactly these bytes wait until the returned notify is signalled.
    pub fn gate_upload_of(&self, bytes: &[u8]) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.upload_gates_by_bytes
            .lock()
            .insert(bytes.to_vec(), gate.clone());
        gate
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn probe(&self, _url: &str) -> Result<bool, StoreError> {
        self.probe_times.lock().push(Instant::now());
        let remaining = self.unreachable_probes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unreachable_probes.store(remaining - 1, Ordering::SeqCst);
            return Ok(false);
        }
        Ok(true)
    }

    async fn load(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let gate = self.load_gates.lock().get(url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(url.as_bytes().to_vec())
    }

    async fn upload(
        &self,
        bytes: Arc<[u8]>,
        path: &str,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        let gate = self
            .upload_gate
            .lock()
            .clone()
            .or_else(|| self.upload_gates_by_bytes.lock().get(&bytes[..]).cloned());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing_uploads.lock().contains(&bytes[..]) {
            return Err(StoreError::Status { status: 500 });
        }
        self.uploaded.lock().push(path.to_string());
        Ok(format!("https://files.test/{}", path))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(StoreError::Status { status: 503 });
        }
        self.removed.lock().push(path.to_string());
        Ok(())
    }
}

// ==========================================
// FAKE ENGINE
// ==========================================
#[derive(Default)]
pub struct EngineCounters {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
}

pub struct FakeEngineFactory {
    duration: f64,
    failure: Mutex<Option<EngineError>>,
    finished: Arc<AtomicBool>,
    pub counters: Arc<EngineCounters>,
}

impl FakeEngineFactory {
    pub fn new(duration: f64) -> Arc<Self> {
        Arc::new(FakeEngineFactory {
            duration,
            failure: Mutex::new(None),
            finished: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(EngineCounters::default()),
        })
    }

    pub fn fail_with(&self, error: Option<EngineError>) {
        *self.failure.lock() = error;
    }

    /// Makes every engine report end of stream.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.counters.destroyed.load(Ordering::SeqCst)
    }
}

impl EngineFactory for FakeEngineFactory {
    fn create(&self, _bytes: Arc<[u8]>) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine {
            duration: self.duration,
            position: 0.0,
            playing: false,
            destroyed: false,
            finished: self.finished.clone(),
            counters: self.counters.clone(),
        }))
    }
}

pub struct FakeEngine {
    duration: f64,
    position: f64,
    playing: bool,
    destroyed: bool,
    finished: Arc<AtomicBool>,
    counters: Arc<EngineCounters>,
}

impl PlaybackEngine for FakeEngine {
    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek_to(&mut self, seconds: f64) {
        self.position = seconds;
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn set_volume(&mut self, _volume: u32) {}

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ==========================================
// EVENT HELPERS
// ==========================================

/// Collects state events until one satisfies `done`, giving up after a
/// generous virtual or real timeout.
pub async fn states_until(
    rx: &mut broadcast::Receiver<SessionEvent>,
    done: impl Fn(&HandleState) -> bool,
) -> Vec<(HandleState, Instant)> {
    let mut states = Vec::new();
    let collect = async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent {
                    kind: SessionEventKind::State(state),
                    at,
                    ..
                }) => {
                    let finished = done(&state);
                    states.push((state, at));
                    if finished {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => panic!("event stream broken: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), collect)
        .await
        .expect("timed out waiting for session state");
    states
}

pub fn is_settled(state: &HandleState) -> bool {
    matches!(state, HandleState::Ready | HandleState::Failed(_))
}

/// Yields until `check` holds, for effects of spawned and blocking tasks.
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}
