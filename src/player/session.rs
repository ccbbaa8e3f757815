// Playback session: one audio slot driven from URL to playable engine.
//
// `start` kicks off an attempt chain on the tokio runtime. Each attempt
// probes the URL, loads the bytes and builds an engine. Store failures are
// retried through the `RetryPolicy` on the injected `Scheduler`; decode
// and device failures end the chain at once.
//
// Every chain carries a `CancellationToken`. Completions check it under
// the slot lock before touching anything, so work that finishes after
// `start` replaced the chain or after `teardown` is dropped silently.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::audio::{EngineFactory, PlaybackEngine};
use crate::error::{EngineError, PlaybackError, StoreError};
use crate::resource::{
    FailureReason, HandleState, ResourceHandle, ResourceId, ResourceMetadata, ResourceSource,
    RetryDecision, RetryPolicy,
};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::store::RemoteStore;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    State(HandleState),
    TimeUpdate(f64),
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub resource: ResourceId,
    pub kind: SessionEventKind,
    pub at: Instant,
}

/// What a UI needs to render the player.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub resource: Option<ResourceId>,
    pub state: HandleState,
    pub position: f64,
    pub duration: f64,
    pub playing: bool,
    pub max_attempts: u32,
    pub closed: bool,
    /// Set once the resource is `Ready`
    pub metadata: Option<ResourceMetadata>,
}

enum AttemptError {
    Transient(String),
    Terminal(FailureReason),
}

struct Slot {
    handle: Option<ResourceHandle>,
    engine: Option<Box<dyn PlaybackEngine>>,
    retry_timer: Option<TimerHandle>,
    chain: CancellationToken,
    playing: bool,
    closed: bool,
}

impl Slot {
    fn ready_engine(&mut self) -> Result<&mut Box<dyn PlaybackEngine>, PlaybackError> {
        if self.closed {
            return Err(PlaybackError::Closed);
        }
        let ready = matches!(
            self.handle.as_ref().map(|h| h.state()),
            Some(HandleState::Ready)
        );
        match self.engine.as_mut() {
            Some(engine) if ready => Ok(engine),
            _ => Err(PlaybackError::NotReady),
        }
    }
}

struct Inner {
    store: Arc<dyn RemoteStore>,
    engines: Arc<dyn EngineFactory>,
    scheduler: Arc<dyn Scheduler>,
    policy: RetryPolicy,
    slot: Mutex<Slot>,
    events: broadcast::Sender<SessionEvent>,
}

pub struct PlaybackSession {
    inner: Arc<Inner>,
}

impl PlaybackSession {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        engines: Arc<dyn EngineFactory>,
        scheduler: Arc<dyn Scheduler>,
        policy: RetryPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        PlaybackSession {
            inner: Arc::new(Inner {
                store,
                engines,
                scheduler,
                policy,
                slot: Mutex::new(Slot {
                    handle: None,
                    engine: None,
                    retry_timer: None,
                    chain: CancellationToken::new(),
                    playing: false,
                    closed: false,
                }),
                events,
            }),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Replaces whatever the slot held with a new load of `url`.
    /// Must be called inside a tokio runtime.
    pub fn start(&self, url: &str) -> Result<ResourceId, PlaybackError> {
        let handle = ResourceHandle::create(ResourceSource::remote(url));
        self.launch(handle)
    }

    /// Starts a fresh chain for the current source after a terminal failure.
    pub fn reload(&self) -> Result<ResourceId, PlaybackError> {
        let handle = {
            let slot = self.inner.slot.lock();
            if slot.closed {
                return Err(PlaybackError::Closed);
            }
            match &slot.handle {
                Some(h) if matches!(h.state(), HandleState::Failed(_)) => h.clone(),
                _ => return Err(PlaybackError::NotReady),
            }
        };
        self.launch(handle)
    }

    fn launch(&self, mut handle: ResourceHandle) -> Result<ResourceId, PlaybackError> {
        let url = handle.source().label().to_string();
        let mut slot = self.inner.slot.lock();
        if slot.closed {
            return Err(PlaybackError::Closed);
        }

        // destroy before replace
        self.inner.release_chain(&mut slot);

        handle.begin_load();
        let id = handle.id();
        let chain = CancellationToken::new();
        slot.handle = Some(handle);
        slot.chain = chain.clone();
        slot.playing = false;

        tracing::info!(resource = %id, url = %url, "Loading audio");
        self.inner.emit(id, SessionEventKind::State(HandleState::Loading));
        drop(slot);

        tokio::spawn(Inner::run_attempt(self.inner.clone(), id, url, 0, chain));
        Ok(id)
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        let mut slot = self.inner.slot.lock();
        slot.ready_engine()?.play();
        slot.playing = true;
        Ok(())
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        let mut slot = self.inner.slot.lock();
        slot.ready_engine()?.pause();
        slot.playing = false;
        Ok(())
    }

    /// Returns whether audio is playing afterwards.
    pub fn toggle(&self) -> Result<bool, PlaybackError> {
        let mut slot = self.inner.slot.lock();
        let playing = !slot.playing;
        let engine = slot.ready_engine()?;
        if playing {
            engine.play();
        } else {
            engine.pause();
        }
        slot.playing = playing;
        Ok(playing)
    }

    /// Moves by `delta` seconds, clamped to `[0, duration]`. Returns the new position.
    pub fn seek_by(&self, delta: f64) -> Result<f64, PlaybackError> {
        let mut slot = self.inner.slot.lock();
        let resource = slot.handle.as_ref().map(|h| h.id());
        let engine = slot.ready_engine()?;

        let delta = if delta.is_finite() { delta } else { 0.0 };
        let duration = engine.duration().max(0.0);
        let target = (engine.position() + delta).clamp(0.0, duration);
        engine.seek_to(target);

        if let Some(id) = resource {
            self.inner.emit(id, SessionEventKind::TimeUpdate(target));
        }
        Ok(target)
    }

    pub fn set_volume(&self, volume: u32) -> Result<(), PlaybackError> {
        let mut slot = self.inner.slot.lock();
        slot.ready_engine()?.set_volume(volume);
        Ok(())
    }

    /// Polls the engine for progress and end of stream. Returns the position
    /// while a resource is ready.
    pub fn tick(&self) -> Option<f64> {
        let mut slot = self.inner.slot.lock();
        let id = slot.handle.as_ref()?.id();
        let playing = slot.playing;
        let engine = slot.ready_engine().ok()?;

        let position = engine.position();
        if !playing {
            return Some(position);
        }

        if engine.is_finished() {
            engine.pause();
            slot.playing = false;
            tracing::debug!(resource = %id, "Playback finished");
            self.inner.emit(id, SessionEventKind::Finished);
        } else {
            self.inner.emit(id, SessionEventKind::TimeUpdate(position));
        }
        Some(position)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let slot = self.inner.slot.lock();
        let (position, duration) = match (&slot.engine, slot.handle.as_ref().map(|h| h.state())) {
            (Some(engine), Some(HandleState::Ready)) => (engine.position(), engine.duration()),
            _ => (0.0, 0.0),
        };

        SessionSnapshot {
            resource: slot.handle.as_ref().map(|h| h.id()),
            state: slot
                .handle
                .as_ref()
                .map(|h| h.state().clone())
                .unwrap_or(HandleState::Idle),
            position,
            duration,
            playing: slot.playing,
            max_attempts: self.inner.policy.max_attempts(),
            closed: slot.closed,
            metadata: slot.handle.as_ref().and_then(|h| h.metadata().cloned()),
        }
    }

    /// Cancels pending retries, invalidates in-flight work, destroys the
    /// engine and cancels the handle, all under one lock. Idempotent.
    pub fn teardown(&self) {
        let mut slot = self.inner.slot.lock();
        if slot.closed {
            return;
        }
        slot.closed = true;
        self.inner.release_chain(&mut slot);
        tracing::debug!("Playback session torn down");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Inner {
    fn emit(&self, resource: ResourceId, kind: SessionEventKind) {
        // no receivers is fine
        let _ = self.events.send(SessionEvent {
            resource,
            kind,
            at: Instant::now(),
        });
    }

    fn release_chain(&self, slot: &mut Slot) {
        if let Some(timer) = slot.retry_timer.take() {
            timer.cancel();
        }
        slot.chain.cancel();
        if let Some(mut engine) = slot.engine.take() {
            engine.destroy();
        }
        slot.playing = false;
        if let Some(handle) = slot.handle.as_mut() {
            if handle.cancel() {
                let id = handle.id();
                self.emit(id, SessionEventKind::State(HandleState::Cancelled));
            }
        }
    }

    fn run_attempt(
        inner: Arc<Inner>,
        id: ResourceId,
        url: String,
        attempt: u32,
        chain: CancellationToken,
    ) -> BoxFuture<'static, ()> {
        async move {
            if chain.is_cancelled() {
                return;
            }
            if attempt > 0 {
                let mut slot = inner.slot.lock();
                if chain.is_cancelled() {
                    return;
                }
                slot.retry_timer = None;
            }

            let outcome = inner.attempt_load(&url).await;

            let mut slot = inner.slot.lock();
            if chain.is_cancelled() {
                tracing::debug!(resource = %id, attempt, "Discarding stale load result");
                if let Ok((mut engine, _)) = outcome {
                    engine.destroy();
                }
                return;
            }
            let slot = &mut *slot;
            let Some(handle) = slot.handle.as_mut() else {
                return;
            };

            match outcome {
                Ok((engine, byte_len)) => {
                    let duration = engine.duration();
                    handle.mark_ready(ResourceMetadata {
                        duration: std::time::Duration::try_from_secs_f64(duration).ok(),
                        byte_len,
                    });
                    slot.engine = Some(engine);
                    tracing::info!(resource = %id, attempt, duration, byte_len, "Audio ready");
                    inner.emit(id, SessionEventKind::State(HandleState::Ready));
                }
                Err(AttemptError::Transient(error)) => {
                    let next = attempt + 1;
                    let task = Inner::run_attempt(inner.clone(), id, url.clone(), next, chain.clone());

                    match inner.policy.schedule_retry(inner.scheduler.as_ref(), attempt, task) {
                        RetryDecision::Scheduled(timer) => {
                            handle.mark_retrying(next);
                            slot.retry_timer = Some(timer);
                            tracing::warn!(
                                resource = %id,
                                attempt = next,
                                max_attempts = inner.policy.max_attempts(),
                                delay_ms = inner.policy.delay_for(attempt).as_millis() as u64,
                                error = %error,
                                "Audio load failed, retrying"
                            );
                            inner.emit(id, SessionEventKind::State(HandleState::Retrying(next)));
                        }
                        RetryDecision::Exhausted => {
                            let reason = FailureReason::Exhausted {
                                attempts: attempt + 1,
                                last_error: error,
                            };
                            tracing::error!(resource = %id, attempts = attempt + 1, error = %reason.detail(), "Audio load failed");
                            handle.mark_failed(reason.clone());
                            inner.emit(id, SessionEventKind::State(HandleState::Failed(reason)));
                        }
                    }
                }
                Err(AttemptError::Terminal(reason)) => {
                    tracing::error!(resource = %id, error = %reason.detail(), "Audio cannot be played");
                    handle.mark_failed(reason.clone());
                    inner.emit(id, SessionEventKind::State(HandleState::Failed(reason)));
                }
            }
        }
        .boxed()
    }

    // probe -> load -> build engine; also hands back the loaded size
    async fn attempt_load(
        &self,
        url: &str,
    ) -> Result<(Box<dyn PlaybackEngine>, usize), AttemptError> {
        let reachable = self
            .store
            .probe(url)
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;
        if !reachable {
            return Err(AttemptError::Transient(
                StoreError::Unreachable(url.to_string()).to_string(),
            ));
        }

        let bytes: Arc<[u8]> = self
            .store
            .load(url)
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?
            .into();
        let byte_len = bytes.len();

        // decoding can take a while for long recordings
        let engines = self.engines.clone();
        let built = tokio::task::spawn_blocking(move || engines.create(bytes)).await;

        match built {
            Ok(Ok(engine)) => Ok((engine, byte_len)),
            Ok(Err(EngineError::Unsupported(detail))) => {
                Err(AttemptError::Terminal(FailureReason::Unsupported(detail)))
            }
            Ok(Err(EngineError::Device(detail))) => {
                Err(AttemptError::Terminal(FailureReason::Initialization(detail)))
            }
            Err(join_error) => Err(AttemptError::Terminal(FailureReason::Initialization(
                join_error.to_string(),
            ))),
        }
    }
}
