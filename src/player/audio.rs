// ==========================================
// AUDIO PLAYBACK ENGINE
// ==========================================
// The native side of a playback session: decoded audio going out to the
// speakers through rodio.
//
// The session never talks to rodio directly. It asks an EngineFactory for a
// Box<dyn PlaybackEngine> built from the loaded bytes, drives it with
// play/pause/seek, and destroys it on teardown. Tests plug in their own
// factory, so nothing here needs a sound card to be exercised.
//
// Rodio's Sink has no seek in this version, so seeking re-decodes the cached
// bytes and skips ahead. Position is tracked by a wall clock that stops while
// paused.

use rodio::{Decoder, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::EngineError;

pub trait PlaybackEngine: Send {
    fn play(&mut self);
    fn pause(&mut self);
    /// Jumps to `seconds`; callers clamp to `[0, duration]`.
    fn seek_to(&mut self, seconds: f64);
    /// Seconds since the start of the recording.
    fn position(&self) -> f64;
    /// Total length in seconds, 0.0 when unknown.
    fn duration(&self) -> f64;
    fn is_finished(&self) -> bool;
    /// 0 (mute) to 100 (max)
    fn set_volume(&mut self, volume: u32);
    /// Stops output and releases the device. Safe to call twice.
    fn destroy(&mut self);
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, bytes: Arc<[u8]>) -> Result<Box<dyn PlaybackEngine>, EngineError>;
}

// ==========================================
// PLAYBACK CLOCK
// ==========================================
// offset:  position when the clock last stopped or was moved
// started: when playback resumed from offset (None while paused)
//
// position = offset + (now - started), capped at the duration
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    offset: f64,
    started: Option<Instant>,
}

impl PlaybackClock {
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn position_at(&self, now: Instant, duration: f64) -> f64 {
        let elapsed = self
            .started
            .map(|s| now.saturating_duration_since(s).as_secs_f64())
            .unwrap_or(0.0);
        let position = self.offset + elapsed;
        if duration > 0.0 {
            position.min(duration)
        } else {
            position
        }
    }

    pub fn start(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
        }
    }

    pub fn stop(&mut self, now: Instant, duration: f64) {
        self.offset = self.position_at(now, duration);
        self.started = None;
    }

    pub fn jump(&mut self, seconds: f64, now: Instant) {
        self.offset = seconds.max(0.0);
        if self.started.is_some() {
            self.started = Some(now);
        }
    }
}

// ==========================================
// RODIO ENGINE FACTORY
// ==========================================
// Holds the handle of an OutputStream that the binary keeps alive on its
// main thread. Every engine gets a fresh Sink on that stream.
pub struct RodioEngineFactory {
    handle: OutputStreamHandle,
}

impl RodioEngineFactory {
    pub fn new(handle: OutputStreamHandle) -> Self {
        RodioEngineFactory { handle }
    }
}

impl EngineFactory for RodioEngineFactory {
    fn create(&self, bytes: Arc<[u8]>) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        let duration = measure_duration(&bytes)?;

        let sink = Sink::try_new(&self.handle)
            .map_err(|e| EngineError::Device(e.to_string()))?;

        // Loaded paused; the session decides when to start
        sink.pause();
        sink.append(decode(&bytes)?);

        tracing::debug!(duration, size = bytes.len(), "Audio engine ready");

        Ok(Box::new(RodioEngine {
            sink: Some(sink),
            bytes,
            duration,
            volume: 100,
            clock: PlaybackClock::default(),
        }))
    }
}

fn decode(bytes: &Arc<[u8]>) -> Result<Decoder<Cursor<Arc<[u8]>>>, EngineError> {
    Decoder::new(Cursor::new(bytes.clone())).map_err(|e| {
        EngineError::Unsupported(format!(
            "Audio decode failed: {}. File may be corrupted or invalid format.",
            e
        ))
    })
}

// Uses the container's length when it has one, otherwise counts samples.
fn measure_duration(bytes: &Arc<[u8]>) -> Result<f64, EngineError> {
    let decoder = decode(bytes)?;
    if let Some(total) = decoder.total_duration() {
        return Ok(total.as_secs_f64());
    }

    let channels = decoder.channels().max(1) as u64;
    let sample_rate = decoder.sample_rate().max(1) as u64;
    let samples = decoder.count() as u64;
    Ok(samples as f64 / (channels * sample_rate) as f64)
}

// ==========================================
// RODIO ENGINE
// ==========================================
pub struct RodioEngine {
    sink: Option<Sink>,
    bytes: Arc<[u8]>,
    duration: f64,
    volume: u32,
    clock: PlaybackClock,
}

impl PlaybackEngine for RodioEngine {
    fn play(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
            self.clock.start(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
        self.clock.stop(Instant::now(), self.duration);
    }

    // Reload the track and skip to the target position
    fn seek_to(&mut self, seconds: f64) {
        let Some(sink) = &self.sink else {
            return;
        };

        let decoder = match decode(&self.bytes) {
            Ok(decoder) => decoder,
            Err(e) => {
                tracing::warn!(error = %e, "Seek failed to re-decode audio");
                return;
            }
        };

        let was_playing = self.clock.is_running();
        sink.stop();
        if !was_playing {
            sink.pause();
        }
        sink.append(decoder.skip_duration(Duration::from_secs_f64(seconds.max(0.0))));
        if was_playing {
            sink.play();
        }

        self.clock.jump(seconds, Instant::now());
    }

    fn position(&self) -> f64 {
        self.clock.position_at(Instant::now(), self.duration)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    // Sink drained while the clock was running
    fn is_finished(&self) -> bool {
        match &self.sink {
            Some(sink) => sink.empty() && self.clock.is_running(),
            None => false,
        }
    }

    fn set_volume(&mut self, volume: u32) {
        self.volume = volume.min(100);
        if let Some(sink) = &self.sink {
            sink.set_volume(self.volume as f32 / 100.0);
        }
    }

    fn destroy(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.clock.stop(Instant::now(), self.duration);
    }
}

impl Drop for RodioEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_stands_still_until_started() {
        let clock = PlaybackClock::default();
        let now = Instant::now();
        assert_eq!(clock.position_at(now + Duration::from_secs(5), 10.0), 0.0);
        assert!(!clock.is_running());
    }

    #[test]
    fn clock_counts_only_running_time() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::default();

        clock.start(t0);
        clock.stop(t0 + Duration::from_secs(3), 60.0);
        // paused for 10s
        clock.start(t0 + Duration::from_secs(13));

        let pos = clock.position_at(t0 + Duration::from_secs(15), 60.0);
        assert!((pos - 5.0).abs() < 1e-9);
    }

    #[test]
    fn clock_jump_keeps_running_state() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::default();
        clock.start(t0);
        clock.jump(30.0, t0 + Duration::from_secs(2));

        let pos = clock.position_at(t0 + Duration::from_secs(4), 60.0);
        assert!((pos - 32.0).abs() < 1e-9);
        assert!(clock.is_running());
    }

    #[test]
    fn clock_caps_at_duration() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::default();
        clock.jump(8.0, t0);
        clock.start(t0);
        assert_eq!(clock.position_at(t0 + Duration::from_secs(5), 10.0), 10.0);
    }

    #[test]
    fn garbage_bytes_are_unsupported() {
        let bytes: Arc<[u8]> = Arc::from(&b"definitely not audio"[..]);
        assert!(matches!(
            measure_duration(&bytes),
            Err(EngineError::Unsupported(_))
        ));
    }
}
