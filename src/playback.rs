//! Gapless scheduling of synthesized audio
//!
//! Chunks arrive in bursts; each is scheduled at
//! `max(next_start, now)` so playback is gapless, non-overlapping, and
//! in-order, and a late chunk after silence starts immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::media::OUTPUT_SAMPLE_RATE;
use crate::{Error, Result};

/// Monotonic playback cursor
///
/// Pure scheduling state, separate from any audio device.
#[derive(Debug, Default)]
pub struct PlaybackCursor {
    next_start: Option<Instant>,
}

impl PlaybackCursor {
    /// Reserve a slot for a chunk of the given duration
    ///
    /// Returns the start time and advances the cursor past the chunk.
    pub fn schedule(&mut self, duration: Duration, now: Instant) -> Instant {
        let start = self.next_start.map_or(now, |next| next.max(now));
        self.next_start = Some(start + duration);
        start
    }

    /// Forget the cursor position (session teardown)
    pub fn reset(&mut self) {
        self.next_start = None;
    }
}

/// Output device abstraction; the scheduler only needs `play`
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play mono f32 samples to completion
    async fn play(&self, samples: Vec<f32>) -> Result<()>;
}

/// Schedules decoded chunks onto an [`AudioSink`]
///
/// In-flight playback tasks are tracked so `stop_all` can force-stop
/// everything still active on disconnect; each task removes its own
/// handle when playback completes.
pub struct PlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    cursor: Mutex<PlaybackCursor>,
    handles: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl PlaybackScheduler {
    /// Create a scheduler bound to a session's cancellation token
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>, cancel: CancellationToken) -> Self {
        Self {
            sink,
            cursor: Mutex::new(PlaybackCursor::default()),
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            cancel,
        }
    }

    /// Queue one decoded chunk for playback
    pub fn enqueue(&self, samples: Vec<f32>) {
        if samples.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        let duration = chunk_duration(samples.len());
        let start = self
            .cursor
            .lock()
            .map(|mut cursor| cursor.schedule(duration, Instant::now()))
            .unwrap_or_else(|_| Instant::now());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sink = Arc::clone(&self.sink);
        let handles = Arc::clone(&self.handles);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(start) => {
                    if !cancel.is_cancelled() {
                        if let Err(e) = sink.play(samples).await {
                            tracing::debug!(error = %e, "playback failed");
                        }
                    }
                }
            }
            if let Ok(mut map) = handles.lock() {
                map.remove(&id);
            }
        });

        if let Ok(mut map) = self.handles.lock() {
            map.insert(id, handle);
        }
    }

    /// Force-stop every active playback and reset the cursor
    pub fn stop_all(&self) {
        if let Ok(mut map) = self.handles.lock() {
            for (_, handle) in map.drain() {
                handle.abort();
            }
        }
        if let Ok(mut cursor) = self.cursor.lock() {
            cursor.reset();
        }
    }

    /// Number of chunks still queued or playing
    #[must_use]
    pub fn active(&self) -> usize {
        self.handles.lock().map_or(0, |map| map.len())
    }
}

/// Duration of a mono chunk at the output sample rate
///
/// Nanosecond precision; millisecond rounding would let `next_start`
/// creep ahead of the true stream position over a long burst of chunks.
#[must_use]
pub fn chunk_duration(sample_count: usize) -> Duration {
    Duration::from_nanos(sample_count as u64 * 1_000_000_000 / u64::from(OUTPUT_SAMPLE_RATE))
}

/// Plays to the default output device at 24kHz
pub struct CpalSink {
    config: StreamConfig,
}

impl CpalSink {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device or config exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = OUTPUT_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    fn play_blocking(config: &StreamConfig, samples: Vec<f32>) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = config.channels as usize;
        let sample_count = samples.len();

        let shared = Arc::new(Mutex::new((samples, 0usize, false)));
        let callback_state = Arc::clone(&shared);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut state) = callback_state.lock() else {
                        return;
                    };
                    let (samples, pos, finished) = &mut *state;

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples.len() {
                            let s = samples[*pos];
                            *pos += 1;
                            s
                        } else {
                            *finished = true;
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = sample_count as u64 * 1000 / u64::from(OUTPUT_SAMPLE_RATE);
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        loop {
            let finished = shared.lock().map(|state| state.2).unwrap_or(true);
            if finished || start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(stream);
        Ok(())
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, samples: Vec<f32>) -> Result<()> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || Self::play_blocking(&config, samples))
            .await
            .map_err(|e| Error::Audio(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_to_back_chunks_are_gapless() {
        let mut cursor = PlaybackCursor::default();
        let t0 = Instant::now() + Duration::from_millis(100);
        let d1 = Duration::from_millis(250);
        let d2 = Duration::from_millis(150);

        // now is before next_start for the second chunk
        let s1 = cursor.schedule(d1, t0);
        let s2 = cursor.schedule(d2, t0);

        assert_eq!(s1, t0);
        assert_eq!(s2, t0 + d1);
    }

    #[test]
    fn test_late_chunk_starts_immediately() {
        let mut cursor = PlaybackCursor::default();
        let t0 = Instant::now();
        cursor.schedule(Duration::from_millis(100), t0);

        // Arrival well past the end of the previous chunk
        let late = t0 + Duration::from_millis(500);
        let start = cursor.schedule(Duration::from_millis(100), late);
        assert_eq!(start, late);
    }

    #[test]
    fn test_reset_forgets_cursor() {
        let mut cursor = PlaybackCursor::default();
        let t0 = Instant::now();
        cursor.schedule(Duration::from_secs(10), t0);
        cursor.reset();

        let now = Instant::now();
        let start = cursor.schedule(Duration::from_millis(10), now);
        assert_eq!(start, now);
    }

    #[test]
    fn test_chunk_duration() {
        // 24000 samples at 24kHz is one second
        assert_eq!(chunk_duration(24000), Duration::from_secs(1));
        assert_eq!(chunk_duration(12000), Duration::from_millis(500));
    }

    #[test]
    fn test_chunk_duration_keeps_sub_millisecond_precision() {
        // 36 samples at 24kHz is exactly 1.5ms
        assert_eq!(chunk_duration(36), Duration::from_micros(1500));
        // an odd sample count must not round down to whole milliseconds
        assert_eq!(chunk_duration(25), Duration::from_nanos(1_041_666));
    }
}
