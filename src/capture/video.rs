//! Fixed-rate video pump

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::PerceptionChannel;
use crate::config::VideoConfig;
use crate::media::{self, MediaChunk, RawFrame};

/// Source of raw camera frames
///
/// `latest_frame` returns `None` while no frame is available (camera
/// warming up, dimensions not yet known); the pump skips those ticks
/// silently.
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<RawFrame>;
}

/// A source with no camera behind it; every tick is skipped
///
/// Used on hosts without video hardware so the session still streams
/// audio.
pub struct NullFrameSource;

impl FrameSource for NullFrameSource {
    fn latest_frame(&self) -> Option<RawFrame> {
        None
    }
}

/// Streams JPEG-encoded frames into the channel at a fixed rate
pub struct VideoPump;

impl VideoPump {
    /// Spawn the pump task
    ///
    /// One frame is grabbed, encoded, and sent per tick. The token is
    /// observed before every tick and re-checked after the encode, so an
    /// encode in flight at cancellation finishes but its result is
    /// discarded rather than sent.
    pub fn spawn(
        source: Arc<dyn FrameSource>,
        channel: Arc<dyn PerceptionChannel>,
        config: VideoConfig,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let period = Duration::from_millis(1000 / u64::from(config.frame_rate.max(1)));
        let quality = config.jpeg_quality;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(frame) = source.latest_frame() else {
                            continue;
                        };

                        match media::encode_jpeg(&frame, quality) {
                            Ok(jpeg) => {
                                if cancel.is_cancelled() {
                                    break;
                                }
                                if let Err(e) = channel.send_media(MediaChunk::video(jpeg)).await {
                                    tracing::debug!(error = %e, "video send failed");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "frame encode failed");
                            }
                        }
                    }
                }
            }
            tracing::debug!("video pump stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::Result;
    use crate::channel::ToolAck;
    use crate::media::MediaKind;

    struct TestPattern;

    impl FrameSource for TestPattern {
        fn latest_frame(&self) -> Option<RawFrame> {
            Some(RawFrame {
                width: 8,
                height: 8,
                rgb: vec![64; 8 * 8 * 3],
            })
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        chunks: Mutex<Vec<MediaChunk>>,
    }

    #[async_trait]
    impl PerceptionChannel for RecordingChannel {
        async fn send_media(&self, chunk: MediaChunk) -> Result<()> {
            self.chunks.lock().unwrap().push(chunk);
            Ok(())
        }

        async fn send_ack(&self, _ack: ToolAck) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> VideoConfig {
        VideoConfig {
            frame_rate: 50,
            jpeg_quality: 80,
        }
    }

    #[tokio::test]
    async fn test_pump_sends_encoded_frames() {
        let channel = Arc::new(RecordingChannel::default());
        let cancel = CancellationToken::new();

        let handle = VideoPump::spawn(
            Arc::new(TestPattern),
            Arc::clone(&channel) as Arc<dyn PerceptionChannel>,
            config(),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        let chunks = channel.chunks.lock().unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.kind == MediaKind::Video));
        // JPEG SOI marker
        assert_eq!(&chunks[0].payload[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_pump_skips_when_no_frame() {
        let channel = Arc::new(RecordingChannel::default());
        let cancel = CancellationToken::new();

        let handle = VideoPump::spawn(
            Arc::new(NullFrameSource),
            Arc::clone(&channel) as Arc<dyn PerceptionChannel>,
            config(),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(channel.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_tick_after_cancel() {
        let channel = Arc::new(RecordingChannel::default());
        let cancel = CancellationToken::new();

        let handle = VideoPump::spawn(
            Arc::new(TestPattern),
            Arc::clone(&channel) as Arc<dyn PerceptionChannel>,
            config(),
            cancel.clone(),
        );

        cancel.cancel();
        handle.await.unwrap();

        let sent = channel.chunks.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(channel.chunks.lock().unwrap().len(), sent);
    }
}
