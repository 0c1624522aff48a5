//! Inbound event handling and display state
//!
//! The processor sits between the perception channel's event stream and
//! the rest of the gateway. Tool-call batches run through the violation
//! engine, audio chunks go to the playback scheduler, and the shared
//! [`UiState`] feeds anything watching the session (CLI output today).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::FrameSource;
use crate::channel::{PerceptionChannel, REPORT_VIOLATION, ToolAck, ToolCallEnvelope};
use crate::db::ViolationRecord;
use crate::engine::ViolationEngine;
use crate::media;
use crate::playback::PlaybackScheduler;
use crate::upload::{EvidenceFrame, EvidenceUpload};

/// How long "analyzing" stays on after a batch finishes
const ANALYZING_HOLD: Duration = Duration::from_millis(500);

/// How long a published violation stays on display
const VIOLATION_DISPLAY: Duration = Duration::from_secs(4);

/// Observable display state
///
/// Watch channels rather than fields, so consumers see transitions as
/// they happen and late subscribers get the current value.
pub struct UiState {
    analyzing: watch::Sender<bool>,
    current: watch::Sender<Option<ViolationRecord>>,
}

impl UiState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            analyzing: watch::Sender::new(false),
            current: watch::Sender::new(None),
        }
    }

    pub fn set_analyzing(&self, on: bool) {
        self.analyzing.send_replace(on);
    }

    /// Show a freshly persisted violation
    pub fn publish(&self, record: ViolationRecord) {
        self.current.send_replace(Some(record));
    }

    pub fn clear_current(&self) {
        self.current.send_replace(None);
    }

    /// Back to the idle state; used on session teardown
    pub fn reset(&self) {
        self.analyzing.send_replace(false);
        self.current.send_replace(None);
    }

    #[must_use]
    pub fn is_analyzing(&self) -> bool {
        *self.analyzing.borrow()
    }

    #[must_use]
    pub fn current(&self) -> Option<ViolationRecord> {
        self.current.borrow().clone()
    }

    #[must_use]
    pub fn watch_analyzing(&self) -> watch::Receiver<bool> {
        self.analyzing.subscribe()
    }

    #[must_use]
    pub fn watch_current(&self) -> watch::Receiver<Option<ViolationRecord>> {
        self.current.subscribe()
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes decoded channel events to the engine and the speaker
pub struct EventProcessor {
    engine: Arc<ViolationEngine>,
    channel: Arc<dyn PerceptionChannel>,
    frames: Arc<dyn FrameSource>,
    uploader: Arc<dyn EvidenceUpload>,
    playback: Arc<PlaybackScheduler>,
    ui: Arc<UiState>,
    jpeg_quality: u8,
    clear_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventProcessor {
    #[must_use]
    pub fn new(
        engine: Arc<ViolationEngine>,
        channel: Arc<dyn PerceptionChannel>,
        frames: Arc<dyn FrameSource>,
        uploader: Arc<dyn EvidenceUpload>,
        playback: Arc<PlaybackScheduler>,
        ui: Arc<UiState>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            engine,
            channel,
            frames,
            uploader,
            playback,
            ui,
            jpeg_quality,
            clear_task: Mutex::new(None),
        }
    }

    /// Process one tool-call batch
    ///
    /// Evidence is captured once for the whole batch and uploaded at
    /// most once, however many candidates it carries. Every call gets
    /// an acknowledgement whatever became of its candidate; the service
    /// stalls the conversation waiting for unacknowledged calls.
    pub async fn handle_tool_calls(&self, batch: Vec<ToolCallEnvelope>) {
        tracing::debug!(calls = batch.len(), "tool-call batch received");
        let evidence = EvidenceFrame::new(self.capture_evidence(), Arc::clone(&self.uploader));

        for envelope in batch {
            if envelope.name == REPORT_VIOLATION {
                match envelope.candidate() {
                    Ok(candidate) => {
                        let outcome = self.engine.process(&candidate, &evidence).await;
                        tracing::debug!(plate = %candidate.plate, ?outcome, "candidate processed");
                    }
                    Err(e) => {
                        tracing::warn!(id = %envelope.id, error = %e, "unparseable tool-call arguments");
                    }
                }
            } else {
                tracing::warn!(name = %envelope.name, "unexpected tool call");
            }

            let ack = ToolAck {
                id: envelope.id,
                name: envelope.name,
            };
            if let Err(e) = self.channel.send_ack(ack).await {
                tracing::warn!(error = %e, "failed to acknowledge tool call");
            }
        }

        self.schedule_clear();
    }

    /// Queue a synthesized audio chunk for gapless playback
    pub fn handle_audio(&self, payload: &[u8]) {
        let samples = media::decode_pcm(payload);
        if samples.is_empty() {
            return;
        }
        self.playback.enqueue(samples);
    }

    /// Cancel display timers and blank the display
    pub fn stop(&self) {
        if let Ok(mut task) = self.clear_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        self.ui.reset();
    }

    fn capture_evidence(&self) -> Option<Vec<u8>> {
        let frame = self.frames.latest_frame()?;
        match media::encode_jpeg(&frame, self.jpeg_quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::warn!(error = %e, "evidence frame encoding failed");
                None
            }
        }
    }

    // A new batch supersedes the previous batch's timers, so a steady
    // stream of violations keeps the display live instead of blinking.
    fn schedule_clear(&self) {
        let ui = Arc::clone(&self.ui);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ANALYZING_HOLD).await;
            ui.set_analyzing(false);
            tokio::time::sleep(VIOLATION_DISPLAY).await;
            ui.clear_current();
        });

        if let Ok(mut task) = self.clear_task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::channel::ViolationCandidate;
    use crate::db::{ViolationRepo, init_memory};
    use crate::dedup::DedupCache;
    use crate::fines::FineSchedule;
    use crate::media::MediaChunk;
    use crate::notify::Notify;
    use crate::playback::AudioSink;
    use crate::Result;

    const WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

    #[derive(Default)]
    struct RecordingChannel {
        acks: Mutex<Vec<ToolAck>>,
    }

    #[async_trait]
    impl PerceptionChannel for RecordingChannel {
        async fn send_media(&self, _chunk: MediaChunk) -> Result<()> {
            Ok(())
        }

        async fn send_ack(&self, ack: ToolAck) -> Result<()> {
            self.acks.lock().unwrap().push(ack);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingUploader(AtomicUsize);

    #[async_trait]
    impl EvidenceUpload for CountingUploader {
        async fn upload(&self, _jpeg: &[u8]) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            "https://example.test/evidence.jpg".to_string()
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl Notify for SilentNotifier {
        async fn notify(&self, _record: &ViolationRecord) -> Result<()> {
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn play(&self, _samples: Vec<f32>) -> Result<()> {
            Ok(())
        }
    }

    struct TestPattern;

    impl FrameSource for TestPattern {
        fn latest_frame(&self) -> Option<crate::media::RawFrame> {
            Some(crate::media::RawFrame {
                width: 4,
                height: 4,
                rgb: vec![128; 4 * 4 * 3],
            })
        }
    }

    struct Fixture {
        processor: EventProcessor,
        channel: Arc<RecordingChannel>,
        uploader: Arc<CountingUploader>,
        repo: ViolationRepo,
        ui: Arc<UiState>,
    }

    fn fixture() -> Fixture {
        let channel = Arc::new(RecordingChannel::default());
        let uploader = Arc::new(CountingUploader::default());
        let ui = Arc::new(UiState::new());
        let repo = ViolationRepo::new(init_memory().unwrap(), WINDOW);
        let engine = Arc::new(ViolationEngine::new(
            DedupCache::new(WINDOW),
            FineSchedule::default(),
            repo.clone(),
            Arc::new(SilentNotifier),
            Arc::clone(&ui),
        ));
        let playback = Arc::new(PlaybackScheduler::new(
            Arc::new(NullSink),
            CancellationToken::new(),
        ));
        let processor = EventProcessor::new(
            engine,
            channel.clone() as Arc<dyn PerceptionChannel>,
            Arc::new(TestPattern),
            uploader.clone() as Arc<dyn EvidenceUpload>,
            playback,
            Arc::clone(&ui),
            80,
        );
        Fixture {
            processor,
            channel,
            uploader,
            repo,
            ui,
        }
    }

    fn call(id: &str, args: serde_json::Value) -> ToolCallEnvelope {
        ToolCallEnvelope {
            id: id.to_string(),
            name: REPORT_VIOLATION.to_string(),
            args,
        }
    }

    fn violation(plate: &str, types: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "violation_detected": true,
            "violation_type": types,
            "vehicle_number": plate,
            "vehicle_type": "bike",
        })
    }

    #[tokio::test]
    async fn test_batch_persists_and_acks_every_call() {
        let fx = fixture();

        fx.processor
            .handle_tool_calls(vec![
                call("c1", violation("MH12KN4567", &["triple_riding"])),
                call("c2", violation("KA65JK5678", &["wrong_side"])),
            ])
            .await;

        assert_eq!(fx.repo.list_all().unwrap().len(), 2);
        let acks = fx.channel.acks.lock().unwrap();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].id, "c1");
        assert_eq!(acks[1].id, "c2");
    }

    #[tokio::test]
    async fn test_evidence_uploaded_once_per_batch() {
        let fx = fixture();

        fx.processor
            .handle_tool_calls(vec![
                call("c1", violation("MH12KN4567", &["triple_riding"])),
                call("c2", violation("KA65JK5678", &["wrong_side"])),
                call("c3", violation("OD02BK1234", &["signal_jump"])),
            ])
            .await;

        assert_eq!(fx.uploader.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_batch_skips_upload_entirely() {
        let fx = fixture();

        fx.processor
            .handle_tool_calls(vec![call("c1", violation("MH12KN4567", &["triple_riding"]))])
            .await;
        fx.processor
            .handle_tool_calls(vec![call("c2", violation("MH12KN4567", &["triple_riding"]))])
            .await;

        // Second batch is all duplicates; no frame leaves the gateway
        assert_eq!(fx.uploader.0.load(Ordering::SeqCst), 1);
        assert_eq!(fx.channel.acks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_candidate_still_acked() {
        let fx = fixture();

        fx.processor
            .handle_tool_calls(vec![call(
                "c1",
                serde_json::json!({
                    "violation_detected": true,
                    "violation_type": [],
                    "vehicle_number": "MH12KN4567",
                }),
            )])
            .await;

        assert_eq!(fx.repo.list_all().unwrap().len(), 0);
        assert_eq!(fx.channel.acks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_arguments_still_acked() {
        let fx = fixture();

        fx.processor
            .handle_tool_calls(vec![call(
                "c1",
                serde_json::json!({ "violation_detected": "definitely" }),
            )])
            .await;

        assert_eq!(fx.repo.list_all().unwrap().len(), 0);
        assert_eq!(fx.channel.acks.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_clears_after_timers() {
        let fx = fixture();

        fx.processor
            .handle_tool_calls(vec![call("c1", violation("MH12KN4567", &["triple_riding"]))])
            .await;

        assert!(fx.ui.is_analyzing());
        assert!(fx.ui.current().is_some());

        tokio::time::sleep(ANALYZING_HOLD + Duration::from_millis(10)).await;
        assert!(!fx.ui.is_analyzing());
        assert!(fx.ui.current().is_some());

        tokio::time::sleep(VIOLATION_DISPLAY + Duration::from_millis(10)).await;
        assert!(fx.ui.current().is_none());
    }

    #[tokio::test]
    async fn test_stop_blanks_display() {
        let fx = fixture();

        fx.processor
            .handle_tool_calls(vec![call("c1", violation("MH12KN4567", &["triple_riding"]))])
            .await;
        fx.processor.stop();

        assert!(!fx.ui.is_analyzing());
        assert!(fx.ui.current().is_none());
    }

    #[test]
    fn test_ui_state_watch_sees_transitions() {
        let ui = UiState::new();
        let mut rx = ui.watch_analyzing();

        ui.set_analyzing(true);
        assert!(*rx.borrow_and_update());

        ui.reset();
        assert!(!*rx.borrow_and_update());
    }
}
