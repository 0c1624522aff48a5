//! Session lifecycle
//!
//! The controller owns everything with a lifetime tied to one live
//! connection: the capture pumps, the perception channel, the playback
//! scheduler, and the event loop. It is driven from the main task
//! because the microphone stream handle is not `Send`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{AudioPump, FrameSource, VideoPump};
use crate::channel::{ChannelEvent, NORMAL_CLOSE_CODE, PerceptionChannel, connect_live};
use crate::config::Config;
use crate::db::ViolationRepo;
use crate::dedup::DedupCache;
use crate::engine::ViolationEngine;
use crate::events::{EventProcessor, UiState};
use crate::notify::Notify;
use crate::playback::{AudioSink, PlaybackScheduler};
use crate::upload::EvidenceUpload;
use crate::{Error, Result};

/// Where the session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// A failure was surfaced; reconnecting requires another `connect`
    Error,
}

struct ActiveSession {
    cancel: CancellationToken,
    channel: Arc<dyn PerceptionChannel>,
    audio: Option<AudioPump>,
    playback: Arc<PlaybackScheduler>,
    processor: Arc<EventProcessor>,
    video_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
}

/// Orchestrates connect, steady-state streaming, and teardown
pub struct SessionController {
    config: Config,
    frames: Arc<dyn FrameSource>,
    sink: Arc<dyn AudioSink>,
    store: ViolationRepo,
    uploader: Arc<dyn EvidenceUpload>,
    notifier: Arc<dyn Notify>,
    ui: Arc<UiState>,
    state: watch::Sender<SessionState>,
    error: watch::Sender<Option<String>>,
    active: Option<ActiveSession>,
    generation: u64,
}

impl SessionController {
    #[must_use]
    pub fn new(
        config: Config,
        frames: Arc<dyn FrameSource>,
        sink: Arc<dyn AudioSink>,
        store: ViolationRepo,
        uploader: Arc<dyn EvidenceUpload>,
        notifier: Arc<dyn Notify>,
    ) -> Self {
        Self {
            config,
            frames,
            sink,
            store,
            uploader,
            notifier,
            ui: Arc::new(UiState::new()),
            state: watch::Sender::new(SessionState::Disconnected),
            error: watch::Sender::new(None),
            active: None,
            generation: 0,
        }
    }

    /// Open a live session
    ///
    /// A no-op while a session is connecting or connected. On failure
    /// the state moves to `Error` with a message, partial setup is torn
    /// down, and the caller may simply call `connect` again. Failures
    /// surface in order: missing credentials, then microphone access,
    /// then the remote handshake.
    ///
    /// # Errors
    ///
    /// Returns error if credentials are missing, the microphone cannot
    /// be acquired, or the handshake fails or times out
    pub async fn connect(&mut self) -> Result<()> {
        if matches!(
            self.state(),
            SessionState::Connecting | SessionState::Connected
        ) {
            tracing::debug!("connect ignored, session already active");
            return Ok(());
        }

        self.teardown().await;

        match self.try_connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "session connect failed");
                self.teardown().await;
                self.set_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn try_connect(&mut self) -> Result<()> {
        if self.config.api_key.is_none() {
            return Err(Error::Config(
                "api key is not set; export SENTINEL_API_KEY or add it to the config file".to_string(),
            ));
        }

        self.state.send_replace(SessionState::Connecting);

        let audio = AudioPump::new()?;
        let (channel, events) = connect_live(&self.config).await?;

        self.install(Arc::new(channel), events, Some(audio))
    }

    /// Open a session over an already-established channel
    ///
    /// The seam for alternate transports; skips credential and
    /// microphone acquisition. Same no-op guard as `connect`.
    ///
    /// # Errors
    ///
    /// Returns error if the capture pumps cannot start
    pub async fn connect_with(
        &mut self,
        channel: Arc<dyn PerceptionChannel>,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> Result<()> {
        if matches!(
            self.state(),
            SessionState::Connecting | SessionState::Connected
        ) {
            tracing::debug!("connect ignored, session already active");
            return Ok(());
        }

        self.teardown().await;
        self.state.send_replace(SessionState::Connecting);
        self.install(channel, events, None)
    }

    fn install(
        &mut self,
        channel: Arc<dyn PerceptionChannel>,
        events: mpsc::Receiver<ChannelEvent>,
        mut audio: Option<AudioPump>,
    ) -> Result<()> {
        self.generation += 1;
        let cancel = CancellationToken::new();

        let playback = Arc::new(PlaybackScheduler::new(
            Arc::clone(&self.sink),
            cancel.child_token(),
        ));
        let engine = Arc::new(ViolationEngine::new(
            DedupCache::new(self.config.dedup_window),
            self.config.fines.clone(),
            self.store.clone(),
            Arc::clone(&self.notifier),
            Arc::clone(&self.ui),
        ));
        let processor = Arc::new(EventProcessor::new(
            engine,
            Arc::clone(&channel),
            Arc::clone(&self.frames),
            Arc::clone(&self.uploader),
            Arc::clone(&playback),
            Arc::clone(&self.ui),
            self.config.video.jpeg_quality,
        ));

        if let Some(pump) = audio.as_mut() {
            pump.start(Arc::clone(&channel), cancel.clone())?;
        }

        let video_task = VideoPump::spawn(
            Arc::clone(&self.frames),
            Arc::clone(&channel),
            self.config.video.clone(),
            cancel.clone(),
        );

        let event_task = self.spawn_event_loop(
            events,
            Arc::clone(&processor),
            Arc::clone(&channel),
            Arc::clone(&playback),
            cancel.clone(),
        );

        self.active = Some(ActiveSession {
            cancel,
            channel,
            audio,
            playback,
            processor,
            video_task,
            event_task,
        });

        self.error.send_replace(None);
        self.state.send_replace(SessionState::Connected);
        tracing::info!(generation = self.generation, "session connected");
        Ok(())
    }

    // Inbound loop. An error event wins over any close that follows it
    // in the same generation; the flag keeps a trailing close frame from
    // downgrading an already-reported error.
    //
    // Whatever ends the loop, the task releases everything it can reach
    // before exiting: playback, display timers, and the channel itself.
    // The microphone handle is not `Send` and stays with the controller;
    // its capture callbacks go quiet once the token fires, and the
    // hardware is freed by the next `disconnect` or `connect`.
    fn spawn_event_loop(
        &self,
        mut events: mpsc::Receiver<ChannelEvent>,
        processor: Arc<EventProcessor>,
        channel: Arc<dyn PerceptionChannel>,
        playback: Arc<PlaybackScheduler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let error = self.error.clone();
        let error_fired = Arc::new(AtomicBool::new(false));
        let generation = self.generation;

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                match event {
                    ChannelEvent::ToolCalls(batch) => processor.handle_tool_calls(batch).await,
                    ChannelEvent::Audio(payload) => processor.handle_audio(&payload),
                    ChannelEvent::Error { detail } => {
                        error_fired.store(true, Ordering::SeqCst);
                        tracing::error!(generation, detail = %detail, "channel error");
                        error.send_replace(Some(format!("connection error: {detail}")));
                        state.send_replace(SessionState::Error);
                        break;
                    }
                    ChannelEvent::Closed { code } => {
                        if error_fired.load(Ordering::SeqCst) {
                            break;
                        }
                        if code == NORMAL_CLOSE_CODE {
                            tracing::info!(generation, "channel closed");
                            state.send_replace(SessionState::Disconnected);
                        } else {
                            tracing::warn!(generation, code, "channel closed abnormally");
                            error.send_replace(Some(format!(
                                "connection closed abnormally (code {code})"
                            )));
                            state.send_replace(SessionState::Error);
                        }
                        break;
                    }
                }
            }

            cancel.cancel();
            playback.stop_all();
            processor.stop();
            if let Err(e) = channel.close().await {
                tracing::debug!(error = %e, "channel close after stream end");
            }
            tracing::debug!(generation, "event loop finished");
        })
    }

    /// Tear the session down; safe to call in any state, any number of
    /// times
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.error.send_replace(None);
        self.state.send_replace(SessionState::Disconnected);
        tracing::info!("session disconnected");
    }

    async fn teardown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.cancel.cancel();
        if let Some(pump) = active.audio.as_mut() {
            pump.stop();
        }
        active.playback.stop_all();
        active.processor.stop();
        if let Err(e) = active.channel.close().await {
            tracing::debug!(error = %e, "channel close during teardown");
        }
        active.video_task.abort();
        active.event_task.abort();
    }

    fn set_error(&self, message: String) {
        self.error.send_replace(Some(message));
        self.state.send_replace(SessionState::Error);
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Last surfaced failure, if the session is in `Error`
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    /// Display state shared across session generations
    #[must_use]
    pub fn ui(&self) -> &Arc<UiState> {
        &self.ui
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::capture::NullFrameSource;
    use crate::channel::ToolAck;
    use crate::db::{ViolationRecord, init_memory};
    use crate::media::MediaChunk;
    use crate::upload::EvidenceUpload;

    #[derive(Default)]
    struct MockChannel {
        closed: Mutex<bool>,
    }

    #[async_trait]
    impl PerceptionChannel for MockChannel {
        async fn send_media(&self, _chunk: MediaChunk) -> crate::Result<()> {
            Ok(())
        }

        async fn send_ack(&self, _ack: ToolAck) -> crate::Result<()> {
            Ok(())
        }

        async fn close(&self) -> crate::Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn play(&self, _samples: Vec<f32>) -> crate::Result<()> {
            Ok(())
        }
    }

    struct NullUploader;

    #[async_trait]
    impl EvidenceUpload for NullUploader {
        async fn upload(&self, _jpeg: &[u8]) -> String {
            "https://example.test/evidence.jpg".to_string()
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl crate::notify::Notify for NullNotifier {
        async fn notify(&self, _record: &ViolationRecord) -> crate::Result<()> {
            Ok(())
        }
    }

    fn controller() -> SessionController {
        let config = Config {
            api_key: Some("test-key".to_string()),
            ..Config::default()
        };
        SessionController::new(
            config,
            Arc::new(NullFrameSource),
            Arc::new(NullSink),
            ViolationRepo::new(init_memory().unwrap(), Duration::from_secs(7200)),
            Arc::new(NullUploader),
            Arc::new(NullNotifier),
        )
    }

    #[tokio::test]
    async fn test_connect_with_reaches_connected() {
        let mut ctl = controller();
        assert_eq!(ctl.state(), SessionState::Disconnected);

        let (_tx, rx) = mpsc::channel(8);
        ctl.connect_with(Arc::new(MockChannel::default()), rx)
            .await
            .unwrap();
        assert_eq!(ctl.state(), SessionState::Connected);

        ctl.disconnect().await;
        assert_eq!(ctl.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_noop_while_connected() {
        let mut ctl = controller();
        let (_tx, rx) = mpsc::channel(8);
        ctl.connect_with(Arc::new(MockChannel::default()), rx)
            .await
            .unwrap();

        // Second connect must not tear down the live session
        ctl.connect().await.unwrap();
        assert_eq!(ctl.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_abnormal_close_surfaces_error() {
        let mut ctl = controller();
        let (tx, rx) = mpsc::channel(8);
        ctl.connect_with(Arc::new(MockChannel::default()), rx)
            .await
            .unwrap();

        tx.send(ChannelEvent::Closed { code: 1011 }).await.unwrap();
        let mut state = ctl.watch_state();
        state.wait_for(|s| *s == SessionState::Error).await.unwrap();
        assert!(ctl.error_message().unwrap().contains("1011"));
    }

    #[tokio::test]
    async fn test_normal_close_is_not_an_error() {
        let mut ctl = controller();
        let (tx, rx) = mpsc::channel(8);
        ctl.connect_with(Arc::new(MockChannel::default()), rx)
            .await
            .unwrap();

        tx.send(ChannelEvent::Closed {
            code: NORMAL_CLOSE_CODE,
        })
        .await
        .unwrap();
        let mut state = ctl.watch_state();
        state
            .wait_for(|s| *s == SessionState::Disconnected)
            .await
            .unwrap();
        assert!(ctl.error_message().is_none());
    }

    #[tokio::test]
    async fn test_error_wins_over_subsequent_close() {
        let mut ctl = controller();
        let (tx, rx) = mpsc::channel(8);
        ctl.connect_with(Arc::new(MockChannel::default()), rx)
            .await
            .unwrap();

        tx.send(ChannelEvent::Error {
            detail: "stream reset".to_string(),
        })
        .await
        .unwrap();
        let _ = tx.send(ChannelEvent::Closed { code: 1000 }).await;

        let mut state = ctl.watch_state();
        state.wait_for(|s| *s == SessionState::Error).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ctl.state(), SessionState::Error);
        assert!(ctl.error_message().unwrap().contains("stream reset"));
    }

    #[tokio::test]
    async fn test_fatal_error_releases_channel_without_disconnect() {
        let mut ctl = controller();
        let channel = Arc::new(MockChannel::default());
        let (tx, rx) = mpsc::channel(8);
        ctl.connect_with(channel.clone(), rx).await.unwrap();

        tx.send(ChannelEvent::Error {
            detail: "stream reset".to_string(),
        })
        .await
        .unwrap();

        let mut state = ctl.watch_state();
        state.wait_for(|s| *s == SessionState::Error).await.unwrap();

        // The event loop closes the channel on its own; no disconnect
        for _ in 0..100 {
            if *channel.closed.lock().unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(*channel.closed.lock().unwrap());
        assert!(!ctl.ui().is_analyzing());
        assert!(ctl.ui().current().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_closes_channel_and_is_idempotent() {
        let mut ctl = controller();
        let channel = Arc::new(MockChannel::default());
        let (_tx, rx) = mpsc::channel(8);
        ctl.connect_with(channel.clone(), rx).await.unwrap();

        ctl.disconnect().await;
        assert!(*channel.closed.lock().unwrap());

        ctl.disconnect().await;
        assert_eq!(ctl.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_after_error_allowed() {
        let mut ctl = controller();
        let (tx, rx) = mpsc::channel(8);
        ctl.connect_with(Arc::new(MockChannel::default()), rx)
            .await
            .unwrap();

        tx.send(ChannelEvent::Closed { code: 1006 }).await.unwrap();
        let mut state = ctl.watch_state();
        state.wait_for(|s| *s == SessionState::Error).await.unwrap();

        let (_tx2, rx2) = mpsc::channel(8);
        ctl.connect_with(Arc::new(MockChannel::default()), rx2)
            .await
            .unwrap();
        assert_eq!(ctl.state(), SessionState::Connected);
        assert!(ctl.error_message().is_none());
    }
}
