//! Microphone pump
//!
//! Each hardware buffer callback encodes the available sample block and
//! queues it; a forwarding task pushes queued chunks into the channel.
//! Back-pressure is implicit: one send per callback, and the bounded
//! queue drops blocks if the channel ever stalls.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::PerceptionChannel;
use crate::media::{self, INPUT_SAMPLE_RATE, MediaChunk};
use crate::{Error, Result};

/// Queue depth between the hardware callback and the forwarding task
const QUEUE_DEPTH: usize = 32;

/// Streams encoded microphone audio into the perception channel
pub struct AudioPump {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl AudioPump {
    /// Acquire the default input device at 16kHz mono
    ///
    /// # Errors
    ///
    /// Returns `Error::MediaAccess` if no device or suitable config exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::MediaAccess("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::MediaAccess(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
            })
            .ok_or_else(|| Error::MediaAccess("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(INPUT_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = INPUT_SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    /// Start pumping audio into the channel
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn start(
        &mut self,
        channel: Arc<dyn PerceptionChannel>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<MediaChunk>(QUEUE_DEPTH);

        // Hardware callback: encode and queue. The token is checked here
        // so no block encoded after cancellation is ever queued.
        let callback_cancel = cancel.clone();
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if callback_cancel.is_cancelled() {
                        return;
                    }
                    let chunk = MediaChunk::audio(media::encode_pcm(data));
                    if tx.try_send(chunk).is_err() {
                        tracing::trace!("audio queue full, dropping block");
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::MediaAccess(e.to_string()))?;

        stream.play().map_err(|e| Error::MediaAccess(e.to_string()))?;
        self.stream = Some(stream);

        // Forwarding task: drain the queue into the channel, discarding
        // anything still queued once the token fires
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    chunk = rx.recv() => {
                        let Some(chunk) = chunk else { break };
                        if cancel.is_cancelled() {
                            break;
                        }
                        if let Err(e) = channel.send_media(chunk).await {
                            tracing::debug!(error = %e, "audio send failed");
                        }
                    }
                }
            }
            tracing::debug!("audio pump stopped");
        });

        tracing::debug!("audio pump started");
        Ok(())
    }

    /// Stop capturing; releases the hardware stream
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Whether the pump is running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}
