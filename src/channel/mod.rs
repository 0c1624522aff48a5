//! The bidirectional perception channel
//!
//! The remote service is opaque: it accepts media chunks and emits
//! either tool-call batches or synthesized audio. Implementations of
//! [`PerceptionChannel`] own the transport; the session controller only
//! sees this trait and the inbound [`ChannelEvent`] stream.

pub mod live;

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;
use crate::media::MediaChunk;

pub use live::{LiveChannel, connect_live};

/// WebSocket close code for a normal shutdown
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Tool name under which the service reports violations
pub const REPORT_VIOLATION: &str = "report_violation";

/// An inbound message from the perception service
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// One batch of tool calls; processed as a unit
    ToolCalls(Vec<ToolCallEnvelope>),
    /// One chunk of synthesized speech (16-bit LE PCM at 24kHz)
    Audio(Vec<u8>),
    /// Stream closed; `code != 1000` is abnormal
    Closed { code: u16 },
    /// Transport or protocol failure
    Error { detail: String },
}

/// One tool call as received, before interpretation
#[derive(Debug, Clone)]
pub struct ToolCallEnvelope {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolCallEnvelope {
    /// Parse the arguments as a violation candidate
    ///
    /// # Errors
    ///
    /// Returns error if the arguments do not match the expected shape
    pub fn candidate(&self) -> Result<ViolationCandidate> {
        Ok(serde_json::from_value(self.args.clone())?)
    }
}

/// A candidate violation observation reported by the service
#[derive(Debug, Clone, Deserialize)]
pub struct ViolationCandidate {
    /// Whether the service believes a violation occurred
    #[serde(rename = "violation_detected")]
    pub detected: bool,

    /// Crime types observed; empty with `detected = true` is malformed
    #[serde(rename = "violation_type", default)]
    pub crime_types: Vec<String>,

    /// Plate text as read, possibly "UNKNOWN"
    #[serde(rename = "vehicle_number", default)]
    pub plate: String,

    /// Vehicle class (bike, car, truck, ...)
    #[serde(rename = "vehicle_type", default = "default_vehicle_class")]
    pub vehicle_class: String,
}

fn default_vehicle_class() -> String {
    "unknown".to_string()
}

/// Acknowledgement for a tool call; always sent, whatever the outcome
#[derive(Debug, Clone)]
pub struct ToolAck {
    pub id: String,
    pub name: String,
}

/// The outbound half of the perception channel
///
/// Handles are shared by both capture pumps and the session controller;
/// `send_media` must be safe to call concurrently (ordering between an
/// audio and a video chunk sent at the same instant is not guaranteed).
/// All sends on a torn-down channel are no-ops.
#[async_trait]
pub trait PerceptionChannel: Send + Sync {
    /// Push one media chunk to the service
    async fn send_media(&self, chunk: MediaChunk) -> Result<()>;

    /// Acknowledge a tool call
    async fn send_ack(&self, ack: ToolAck) -> Result<()>;

    /// Close the channel; idempotent
    async fn close(&self) -> Result<()>;
}
