//! Live WebSocket client for the perception service
//!
//! Speaks the bidirectional generate-content protocol: a setup message
//! opens the stream, media goes out as base64 realtime input, and the
//! service answers with tool-call batches or inline audio. A writer task
//! fans in sends from both capture pumps; a reader task translates
//! server messages into [`ChannelEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::{ChannelEvent, NORMAL_CLOSE_CODE, PerceptionChannel, ToolAck, ToolCallEnvelope};
use crate::media::MediaChunk;
use crate::{Config, Error, Result};

/// Outbound queue depth; at 5 fps video plus ~10 audio chunks/s this is
/// several seconds of headroom
const OUTBOUND_BUFFER: usize = 64;

/// Inbound event queue depth
const EVENT_BUFFER: usize = 64;

/// Instruction given to the perception model
const SYSTEM_INSTRUCTION: &str = "\
You are an AI traffic warden using visual analysis. Monitor the video \
feed frame-by-frame for traffic violations. Scan the entire frame; if \
multiple vehicles are committing violations simultaneously, call \
'report_violation' separately for each vehicle. Do not aggregate \
different vehicles into a single report, and do not stop after the \
first violation. If a vehicle is committing no violation, do not call \
report_violation. If the number plate is blurry, use \"UNKNOWN\". \
Remain silent; use only the tool.";

enum Outbound {
    Frame(Message),
    Shutdown,
}

/// WebSocket-backed perception channel
pub struct LiveChannel {
    outbound: mpsc::Sender<Outbound>,
    closed: Arc<AtomicBool>,
}

/// Connect to the perception service
///
/// Performs the WebSocket handshake and setup exchange, bounded by the
/// configured connect timeout, then spawns the reader and writer tasks.
/// Returns the outbound handle and the inbound event stream.
///
/// # Errors
///
/// Returns `Error::Config` if no credential is configured and
/// `Error::Remote` if the handshake fails or times out
pub async fn connect_live(config: &Config) -> Result<(LiveChannel, mpsc::Receiver<ChannelEvent>)> {
    let api_key = config
        .api_key
        .as_deref()
        .ok_or_else(|| Error::Config("service api key is missing".to_string()))?;

    let url = format!("{}?key={api_key}", config.service_url);

    let handshake = async {
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Remote(format!("handshake failed: {e}")))?;

        let setup = setup_message(&config.model);
        ws.send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| Error::Remote(format!("setup send failed: {e}")))?;

        // The service confirms setup before it will accept media
        loop {
            match ws.next().await {
                Some(Ok(msg)) => {
                    let Some(value) = parse_json(&msg) else {
                        continue;
                    };
                    if value.get("setupComplete").is_some() {
                        return Ok(ws);
                    }
                }
                Some(Err(e)) => {
                    return Err(Error::Remote(format!("setup failed: {e}")));
                }
                None => {
                    return Err(Error::Remote("stream ended during setup".to_string()));
                }
            }
        }
    };

    let ws = tokio::time::timeout(config.connect_timeout, handshake)
        .await
        .map_err(|_| Error::Remote("handshake timed out".to_string()))??;

    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(EVENT_BUFFER);
    let closed = Arc::new(AtomicBool::new(false));

    // Writer: single owner of the sink; both pumps and the ack path
    // fan in through the queue
    tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Frame(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        tracing::debug!(error = %e, "outbound send failed, stopping writer");
                        break;
                    }
                }
                Outbound::Shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader: translate server messages into channel events
    let reader_closed = Arc::clone(&closed);
    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(frame)) => {
                    let code = frame.map_or(NORMAL_CLOSE_CODE, |f| f.code.into());
                    let _ = event_tx.send(ChannelEvent::Closed { code }).await;
                    return;
                }
                Ok(msg) => {
                    if let Some(event) = parse_json(&msg).and_then(server_event) {
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = event_tx
                        .send(ChannelEvent::Error {
                            detail: e.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }

        // Stream ended without a close frame
        let code = if reader_closed.load(Ordering::SeqCst) {
            NORMAL_CLOSE_CODE
        } else {
            u16::from(CloseCode::Abnormal)
        };
        let _ = event_tx.send(ChannelEvent::Closed { code }).await;
    });

    tracing::info!(model = %config.model, "perception channel connected");

    Ok((
        LiveChannel {
            outbound: outbound_tx,
            closed,
        },
        event_rx,
    ))
}

impl LiveChannel {
    async fn send_frame(&self, value: serde_json::Value) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        // A full or dropped queue means the writer is gone; sends on a
        // torn-down channel are no-ops
        let _ = self
            .outbound
            .send(Outbound::Frame(Message::Text(value.to_string())))
            .await;
        Ok(())
    }
}

#[async_trait]
impl PerceptionChannel for LiveChannel {
    async fn send_media(&self, chunk: MediaChunk) -> Result<()> {
        let payload = serde_json::json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": chunk.mime_type,
                    "data": BASE64.encode(&chunk.payload),
                }],
            },
        });
        self.send_frame(payload).await
    }

    async fn send_ack(&self, ack: ToolAck) -> Result<()> {
        let payload = serde_json::json!({
            "toolResponse": {
                "functionResponses": [{
                    "id": ack.id,
                    "name": ack.name,
                    "response": { "result": "logged" },
                }],
            },
        });
        self.send_frame(payload).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.outbound.send(Outbound::Shutdown).await;
        Ok(())
    }
}

/// Build the session setup message, including the violation-report tool
fn setup_message(model: &str) -> serde_json::Value {
    serde_json::json!({
        "setup": {
            "model": format!("models/{model}"),
            "generationConfig": { "responseModalities": ["AUDIO"] },
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "tools": [{
                "functionDeclarations": [{
                    "name": super::REPORT_VIOLATION,
                    "description": "Report a detected traffic violation.",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "violation_detected": {
                                "type": "BOOLEAN",
                                "description": "Whether a violation was detected.",
                            },
                            "violation_type": {
                                "type": "ARRAY",
                                "items": {
                                    "type": "STRING",
                                    "enum": [
                                        "helmet_missing_driver",
                                        "helmet_missing_pillion",
                                        "triple_riding",
                                        "mobile_usage_driver",
                                        "number_plate_missing",
                                        "red_light_signal_break",
                                        "wrong_side",
                                        "signal_jump",
                                        "no_seatbelt_driver",
                                        "no_seatbelt_passenger",
                                    ],
                                },
                                "description": "List of detected violations.",
                            },
                            "vehicle_number": {
                                "type": "STRING",
                                "description": "The vehicle number plate text, or empty string if unclear.",
                            },
                            "vehicle_type": {
                                "type": "STRING",
                                "enum": ["bike", "scooter", "car", "auto", "truck", "unknown"],
                                "description": "Type of the vehicle involved.",
                            },
                        },
                        "required": ["violation_detected", "violation_type", "vehicle_number", "vehicle_type"],
                    },
                }],
            }],
        },
    })
}

fn parse_json(msg: &Message) -> Option<serde_json::Value> {
    match msg {
        Message::Text(text) => serde_json::from_str(text).ok(),
        Message::Binary(bytes) => serde_json::from_slice(bytes).ok(),
        _ => None,
    }
}

/// Interpret a server message; unrecognized messages are dropped
fn server_event(value: serde_json::Value) -> Option<ChannelEvent> {
    if let Some(calls) = value
        .get("toolCall")
        .and_then(|tc| tc.get("functionCalls"))
        .and_then(serde_json::Value::as_array)
    {
        let envelopes: Vec<ToolCallEnvelope> = calls
            .iter()
            .filter_map(|call| {
                Some(ToolCallEnvelope {
                    id: call.get("id")?.as_str()?.to_string(),
                    name: call.get("name")?.as_str()?.to_string(),
                    args: call.get("args").cloned().unwrap_or_default(),
                })
            })
            .collect();

        if envelopes.is_empty() {
            return None;
        }
        return Some(ChannelEvent::ToolCalls(envelopes));
    }

    let audio = value
        .get("serverContent")?
        .get("modelTurn")?
        .get("parts")?
        .as_array()?
        .first()?
        .get("inlineData")?
        .get("data")?
        .as_str()?;

    BASE64.decode(audio).ok().map(ChannelEvent::Audio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let setup = setup_message("perception-1");
        assert_eq!(
            setup["setup"]["model"].as_str(),
            Some("models/perception-1")
        );
        let decl = &setup["setup"]["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"].as_str(), Some(super::super::REPORT_VIOLATION));
    }

    #[test]
    fn test_server_event_tool_calls() {
        let value = serde_json::json!({
            "toolCall": {
                "functionCalls": [
                    { "id": "c1", "name": "report_violation", "args": { "violation_detected": true } },
                ],
            },
        });

        let Some(ChannelEvent::ToolCalls(calls)) = server_event(value) else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
    }

    #[test]
    fn test_server_event_audio() {
        let value = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{ "inlineData": { "mimeType": "audio/pcm", "data": BASE64.encode([0u8, 1, 2, 3]) } }],
                },
            },
        });

        let Some(ChannelEvent::Audio(bytes)) = server_event(value) else {
            panic!("expected audio");
        };
        assert_eq!(bytes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_server_event_ignores_unrelated() {
        assert!(server_event(serde_json::json!({ "usageMetadata": {} })).is_none());
    }
}
