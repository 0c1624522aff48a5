//! Sentinel Gateway - live traffic violation monitoring
//!
//! Streams microphone audio and camera frames to a remote perception
//! service over a bidirectional channel, receives violation reports as
//! tool calls and spoken commentary as synthesized audio, and turns the
//! reports into deduplicated, fined, persisted violation records.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 Capture Pumps                     │
//! │      Microphone (PCM16)  │  Camera (JPEG)         │
//! └──────────────────┬───────────────────────────────┘
//!                    │
//! ┌──────────────────▼───────────────────────────────┐
//! │              Perception Channel                   │
//! │   media out  │  tool calls in  │  audio in        │
//! └──────────────────┬───────────────────────────────┘
//!                    │
//! ┌──────────────────▼───────────────────────────────┐
//! │               Violation Engine                    │
//! │  dedup │ fines │ registry │ store │ notify        │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod channel;
pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod events;
pub mod fines;
pub mod media;
pub mod notify;
pub mod playback;
pub mod registry;
pub mod session;
pub mod upload;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use session::{SessionController, SessionState};
