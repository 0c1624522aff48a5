//! Capture pumps: independent media producers feeding the channel
//!
//! The audio pump is driven by hardware buffer callbacks, the video
//! pump by a fixed-rate timer. Both stop deterministically when the
//! session's cancellation token fires.

pub mod audio;
pub mod video;

pub use audio::AudioPump;
pub use video::{FrameSource, NullFrameSource, VideoPump};
