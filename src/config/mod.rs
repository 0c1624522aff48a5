//! Configuration for the Sentinel gateway
//!
//! Values are layered env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::fines::FineSchedule;

/// Default perception channel endpoint (Gemini live API)
const DEFAULT_SERVICE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default perception model
const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default video frame rate (frames per second)
const DEFAULT_FRAME_RATE: u32 = 5;

/// Default JPEG quality for outbound frames
const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Default dedup window (2 hours)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 2 * 60 * 60;

/// Default bound on the Connecting state
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Sentinel gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Perception service credential; required to connect
    pub api_key: Option<String>,

    /// Perception channel endpoint
    pub service_url: String,

    /// Perception model identifier
    pub model: String,

    /// Video pump settings
    pub video: VideoConfig,

    /// Window within which same-plate, same-crime reports are one incident
    pub dedup_window: Duration,

    /// Bound on the channel handshake
    pub connect_timeout: Duration,

    /// Crime-type fine rates
    pub fines: FineSchedule,

    /// Evidence upload credentials
    pub upload: UploadConfig,

    /// Notification service credentials
    pub notify: NotifyConfig,

    /// Data directory (violation database)
    pub data_dir: PathBuf,
}

/// Video pump settings
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Target frames per second pushed to the channel
    pub frame_rate: u32,

    /// JPEG quality for outbound frames (1-100)
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Evidence upload credentials; any missing field degrades uploads to a
/// placeholder URL
#[derive(Debug, Clone, Default)]
pub struct UploadConfig {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

/// Notification service credentials; any missing field disables
/// notifications
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub service_id: Option<String>,
    pub template_id: Option<String>,
    pub public_key: Option<String>,
}

impl NotifyConfig {
    /// Whether all credentials are present
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.service_id.is_some() && self.template_id.is_some() && self.public_key.is_some()
    }
}

impl Config {
    /// Load configuration (env > TOML > default)
    #[must_use]
    pub fn load() -> Self {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Layer a parsed config file with an environment lookup.
    ///
    /// Taking the lookup as a closure keeps the layering testable without
    /// mutating process-wide environment state.
    fn from_sources(fc: file::ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = env("SENTINEL_API_KEY").or(fc.service.api_key);

        let service_url = env("SENTINEL_SERVICE_URL")
            .or(fc.service.url)
            .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());

        let model = env("SENTINEL_MODEL")
            .or(fc.service.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let video = VideoConfig {
            frame_rate: env("SENTINEL_FRAME_RATE")
                .and_then(|s| s.parse().ok())
                .or(fc.video.frame_rate)
                .filter(|&r| r > 0)
                .unwrap_or(DEFAULT_FRAME_RATE),
            jpeg_quality: env("SENTINEL_JPEG_QUALITY")
                .and_then(|s| s.parse().ok())
                .or(fc.video.jpeg_quality)
                .filter(|&q| (1..=100).contains(&q))
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let dedup_window = Duration::from_secs(
            env("SENTINEL_DEDUP_WINDOW_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.dedup.window_secs)
                .unwrap_or(DEFAULT_DEDUP_WINDOW_SECS),
        );

        let connect_timeout = Duration::from_secs(
            env("SENTINEL_CONNECT_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.service.connect_timeout_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        );

        let fines = fc.fines.map_or_else(FineSchedule::default, FineSchedule::from_rates);

        let upload = UploadConfig {
            cloud_name: env("SENTINEL_UPLOAD_CLOUD_NAME").or(fc.upload.cloud_name),
            api_key: env("SENTINEL_UPLOAD_API_KEY").or(fc.upload.api_key),
            api_secret: env("SENTINEL_UPLOAD_API_SECRET").or(fc.upload.api_secret),
        };

        let notify = NotifyConfig {
            service_id: env("SENTINEL_NOTIFY_SERVICE_ID").or(fc.notify.service_id),
            template_id: env("SENTINEL_NOTIFY_TEMPLATE_ID").or(fc.notify.template_id),
            public_key: env("SENTINEL_NOTIFY_PUBLIC_KEY").or(fc.notify.public_key),
        };

        let data_dir = env("SENTINEL_DATA_DIR").map_or_else(
            || {
                directories::BaseDirs::new().map_or_else(
                    || PathBuf::from("."),
                    |d| d.data_dir().join("sentinel"),
                )
            },
            PathBuf::from,
        );

        Self {
            api_key,
            service_url,
            model,
            video,
            dedup_window,
            connect_timeout,
            fines,
            upload,
            notify,
            data_dir,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            service_url: DEFAULT_SERVICE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            video: VideoConfig::default(),
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            fines: FineSchedule::default(),
            upload: UploadConfig::default(),
            notify: NotifyConfig::default(),
            data_dir: PathBuf::from("."),
        }
    }
}
