//! Optional TOML config file support
//!
//! Location: `~/.config/sentinel/config.toml` (XDG config dir).
//! Every field is optional; env vars take precedence over file values.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Root of the optional config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub service: ServiceSection,
    pub video: VideoSection,
    pub dedup: DedupSection,
    pub upload: UploadSection,
    pub notify: NotifySection,
    /// Crime-type to fine amount overrides; replaces the built-in table
    pub fines: Option<HashMap<String, u64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    pub frame_rate: Option<u32>,
    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub service_id: Option<String>,
    pub template_id: Option<String>,
    pub public_key: Option<String>,
}

/// Path to the config file
#[must_use]
pub fn config_file_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".config/sentinel/config.toml"),
        |d| d.config_dir().join("sentinel").join("config.toml"),
    )
}

/// Load the config file if present; missing or unreadable files yield
/// defaults, malformed TOML is logged and ignored
#[must_use]
pub fn load_config_file() -> ConfigFile {
    let path = config_file_path();
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return ConfigFile::default();
    };

    match toml::from_str(&contents) {
        Ok(fc) => {
            tracing::debug!(path = %path.display(), "loaded config file");
            fc
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            ConfigFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let toml = r#"
            [service]
            api_key = "k"
            model = "perception-1"

            [video]
            frame_rate = 3
            jpeg_quality = 70

            [dedup]
            window_secs = 3600

            [fines]
            triple_riding = 2500
        "#;
        let fc: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(fc.service.api_key.as_deref(), Some("k"));
        assert_eq!(fc.video.frame_rate, Some(3));
        assert_eq!(fc.dedup.window_secs, Some(3600));
        assert_eq!(fc.fines.unwrap().get("triple_riding"), Some(&2500));
    }

    #[test]
    fn test_parse_empty_file() {
        let fc: ConfigFile = toml::from_str("").unwrap();
        assert!(fc.service.api_key.is_none());
        assert!(fc.fines.is_none());
    }
}
