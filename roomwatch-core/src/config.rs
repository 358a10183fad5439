use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between two liveness polls of the same room
    pub interval: u64,
    /// Root directory for recordings
    pub out_put_path: PathBuf,
    /// Explicit ffmpeg binary, falls back to `PATH` lookup
    pub ffmpeg_path: Option<PathBuf>,
    pub log: LoggingConfig,
    pub debug: bool,
    /// Read/write timeout handed to ffmpeg (`-rw_timeout`)
    pub timeout_in_us: u64,
    /// Handlebars template for recording file names
    pub out_put_tmpl: Option<String>,
    /// Cookie strings keyed by platform host (`k1=v1; k2=v2`)
    pub cookies: HashMap<String, String>,
    pub feature: FeatureConfig,
    pub video_split_strategies: VideoSplitStrategies,
    pub on_record_finished: OnRecordFinished,
    pub live_rooms: Vec<LiveRoom>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: 30,
            out_put_path: PathBuf::from("./"),
            ffmpeg_path: None,
            log: LoggingConfig::default(),
            debug: false,
            timeout_in_us: 60_000_000,
            out_put_tmpl: None,
            cookies: HashMap::new(),
            feature: FeatureConfig::default(),
            video_split_strategies: VideoSplitStrategies::default(),
            on_record_finished: OnRecordFinished::default(),
            live_rooms: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
    /// Directory for log files; console only when unset
    pub out_put_folder: Option<PathBuf>,
    /// Keep the log of the latest run in `roomwatch.log`
    pub save_last_log: bool,
    /// Keep every run in daily rotated files
    pub save_every_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            out_put_folder: None,
            save_last_log: true,
            save_every_log: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Use the built-in FLV remuxer instead of ffmpeg for `.flv` urls
    pub use_native_flv_parser: bool,
    /// Strip symbol and control characters from rendered file names
    pub remove_symbol_other_character: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSplitStrategies {
    /// Start a new file when the room title changes during a broadcast
    pub on_room_name_changed: bool,
    /// Restart the capture once a session is this old, zero disables
    #[serde(with = "humantime_duration")]
    pub max_duration: Duration,
    /// Passed to ffmpeg as `-fs`, zero disables
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OnRecordFinished {
    pub convert_to_mp4: bool,
    pub delete_flv_after_convert: bool,
    /// Handlebars template run through the system shell after each session
    pub custom_commandline: Option<String>,
}

/// A watched room. In YAML a room may also be written as a bare url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LiveRoomRepr")]
pub struct LiveRoom {
    pub url: String,
    pub listen: bool,
    pub record: bool,
    pub quality: i32,
    /// Re-emit target, empty when unset
    pub rtmp: String,
    pub push: bool,
}

impl LiveRoom {
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            listen: true,
            record: true,
            quality: 0,
            rtmp: String::new(),
            push: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LiveRoomRepr {
    Url(String),
    Full {
        url: String,
        #[serde(default = "default_true")]
        listen: bool,
        #[serde(default = "default_true")]
        record: bool,
        #[serde(default)]
        quality: i32,
        #[serde(default)]
        rtmp: String,
        #[serde(default)]
        push: bool,
    },
}

const fn default_true() -> bool {
    true
}

impl From<LiveRoomRepr> for LiveRoom {
    fn from(repr: LiveRoomRepr) -> Self {
        match repr {
            LiveRoomRepr::Url(url) => Self::from_url(url),
            LiveRoomRepr::Full {
                url,
                listen,
                record,
                quality,
                rtmp,
                push,
            } => Self {
                url,
                listen,
                record,
                quality,
                rtmp,
                push,
            },
        }
    }
}

/// Durations written as humantime strings ("90s", "1h 30m") or plain seconds.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
            }
        }
    }
}

fn normalize_url(url: &str) -> String {
    url::Url::parse(url.trim()).map_or_else(|_| url.trim().to_string(), String::from)
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        // ROOMWATCH_INTERVAL, ROOMWATCH_LOG__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("ROOMWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Look up the room entry for `url`. Both sides are compared in their
    /// parsed form, so `https://host` matches `https://host/`.
    #[must_use]
    pub fn room_by_url(&self, url: &str) -> Option<&LiveRoom> {
        let wanted = normalize_url(url);
        self.live_rooms
            .iter()
            .find(|room| normalize_url(&room.url) == wanted)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Check every constraint and report all violations at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.interval == 0 {
            errors.push("interval must be greater than 0".to_string());
        }
        if !self.out_put_path.exists() {
            errors.push(format!(
                "output path \"{}\" does not exist",
                self.out_put_path.display()
            ));
        }
        let max_duration = self.video_split_strategies.max_duration;
        if !max_duration.is_zero() && max_duration < Duration::from_secs(60) {
            errors.push("video_split_strategies.max_duration must be at least one minute".to_string());
        }
        if self.timeout_in_us == 0 {
            errors.push("timeout_in_us must be greater than 0".to_string());
        }
        if self.live_rooms.is_empty() {
            errors.push("no live rooms configured, nothing to do".to_string());
        }
        if let Err(e) = crate::logging::parse_log_level(&self.log.level) {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
