use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use roomwatch_core::config::LiveRoom;
use roomwatch_core::Config;

const DEFAULT_CONFIG_FILE: &str = "config.yml";

#[derive(Parser, Debug)]
#[command(name = "roomwatch", version)]
#[command(about = "Watch live rooms, record them and re-stream them", long_about = None)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "ROOMWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging and ffmpeg output on the console
    #[arg(long)]
    pub debug: bool,

    /// Seconds between two polls of a room
    #[arg(short = 't', long)]
    pub interval: Option<u64>,

    /// Root directory for recordings
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Room url to watch and record, repeatable or comma separated
    #[arg(short, long = "input", value_delimiter = ',')]
    pub input: Vec<String>,

    /// Record `.flv` streams with the built-in parser instead of ffmpeg
    #[arg(long)]
    pub native_flv_parser: bool,

    /// Handlebars template for recording paths
    #[arg(long)]
    pub output_file_tmpl: Option<String>,

    /// `on_room_name_changed` and/or `max_duration:<duration>`, e.g.
    /// `max_duration:1h30m`
    #[arg(long, value_delimiter = ',', value_parser = parse_split_strategy)]
    pub split_strategies: Vec<SplitStrategy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitStrategy {
    OnRoomNameChanged,
    MaxDuration(Duration),
}

fn parse_split_strategy(value: &str) -> Result<SplitStrategy, String> {
    let value = value.trim();
    if value == "on_room_name_changed" {
        return Ok(SplitStrategy::OnRoomNameChanged);
    }
    if let Some(duration) = value.strip_prefix("max_duration:") {
        return humantime::parse_duration(duration.trim())
            .map(SplitStrategy::MaxDuration)
            .map_err(|e| format!("invalid max_duration \"{duration}\": {e}"));
    }
    Err(format!("unknown split strategy \"{value}\""))
}

impl Cli {
    /// The explicit `--config`, or `config.yml` next to the executable when
    /// no room was given on the command line
    pub fn config_path(&self) -> Option<PathBuf> {
        if self.config.is_some() {
            return self.config.clone();
        }
        if !self.input.is_empty() {
            return None;
        }
        let beside_exe = std::env::current_exe()
            .ok()?
            .parent()?
            .join(DEFAULT_CONFIG_FILE);
        beside_exe.is_file().then_some(beside_exe)
    }

    /// Layer command line values over the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if self.debug {
            config.debug = true;
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        if let Some(output) = &self.output {
            config.out_put_path.clone_from(output);
        }
        if let Some(ffmpeg) = &self.ffmpeg_path {
            config.ffmpeg_path = Some(ffmpeg.clone());
        }
        if self.native_flv_parser {
            config.feature.use_native_flv_parser = true;
        }
        if let Some(tmpl) = &self.output_file_tmpl {
            config.out_put_tmpl = Some(tmpl.clone());
        }
        for strategy in &self.split_strategies {
            match strategy {
                SplitStrategy::OnRoomNameChanged => {
                    config.video_split_strategies.on_room_name_changed = true;
                }
                SplitStrategy::MaxDuration(max) => {
                    config.video_split_strategies.max_duration = *max;
                }
            }
        }
        for url in self.input.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            if config.room_by_url(url).is_none() {
                config.live_rooms.push(LiveRoom::from_url(url));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let cli = Cli::try_parse_from([
            "roomwatch",
            "-t",
            "10",
            "-o",
            "/rec",
            "-i",
            "https://live.example.com/1,https://live.example.com/2",
            "-i",
            "https://live.example.com/3",
            "--native-flv-parser",
            "--split-strategies",
            "on_room_name_changed,max_duration:1h",
        ])
        .unwrap();

        assert_eq!(cli.interval, Some(10));
        assert_eq!(cli.input.len(), 3);
        assert_eq!(
            cli.split_strategies,
            [
                SplitStrategy::OnRoomNameChanged,
                SplitStrategy::MaxDuration(Duration::from_secs(3600))
            ]
        );
        assert!(cli.config_path().is_none());
    }

    #[test]
    fn test_rejects_unknown_split_strategy() {
        assert!(Cli::try_parse_from(["roomwatch", "--split-strategies", "hourly"]).is_err());
        assert!(parse_split_strategy("max_duration:soon").is_err());
    }

    #[test]
    fn test_apply_overrides_and_merges_rooms() {
        let cli = Cli::try_parse_from([
            "roomwatch",
            "--debug",
            "--output-file-tmpl",
            "{{room}}.flv",
            "-i",
            "https://live.example.com/1,https://live.example.com/2",
            "--split-strategies",
            "max_duration:90s",
        ])
        .unwrap();
        let mut config = Config {
            live_rooms: vec![LiveRoom::from_url("https://live.example.com/1")],
            ..Default::default()
        };

        cli.apply(&mut config);

        assert!(config.debug);
        assert_eq!(config.interval, 30);
        assert_eq!(config.out_put_tmpl.as_deref(), Some("{{room}}.flv"));
        assert_eq!(
            config.video_split_strategies.max_duration,
            Duration::from_secs(90)
        );
        assert!(!config.video_split_strategies.on_room_name_changed);
        assert_eq!(config.live_rooms.len(), 2);
    }
}
