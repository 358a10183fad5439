//! Output path and post-processing command rendering.
//!
//! Uses Handlebars with two helpers:
//! - `filename` makes a string safe as a path component
//! - `now` formats the current local time with a strftime pattern

use std::path::Path;
use std::sync::LazyLock;

use handlebars::{handlebars_helper, no_escape, Handlebars};
use regex::Regex;
use roomwatch_core::{Info, Live};
use serde_json::{json, Value};
use tracing::warn;

pub const DEFAULT_OUTPUT_TEMPLATE: &str =
    r#"{{platform}}/{{filename host}}/[{{now "%Y-%m-%d %H-%M-%S"}}][{{filename host}}][{{filename room}}].flv"#;

const OUTPUT: &str = "output";
const COMMAND: &str = "command";

static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("Invalid entity regex")
});

static SYMBOL_OR_OTHER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{S}\p{C}]").expect("Invalid symbol regex"));

fn unescape_html_entities(input: &str) -> String {
    HTML_ENTITY
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Make `input` usable as a single path component
#[must_use]
pub fn sanitize_filename(input: &str, strip_symbols: bool) -> String {
    let unescaped = unescape_html_entities(input);
    let replaced: String = unescaped
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();

    if strip_symbols {
        SYMBOL_OR_OTHER.replace_all(&replaced, "").into_owned()
    } else {
        replaced
    }
}

handlebars_helper!(filename_plain: |value: str| sanitize_filename(value, false));
handlebars_helper!(filename_strict: |value: str| sanitize_filename(value, true));
handlebars_helper!(now: |format: str| chrono::Local::now().format(format).to_string());

/// Template data for a room: the info document plus short aliases
fn room_data(live: &dyn Live, info: &Info) -> Value {
    let mut data = serde_json::to_value(info.document(live)).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut data {
        map.insert("platform".to_string(), Value::String(live.platform_name()));
        map.insert("host".to_string(), Value::String(info.host_name.clone()));
        map.insert("room".to_string(), Value::String(info.room_name.clone()));
    }
    data
}

/// Renders recording paths and the optional post-processing command
pub struct PathTemplate {
    registry: Handlebars<'static>,
    has_command: bool,
}

impl PathTemplate {
    /// `output` replaces the default path template; one that fails to parse
    /// is reported and ignored.
    #[must_use]
    pub fn new(output: Option<&str>, command: Option<&str>, strip_symbols: bool) -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(no_escape);
        if strip_symbols {
            registry.register_helper("filename", Box::new(filename_strict));
        } else {
            registry.register_helper("filename", Box::new(filename_plain));
        }
        registry.register_helper("now", Box::new(now));

        let custom = output.filter(|tmpl| !tmpl.trim().is_empty()).and_then(|tmpl| {
            registry
                .register_template_string(OUTPUT, tmpl)
                .map_err(|e| warn!(template = tmpl, error = %e, "Invalid output template, using default"))
                .ok()
        });
        if custom.is_none() {
            // The default template is static and known to parse.
            let _ = registry.register_template_string(OUTPUT, DEFAULT_OUTPUT_TEMPLATE);
        }

        let has_command = command.filter(|cmd| !cmd.trim().is_empty()).is_some_and(|cmd| {
            registry
                .register_template_string(COMMAND, cmd)
                .map_err(|e| warn!(template = cmd, error = %e, "Invalid custom command line"))
                .is_ok()
        });

        Self {
            registry,
            has_command,
        }
    }

    /// Relative output path for a new recording of `live`
    pub fn render_output(&self, live: &dyn Live, info: &Info) -> Result<String, handlebars::RenderError> {
        self.registry.render(OUTPUT, &room_data(live, info))
    }

    /// The post-processing command for a finished recording, `None` when no
    /// command is configured
    pub fn render_command(
        &self,
        live: &dyn Live,
        info: &Info,
        file_name: &Path,
        ffmpeg: &Path,
    ) -> Option<Result<String, handlebars::RenderError>> {
        if !self.has_command {
            return None;
        }
        let mut data = room_data(live, info);
        if let Value::Object(map) = &mut data {
            map.insert(
                "file_name".to_string(),
                Value::String(file_name.display().to_string()),
            );
            map.insert(
                "ffmpeg".to_string(),
                Value::String(ffmpeg.display().to_string()),
            );
        }
        Some(self.registry.render(COMMAND, &data))
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self::new(None, None, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubLive;

    fn info(host: &str, room: &str) -> Info {
        Info {
            host_name: host.to_string(),
            room_name: room.to_string(),
            status: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(r#"a/b\c:d*e?f"g<h>i|j"#, false), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("Tom &amp; Jerry", false), "Tom & Jerry");
        assert_eq!(sanitize_filename("&lt;live&gt;", false), "_live_");
        assert_eq!(sanitize_filename("&#65;&#x42;", false), "AB");
        assert_eq!(sanitize_filename("&bogus;", false), "&bogus;");
    }

    #[test]
    fn test_sanitize_strips_symbols_when_strict() {
        assert_eq!(sanitize_filename("night ★ stream\u{0007}", true), "night  stream");
        assert_eq!(sanitize_filename("night ★ stream", false), "night ★ stream");
    }

    #[test]
    fn test_default_output_path() {
        let template = PathTemplate::default();
        let live = StubLive::new("https://live.example.com/1");
        let path = template
            .render_output(&live, &info("Host/Name", "Room?"))
            .unwrap();

        assert!(path.starts_with("stub/Host_Name/["), "{path}");
        assert!(path.ends_with("][Host_Name][Room_].flv"), "{path}");
    }

    #[test]
    fn test_custom_output_template() {
        let template = PathTemplate::new(Some("{{host}}-{{room}}-{{id}}.flv"), None, false);
        let live = StubLive::new("https://live.example.com/1");
        let path = template.render_output(&live, &info("h", "r")).unwrap();
        assert_eq!(path, format!("h-r-{}.flv", live.live_id()));
    }

    #[test]
    fn test_invalid_output_template_falls_back() {
        let template = PathTemplate::new(Some("{{#if}}"), None, false);
        let live = StubLive::new("https://live.example.com/1");
        let path = template.render_output(&live, &info("h", "r")).unwrap();
        assert!(path.starts_with("stub/h/["));
    }

    #[test]
    fn test_render_command() {
        let live = StubLive::new("https://live.example.com/1");
        let none = PathTemplate::default();
        assert!(none
            .render_command(&live, &info("h", "r"), Path::new("a.flv"), Path::new("ffmpeg"))
            .is_none());

        let template = PathTemplate::new(
            None,
            Some(r#"{{ffmpeg}} -i "{{file_name}}" "{{room}}.mp4""#),
            false,
        );
        let cmd = template
            .render_command(
                &live,
                &info("h", "r"),
                Path::new("/rec/a.flv"),
                Path::new("/usr/bin/ffmpeg"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(cmd, r#"/usr/bin/ffmpeg -i "/rec/a.flv" "r.mp4""#);
    }
}
