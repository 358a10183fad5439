use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use roomwatch_core::config::OnRecordFinished;
use roomwatch_core::{Info, Live};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::template::PathTemplate;

/// Everything a post-processing step needs to know about a finished file
pub(crate) struct FinishedRecording<'a> {
    pub live: &'a dyn Live,
    pub info: &'a Info,
    pub file: &'a Path,
    pub ffmpeg: &'a Path,
}

/// Run the configured post-processing for one finished recording.
///
/// A custom command takes precedence over the built-in mp4 remux. The
/// source file is removed only when the step exited successfully and
/// `delete_flv_after_convert` is set.
pub(crate) async fn on_record_finished(
    settings: &OnRecordFinished,
    template: &PathTemplate,
    recording: FinishedRecording<'_>,
    debug: bool,
) {
    if !recording.file.exists() {
        return;
    }

    let status = match template.render_command(
        recording.live,
        recording.info,
        recording.file,
        recording.ffmpeg,
    ) {
        Some(Ok(commandline)) => {
            info!(command = %commandline, "Running custom command after recording");
            shell_command(&commandline, debug).status().await
        }
        Some(Err(e)) => {
            error!(error = %e, "Failed to render custom command line");
            return;
        }
        None if settings.convert_to_mp4 => {
            let target = mp4_path(recording.file);
            info!(file = %target.display(), "Converting recording to mp4");
            remux_command(recording.ffmpeg, recording.file, &target, debug)
                .status()
                .await
        }
        None => return,
    };

    match status {
        Ok(status) if status.success() => {
            debug!(file = %recording.file.display(), "Post-processing finished");
            if settings.delete_flv_after_convert {
                remove_source(recording.file).await;
            }
        }
        Ok(status) => log_failure(recording.file, status),
        Err(e) => error!(file = %recording.file.display(), error = %e, "Failed to spawn post-processing"),
    }
}

fn log_failure(file: &Path, status: ExitStatus) {
    error!(file = %file.display(), status = ?status.code(), "Post-processing exited unsuccessfully");
}

async fn remove_source(file: &Path) {
    if let Err(e) = tokio::fs::remove_file(file).await {
        error!(file = %file.display(), error = %e, "Failed to delete recording after conversion");
    }
}

/// `<file>.mp4`, keeping the original extension in the name
pub(crate) fn mp4_path(file: &Path) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(".mp4");
    PathBuf::from(name)
}

fn shell_command(commandline: &str, debug: bool) -> Command {
    let mut command = if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C");
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c");
        command
    };
    command.arg(commandline);
    with_output(&mut command, debug);
    command
}

fn remux_command(ffmpeg: &Path, source: &Path, target: &Path, debug: bool) -> Command {
    let mut command = Command::new(ffmpeg);
    command
        .arg("-hide_banner")
        .arg("-i")
        .arg(source)
        .arg("-c")
        .arg("copy")
        .arg(target);
    with_output(&mut command, debug);
    command
}

fn with_output(command: &mut Command, debug: bool) {
    command.stdin(Stdio::null());
    if debug {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    } else {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubLive;

    fn recording<'a>(live: &'a StubLive, info: &'a Info, file: &'a Path) -> FinishedRecording<'a> {
        FinishedRecording {
            live,
            info,
            file,
            ffmpeg: Path::new("ffmpeg"),
        }
    }

    #[test]
    fn test_mp4_path_appends_extension() {
        assert_eq!(
            mp4_path(Path::new("/rec/a/[x].flv")),
            PathBuf::from("/rec/a/[x].flv.mp4")
        );
    }

    #[test]
    fn test_remux_arguments() {
        let command = remux_command(
            Path::new("/usr/bin/ffmpeg"),
            Path::new("in.flv"),
            Path::new("in.flv.mp4"),
            false,
        );
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-hide_banner", "-i", "in.flv", "-c", "copy", "in.flv.mp4"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_custom_command_sees_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("room.flv");
        std::fs::write(&file, b"FLV").unwrap();

        let live = StubLive::new("https://live.example.com/1");
        let info = Info::default();
        let template = PathTemplate::new(None, Some("cp '{{file_name}}' '{{file_name}}.bak'"), false);

        on_record_finished(
            &OnRecordFinished::default(),
            &template,
            recording(&live, &info, &file),
            false,
        )
        .await;

        assert_eq!(std::fs::read(dir.path().join("room.flv.bak")).unwrap(), b"FLV");
        assert!(file.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_only_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("room.flv");
        std::fs::write(&file, b"FLV").unwrap();
        let settings = OnRecordFinished {
            delete_flv_after_convert: true,
            ..Default::default()
        };
        let live = StubLive::new("https://live.example.com/1");
        let info = Info::default();

        let failing = PathTemplate::new(None, Some("exit 3"), false);
        on_record_finished(&settings, &failing, recording(&live, &info, &file), false).await;
        assert!(file.exists());

        let passing = PathTemplate::new(None, Some("true"), false);
        on_record_finished(&settings, &passing, recording(&live, &info, &file), false).await;
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_nothing_configured_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("room.flv");
        std::fs::write(&file, b"FLV").unwrap();
        let settings = OnRecordFinished {
            delete_flv_after_convert: true,
            ..Default::default()
        };
        let live = StubLive::new("https://live.example.com/1");
        let info = Info::default();

        on_record_finished(&settings, &PathTemplate::default(), recording(&live, &info, &file), false).await;
        assert!(file.exists());
    }
}
