//! Container conversion through an external `ffmpeg` binary.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    parley_common::Error as CommonError,
    tokio::process::Command,
    tracing::debug,
};

use crate::format::AudioFormat;

const BINARY_NAME: &str = "ffmpeg";

/// Converts an audio file on disk into another container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write a converted copy of `input` next to it and return its path.
    /// The input file is left in place.
    async fn transcode(&self, input: &Path, target: AudioFormat) -> Result<PathBuf>;
}

#[async_trait]
impl<T: Transcoder + ?Sized> Transcoder for std::sync::Arc<T> {
    async fn transcode(&self, input: &Path, target: AudioFormat) -> Result<PathBuf> {
        (**self).transcode(input, target).await
    }
}

/// Path of the converted file: `<dir>/<stem>.transcoded.<ext>`.
#[must_use]
pub fn output_path(input: &Path, target: AudioFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".into());
    input.with_file_name(format!("{stem}.transcoded.{}", target.extension()))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Runs `ffmpeg` as a child process. Output is mono 16 kHz, which is what
/// speech models are trained on.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary_path: Option<String>,
}

impl FfmpegTranscoder {
    #[must_use]
    pub fn new(binary_path: Option<String>) -> Self {
        Self { binary_path }
    }

    /// The configured path when it points at a file, otherwise `ffmpeg`
    /// from `PATH`. A leading `~/` in the configured path is expanded.
    fn find_binary(&self) -> Option<PathBuf> {
        self.binary_path
            .as_deref()
            .map(expand_home)
            .filter(|path| path.is_file())
            .or_else(|| which::which(BINARY_NAME).ok())
    }

    /// Whether an ffmpeg binary can be found.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.find_binary().is_some()
    }

    fn command_args(input: &Path, output: &Path, target: AudioFormat) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            ["-vn", "-ac", "1", "-ar", "16000"]
                .into_iter()
                .map(OsString::from),
        );
        args.extend(target.ffmpeg_codec_args().iter().map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, target: AudioFormat) -> Result<PathBuf> {
        let binary = self.find_binary().ok_or_else(|| {
            CommonError::permanent("transcode", "ffmpeg binary not found in PATH")
        })?;

        let output_file = output_path(input, target);
        debug!(
            input = %input.display(),
            output = %output_file.display(),
            %target,
            "transcoding audio"
        );

        let output = Command::new(&binary)
            .args(Self::command_args(input, &output_file, target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow!("failed to execute ffmpeg: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Bad input does not get better on retry.
            return Err(CommonError::permanent("transcode", stderr.trim()).into());
        }

        if !tokio::fs::try_exists(&output_file).await.unwrap_or(false) {
            return Err(anyhow!("ffmpeg exited cleanly but wrote no output"));
        }
        Ok(output_file)
    }
}
