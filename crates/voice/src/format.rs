use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Audio containers the transcription backend accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MP3 (widely compatible).
    #[default]
    Mp3,
    /// Opus in an OGG container (what chat platforms record voice notes in).
    Ogg,
    /// 16-bit PCM WAV.
    Wav,
    M4a,
    Webm,
}

impl AudioFormat {
    /// MIME type for this format.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
            Self::Wav => "audio/wav",
            Self::M4a => "audio/mp4",
            Self::Webm => "audio/webm",
        }
    }

    /// File extension for this format.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Wav => "wav",
            Self::M4a => "m4a",
            Self::Webm => "webm",
        }
    }

    /// Encoder arguments for ffmpeg.
    #[must_use]
    pub fn ffmpeg_codec_args(&self) -> &'static [&'static str] {
        match self {
            Self::Mp3 => &["-c:a", "libmp3lame", "-q:a", "4"],
            Self::Ogg => &["-c:a", "libopus"],
            Self::Wav => &["-c:a", "pcm_s16le"],
            Self::M4a => &["-c:a", "aac"],
            Self::Webm => &["-c:a", "libopus", "-f", "webm"],
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" | "mpeg" => Ok(Self::Mp3),
            "ogg" | "opus" => Ok(Self::Ogg),
            "wav" => Ok(Self::Wav),
            "m4a" | "mp4" => Ok(Self::M4a),
            "webm" => Ok(Self::Webm),
            other => Err(Error::message(format!("unsupported audio format: {other}"))),
        }
    }
}
