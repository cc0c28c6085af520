//! Voice message handling: turns a chat attachment into text.
//!
//! [`TranscriptionPipeline`] drives fetch, download, transcode and
//! transcribe in that order. Transcoding goes through a [`Transcoder`]
//! (ffmpeg by default) and speech recognition through an [`SttProvider`]
//! (OpenAI Whisper by default).

pub mod error;
pub mod format;
pub mod pipeline;
pub mod stt;
pub mod transcode;

pub use {
    error::{Error, Result},
    format::AudioFormat,
    pipeline::{Stage, TranscriptionFailure, TranscriptionPipeline},
    stt::{SttProvider, TranscribeRequest, Transcript, WhisperStt},
    transcode::{FfmpegTranscoder, Transcoder},
};
