//! Speech-to-text seam used by the transcription pipeline.

mod whisper;

pub use whisper::WhisperStt;

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, bytes::Bytes, serde::Deserialize};

use crate::format::AudioFormat;

/// One voice note ready for a speech-to-text backend.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio: Bytes,
    pub format: AudioFormat,
    /// ISO 639-1 hint, e.g. "zh".
    pub language: Option<String>,
    /// Vocabulary or context passed through to the backend.
    pub prompt: Option<String>,
}

impl TranscribeRequest {
    pub fn new(audio: impl Into<Bytes>, format: AudioFormat) -> Self {
        Self {
            audio: audio.into(),
            format,
            language: None,
            prompt: None,
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, rename = "duration")]
    pub duration_seconds: Option<f32>,
}

impl Transcript {
    /// The trimmed text, or `None` when nothing was recognised.
    #[must_use]
    pub fn spoken_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Short name used in logs.
    fn id(&self) -> &'static str;

    fn is_configured(&self) -> bool;

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript>;
}

#[async_trait]
impl<T: SttProvider + ?Sized> SttProvider for Arc<T> {
    fn id(&self) -> &'static str {
        (**self).id()
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript> {
        (**self).transcribe(request).await
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("  hello  ", Some("hello"))]
    #[case("", None)]
    #[case(" \n\t ", None)]
    fn spoken_text_ignores_whitespace(#[case] raw: &str, #[case] expected: Option<&str>) {
        let transcript = Transcript {
            text: raw.into(),
            language: None,
            duration_seconds: None,
        };
        assert_eq!(transcript.spoken_text(), expected);
    }

    #[test]
    fn request_builder_keeps_language() {
        let request = TranscribeRequest::new(vec![1_u8, 2, 3], AudioFormat::Ogg)
            .with_language(Some("zh".into()));
        assert_eq!(request.audio.len(), 3);
        assert_eq!(request.language.as_deref(), Some("zh"));
        assert!(request.prompt.is_none());
    }
}
