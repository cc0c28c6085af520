//! Voice attachment → text.
//!
//! One invocation walks `Fetched → Downloaded → Transcoded → Transcribed`
//! in order, then removes its scratch directory. The directory is owned by
//! a [`tempfile::TempDir`], so it is also removed when the future is
//! dropped mid-flight. Nothing here retries; wrap the collaborators in a
//! retry policy before handing them in.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::anyhow,
    futures::StreamExt,
    parley_channels::{ByteStream, CredentialProvider, FileFetcher, FileRef},
    tempfile::TempDir,
    tokio::io::AsyncWriteExt,
    tracing::{debug, warn},
};

use crate::{
    format::AudioFormat,
    stt::{SttProvider, TranscribeRequest},
    transcode::Transcoder,
};

/// Step an invocation failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Credential,
    Fetch,
    Download,
    Transcode,
    Transcribe,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::Fetch => "fetch",
            Self::Download => "download",
            Self::Transcode => "transcode",
            Self::Transcribe => "transcribe",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline run that did not produce text.
#[derive(Debug, thiserror::Error)]
#[error("audio transcription failed during {stage}: {error:#}")]
pub struct TranscriptionFailure {
    pub stage: Stage,
    pub error: anyhow::Error,
}

impl TranscriptionFailure {
    fn new(stage: Stage, error: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

type StageResult<T> = Result<T, TranscriptionFailure>;

enum State {
    Fetched { stream: ByteStream },
    Downloaded { path: PathBuf },
    Transcoded { path: PathBuf, format: AudioFormat },
    Transcribed { text: String },
}

pub struct TranscriptionPipeline {
    credentials: Arc<dyn CredentialProvider>,
    fetcher: Arc<dyn FileFetcher>,
    /// `None` when the platform already delivers `target_format`.
    transcoder: Option<Arc<dyn Transcoder>>,
    stt: Arc<dyn SttProvider>,
    source_format: AudioFormat,
    target_format: AudioFormat,
    language: Option<String>,
    temp_root: Option<PathBuf>,
}

impl TranscriptionPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        fetcher: Arc<dyn FileFetcher>,
        transcoder: Option<Arc<dyn Transcoder>>,
        stt: Arc<dyn SttProvider>,
    ) -> Self {
        Self {
            credentials,
            fetcher,
            transcoder,
            stt,
            source_format: AudioFormat::Ogg,
            target_format: AudioFormat::Mp3,
            language: None,
            temp_root: None,
        }
    }

    #[must_use]
    pub fn with_target_format(mut self, format: AudioFormat) -> Self {
        self.target_format = format;
        self
    }

    /// Container the platform stores voice notes in.
    #[must_use]
    pub fn with_source_format(mut self, format: AudioFormat) -> Self {
        self.source_format = format;
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    #[must_use]
    pub fn with_temp_root(mut self, root: Option<PathBuf>) -> Self {
        self.temp_root = root;
        self
    }

    /// Run the whole pipeline for one attachment and return the trimmed
    /// transcript.
    pub async fn transcribe(&self, file: &FileRef) -> StageResult<String> {
        let workdir = self
            .workdir(&file.message_id)
            .map_err(|e| TranscriptionFailure::new(Stage::Download, e))?;

        let result = self.drive(file, workdir.path()).await;

        let dir = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            warn!(dir = %dir.display(), error = %e, "failed to remove transcription scratch dir");
        }

        match &result {
            Ok(text) => debug!(
                message_id = %file.message_id,
                chars = text.chars().count(),
                "voice message transcribed"
            ),
            Err(failure) => warn!(
                message_id = %file.message_id,
                stage = %failure.stage,
                error = %failure.error,
                "voice message transcription failed"
            ),
        }
        result
    }

    fn workdir(&self, message_id: &str) -> std::io::Result<TempDir> {
        let prefix = format!("parley-{}-", sanitize(message_id));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    async fn drive(&self, file: &FileRef, dir: &Path) -> StageResult<String> {
        let credential = self
            .credentials
            .credential()
            .await
            .map_err(|e| TranscriptionFailure::new(Stage::Credential, e))?;

        let stream = self
            .fetcher
            .fetch(file, &credential)
            .await
            .map_err(|e| TranscriptionFailure::new(Stage::Fetch, e))?;

        let mut state = State::Fetched { stream };
        loop {
            state = match state {
                State::Fetched { stream } => {
                    let path = dir.join(format!("voice.{}", self.source_format.extension()));
                    let bytes = download(stream, &path)
                        .await
                        .map_err(|e| TranscriptionFailure::new(Stage::Download, e))?;
                    debug!(message_id = %file.message_id, bytes, "voice attachment downloaded");
                    State::Downloaded { path }
                },
                State::Downloaded { path } => match &self.transcoder {
                    Some(transcoder) => {
                        let out = transcoder
                            .transcode(&path, self.target_format)
                            .await
                            .map_err(|e| TranscriptionFailure::new(Stage::Transcode, e))?;
                        State::Transcoded {
                            path: out,
                            format: self.target_format,
                        }
                    },
                    None => State::Transcoded {
                        path,
                        format: self.target_format,
                    },
                },
                State::Transcoded { path, format } => {
                    let text = self.submit(&path, format).await?;
                    State::Transcribed { text }
                },
                State::Transcribed { text } => return Ok(text),
            };
        }
    }

    async fn submit(&self, path: &Path, format: AudioFormat) -> StageResult<String> {
        let audio = tokio::fs::read(path)
            .await
            .map_err(|e| TranscriptionFailure::new(Stage::Transcribe, e))?;
        let request =
            TranscribeRequest::new(audio, format).with_language(self.language.clone());
        let transcript = self
            .stt
            .transcribe(request)
            .await
            .map_err(|e| TranscriptionFailure::new(Stage::Transcribe, e))?;

        let Some(text) = transcript.spoken_text() else {
            return Err(TranscriptionFailure::new(
                Stage::Transcribe,
                anyhow!("{} returned an empty transcript", self.stt.id()),
            ));
        };
        Ok(text.to_string())
    }
}

async fn download(mut stream: ByteStream, path: &Path) -> anyhow::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    if written == 0 {
        anyhow::bail!("attachment is empty");
    }
    Ok(written)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .take(48)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
