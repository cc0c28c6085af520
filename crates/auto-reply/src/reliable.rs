//! Retry and deadline decorators for collaborators.
//!
//! [`Reliable`] wraps any collaborator and runs every call through a
//! [`CallPolicy`], so the dispatcher and the transcription pipeline stay
//! unaware of retries.

use std::path::{Path, PathBuf};

use {
    anyhow::Result,
    async_trait::async_trait,
    parley_channels::{
        ByteStream, Credential, CredentialProvider, FileFetcher, FileRef, ReplySender, ReplyTarget,
    },
    parley_common::CallPolicy,
    parley_providers::{ChatCompletion, ChatMessage, ImageGeneration},
    parley_voice::{AudioFormat, SttProvider, TranscribeRequest, Transcoder, Transcript},
};

/// A collaborator whose calls follow `policy`.
#[derive(Debug, Clone)]
pub struct Reliable<T> {
    inner: T,
    policy: CallPolicy,
}

impl<T> Reliable<T> {
    pub fn new(inner: T, policy: CallPolicy) -> Self {
        Self { inner, policy }
    }

    #[must_use]
    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: ChatCompletion> ChatCompletion for Reliable<T> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        self.policy
            .run("chat completion", move || self.inner.complete(model, messages))
            .await
    }
}

#[async_trait]
impl<T: ImageGeneration> ImageGeneration for Reliable<T> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.policy
            .run("image generation", move || self.inner.generate(prompt))
            .await
    }
}

#[async_trait]
impl<T: SttProvider> SttProvider for Reliable<T> {
    fn id(&self) -> &'static str {
        self.inner.id()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript> {
        self.policy
            .run("transcription", move || self.inner.transcribe(request.clone()))
            .await
    }
}

#[async_trait]
impl<T: Transcoder> Transcoder for Reliable<T> {
    async fn transcode(&self, input: &Path, target: AudioFormat) -> Result<PathBuf> {
        self.policy
            .run("transcode", move || self.inner.transcode(input, target))
            .await
    }
}

#[async_trait]
impl<T: FileFetcher> FileFetcher for Reliable<T> {
    /// Only opening the stream is retried; a body that breaks mid-way
    /// fails the download.
    async fn fetch(&self, file: &FileRef, credential: &Credential) -> Result<ByteStream> {
        self.policy
            .run("file fetch", move || self.inner.fetch(file, credential))
            .await
    }
}

#[async_trait]
impl<T: CredentialProvider> CredentialProvider for Reliable<T> {
    async fn credential(&self) -> Result<Credential> {
        self.policy
            .run("credential", move || self.inner.credential())
            .await
    }
}

#[async_trait]
impl<T: ReplySender> ReplySender for Reliable<T> {
    async fn send_reply(&self, target: &ReplyTarget, text: &str) -> Result<()> {
        self.policy
            .run("reply", move || self.inner.send_reply(target, text))
            .await
    }
}
