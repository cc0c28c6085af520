//! Narrow interfaces to the chat platform: outbound replies, attachment
//! downloads and the access credential both of them need.

use {
    anyhow::Result,
    async_trait::async_trait,
    bytes::Bytes,
    futures::stream::BoxStream,
    secrecy::{ExposeSecret, Secret},
};

use crate::event::{FileRef, ReplyTarget};

/// Chunked attachment body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Access credential for platform API calls.
#[derive(Clone)]
pub struct Credential(Secret<String>);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Supplies a currently valid access credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential>;
}

/// Downloads attachments from platform storage.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, file: &FileRef, credential: &Credential) -> Result<ByteStream>;
}

/// Sends a text reply to the chat an event came from.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reply(&self, target: &ReplyTarget, text: &str) -> Result<()>;
}

#[async_trait]
impl<T: CredentialProvider + ?Sized> CredentialProvider for std::sync::Arc<T> {
    async fn credential(&self) -> Result<Credential> {
        (**self).credential().await
    }
}

#[async_trait]
impl<T: FileFetcher + ?Sized> FileFetcher for std::sync::Arc<T> {
    async fn fetch(&self, file: &FileRef, credential: &Credential) -> Result<ByteStream> {
        (**self).fetch(file, credential).await
    }
}

#[async_trait]
impl<T: ReplySender + ?Sized> ReplySender for std::sync::Arc<T> {
    async fn send_reply(&self, target: &ReplyTarget, text: &str) -> Result<()> {
        (**self).send_reply(target, text).await
    }
}
