//! Chat platform boundary.
//!
//! Parses inbound webhook payloads into [`InboundEvent`]s, decides which
//! of them are admitted ([`EventGate`]), and defines the outbound
//! collaborators (replies, attachment downloads, credentials) together
//! with their HTTP implementations.

pub mod dedupe;
pub mod error;
pub mod event;
pub mod gating;
pub mod outbound;
pub mod plugin;

pub use {
    dedupe::{DedupeCache, ProcessedEvents},
    error::{Error, Result},
    event::{FileRef, InboundEvent, MessageContent, ReplyTarget, parse_event},
    gating::{Decision, EventGate, IgnoreReason},
    outbound::{HttpPlatform, StaticCredential},
    plugin::{ByteStream, Credential, CredentialProvider, FileFetcher, ReplySender},
};
