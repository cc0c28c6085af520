//! Conversation sessions.
//!
//! A session is the rolling history of one sender in one chat. The
//! [`ConversationStore`] keeps each history under a size ceiling measured
//! by a pluggable [`SizeEstimator`], on top of a swappable
//! [`HistoryBackend`] (bounded in-memory map or JSONL files with file
//! locking).

pub mod backend;
pub mod error;
pub mod estimate;
pub mod message;
pub mod store;

pub use {
    backend::{HistoryBackend, JsonlBackend, MemoryBackend},
    error::{Error, Result},
    estimate::{CharCount, SizeEstimator, TokenApprox},
    message::Turn,
    store::ConversationStore,
};
