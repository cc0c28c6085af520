//! Shared types, error definitions, and call-policy helpers used across all
//! parley crates.

pub mod error;
pub mod retry;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    retry::CallPolicy,
    types::{ChatKind, MessageKind, Role},
};
