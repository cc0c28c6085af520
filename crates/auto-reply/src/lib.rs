//! Inbound event handling: the glue between the chat platform, the
//! conversation store and the model backends.
//!
//! Flow: raw payload → parse → admission gate → (voice transcription) →
//! command routing → history + model call → reply.

pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod reliable;
pub mod replies;

pub use {
    commands::{CommandRouter, Outcome},
    dispatcher::{DispatcherSettings, HandlingResult, OutcomeKind, SessionDispatcher},
    error::Failure,
    reliable::Reliable,
};
