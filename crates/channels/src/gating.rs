//! Admission control for inbound events.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};

use {parley_common::ChatKind, tracing::debug};

use crate::{dedupe::ProcessedEvents, event::InboundEvent};

/// Why an event was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreReason {
    Duplicate,
    SelfMessage,
    Stale,
    Unaddressed,
}

impl IgnoreReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::SelfMessage => "self",
            Self::Stale => "stale",
            Self::Unaddressed => "unaddressed",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission decision for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Process,
    Ignore(IgnoreReason),
}

/// Decides whether an inbound event is handled at all.
///
/// Rules run in a fixed order and the first match wins: duplicate,
/// then (after recording the id) self-message, stale, unaddressed.
pub struct EventGate {
    processed: Arc<dyn ProcessedEvents>,
    bot_identity: String,
    staleness: Duration,
}

impl EventGate {
    pub fn new(
        processed: Arc<dyn ProcessedEvents>,
        bot_identity: impl Into<String>,
        staleness: Duration,
    ) -> Self {
        Self {
            processed,
            bot_identity: bot_identity.into(),
            staleness,
        }
    }

    pub fn admit(&self, event: &InboundEvent, now: SystemTime) -> Decision {
        let decision = self.decide(event, now);
        if let Decision::Ignore(reason) = decision {
            debug!(
                event_id = %event.event_id,
                session_id = %event.session_id,
                %reason,
                "event ignored"
            );
        }
        decision
    }

    fn decide(&self, event: &InboundEvent, now: SystemTime) -> Decision {
        // Recording happens before any other check so a redelivery of an
        // event we rejected is still recognised as a duplicate.
        if self.processed.check_and_insert(&event.event_id) {
            return Decision::Ignore(IgnoreReason::Duplicate);
        }
        if event.sender_is_bot {
            return Decision::Ignore(IgnoreReason::SelfMessage);
        }
        if event.age(now) > self.staleness {
            return Decision::Ignore(IgnoreReason::Stale);
        }
        if event.chat_kind == ChatKind::Group && !event.mentions.contains(&self.bot_identity) {
            return Decision::Ignore(IgnoreReason::Unaddressed);
        }
        Decision::Process
    }
}
