//! Per-event orchestration: admission, transcription, routing, history and
//! the reply.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use {
    parley_channels::{
        Decision, EventGate, IgnoreReason, InboundEvent, MessageContent, ReplySender, ReplyTarget,
        parse_event,
    },
    parley_providers::{ChatCompletion, ChatMessage, ImageGeneration},
    parley_sessions::ConversationStore,
    parley_voice::TranscriptionPipeline,
    tokio::time::Instant,
    tracing::{debug, info, warn},
};

use crate::{
    commands::{CommandRouter, Outcome},
    error::Failure,
    replies,
};

/// How an event ended up being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Ignored(IgnoreReason),
    /// Admitted and handed off; handling continues in the background.
    Accepted,
    Chat,
    Image,
    Cleared,
    Help,
    Unsupported,
    AudioFailed,
    BackendFailed,
    TimedOut,
    Malformed,
}

impl OutcomeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored(_) => "ignored",
            Self::Accepted => "accepted",
            Self::Chat => "chat",
            Self::Image => "image",
            Self::Cleared => "cleared",
            Self::Help => "help",
            Self::Unsupported => "unsupported",
            Self::AudioFailed => "audio_failed",
            Self::BackendFailed => "backend_failed",
            Self::TimedOut => "timed_out",
            Self::Malformed => "malformed",
        }
    }
}

/// Result reported back to the webhook layer for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlingResult {
    pub admitted: bool,
    pub outcome: OutcomeKind,
}

impl HandlingResult {
    fn ignored(reason: IgnoreReason) -> Self {
        Self {
            admitted: false,
            outcome: OutcomeKind::Ignored(reason),
        }
    }

    fn malformed() -> Self {
        Self {
            admitted: false,
            outcome: OutcomeKind::Malformed,
        }
    }
}

/// Dispatcher knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub model: String,
    /// Sent ahead of the history on every request, never stored.
    pub system_prompt: Option<String>,
    /// Mention placeholder removed from message text before routing.
    pub self_mention_marker: String,
    /// Upper bound on handling one admitted event. `None` disables it.
    pub event_budget: Option<Duration>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            system_prompt: None,
            self_mention_marker: "@_user_1".into(),
            event_budget: Some(Duration::from_secs(120)),
        }
    }
}

pub struct SessionDispatcher {
    gate: EventGate,
    router: CommandRouter,
    store: Arc<ConversationStore>,
    chat: Arc<dyn ChatCompletion>,
    images: Arc<dyn ImageGeneration>,
    replies: Arc<dyn ReplySender>,
    /// `None` when voice handling is disabled.
    transcription: Option<Arc<TranscriptionPipeline>>,
    settings: DispatcherSettings,
}

impl SessionDispatcher {
    pub fn new(
        gate: EventGate,
        store: Arc<ConversationStore>,
        chat: Arc<dyn ChatCompletion>,
        images: Arc<dyn ImageGeneration>,
        replies: Arc<dyn ReplySender>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            gate,
            router: CommandRouter::default(),
            store,
            chat,
            images,
            replies,
            transcription: None,
            settings,
        }
    }

    #[must_use]
    pub fn with_transcription(mut self, pipeline: Arc<TranscriptionPipeline>) -> Self {
        self.transcription = Some(pipeline);
        self
    }

    #[must_use]
    pub fn with_router(mut self, router: CommandRouter) -> Self {
        self.router = router;
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Handle one raw webhook delivery end to end. Never fails: every
    /// problem ends in a log line and, where the event was admitted, a fixed
    /// reply.
    pub async fn handle_inbound_event(&self, raw: &[u8]) -> HandlingResult {
        match self.accept(raw) {
            Ok(event) => HandlingResult {
                admitted: true,
                outcome: self.process_admitted(event).await,
            },
            Err(result) => result,
        }
    }

    pub async fn handle_event(&self, event: InboundEvent) -> HandlingResult {
        self.handle_event_at(event, SystemTime::now()).await
    }

    /// Like [`Self::handle_event`] with an explicit admission clock.
    pub async fn handle_event_at(&self, event: InboundEvent, now: SystemTime) -> HandlingResult {
        match self.admit(event, now) {
            Ok(event) => HandlingResult {
                admitted: true,
                outcome: self.process_admitted(event).await,
            },
            Err(result) => result,
        }
    }

    /// Parse and gate a raw delivery without doing any external work.
    ///
    /// An admitted event is already recorded by the dedupe cache, so the
    /// caller owns finishing it through [`Self::process_admitted`].
    pub fn accept(&self, raw: &[u8]) -> Result<InboundEvent, HandlingResult> {
        self.accept_at(raw, SystemTime::now())
    }

    /// Like [`Self::accept`] with an explicit admission clock.
    pub fn accept_at(&self, raw: &[u8], now: SystemTime) -> Result<InboundEvent, HandlingResult> {
        let event = parse_event(raw).map_err(|e| {
            warn!(error = %e, bytes = raw.len(), "dropping malformed event payload");
            HandlingResult::malformed()
        })?;
        self.admit(event, now)
    }

    fn admit(&self, event: InboundEvent, now: SystemTime) -> Result<InboundEvent, HandlingResult> {
        match self.gate.admit(&event, now) {
            Decision::Process => Ok(event),
            Decision::Ignore(reason) => Err(HandlingResult::ignored(reason)),
        }
    }

    /// Run an admitted event to completion: transcription, routing, history
    /// and the reply.
    ///
    /// The event budget bounds the backend calls only. History writes and
    /// the final reply always run once their inputs are ready.
    pub async fn process_admitted(&self, event: InboundEvent) -> OutcomeKind {
        info!(
            event_id = %event.event_id,
            session_id = %event.session_id,
            kind = event.message_kind.as_str(),
            "handling event"
        );

        let budget = Budget::start(self.settings.event_budget);
        let outcome = self.process(&event, &budget).await;

        debug!(
            event_id = %event.event_id,
            outcome = outcome.as_str(),
            "event handled"
        );
        outcome
    }

    async fn process(&self, event: &InboundEvent, budget: &Budget) -> OutcomeKind {
        let target = event.reply_target();
        match &event.content {
            MessageContent::Text(text) => self.handle_text(event, &target, text, budget).await,
            MessageContent::Audio { .. } => self.handle_audio(event, &target, budget).await,
            MessageContent::Other { message_type } => {
                debug!(event_id = %event.event_id, %message_type, "unsupported message type");
                self.reply(&target, replies::UNSUPPORTED).await;
                OutcomeKind::Unsupported
            },
        }
    }

    async fn handle_audio(
        &self,
        event: &InboundEvent,
        target: &ReplyTarget,
        budget: &Budget,
    ) -> OutcomeKind {
        let (Some(pipeline), Some(file)) = (&self.transcription, event.audio_file()) else {
            debug!(event_id = %event.event_id, "voice handling disabled");
            self.reply(target, replies::UNSUPPORTED).await;
            return OutcomeKind::Unsupported;
        };

        let Ok(transcribed) = budget.run(pipeline.transcribe(&file)).await else {
            return self
                .budget_expired(&event.session_id, target, budget, "transcription")
                .await;
        };
        match transcribed {
            Ok(text) => self.handle_text(event, target, &text, budget).await,
            Err(e) => {
                let failure = Failure::from_transcription(&e);
                warn!(
                    event_id = %event.event_id,
                    kind = failure.kind(),
                    error = %failure,
                    "voice message not processed"
                );
                self.reply(target, replies::AUDIO_FAILED).await;
                OutcomeKind::AudioFailed
            },
        }
    }

    async fn handle_text(
        &self,
        event: &InboundEvent,
        target: &ReplyTarget,
        raw: &str,
        budget: &Budget,
    ) -> OutcomeKind {
        let text = strip_marker(raw, &self.settings.self_mention_marker);
        let outcome = self.router.route(&text);
        debug!(event_id = %event.event_id, route = outcome.as_str(), "routed message");

        match outcome {
            Outcome::Chat { text } => self.chat(&event.session_id, target, &text, budget).await,
            Outcome::Image { prompt } => {
                self.image(&event.session_id, target, &prompt, budget)
                    .await
            },
            Outcome::Clear => self.clear(&event.session_id, target).await,
            Outcome::Help => {
                self.reply(target, replies::HELP).await;
                OutcomeKind::Help
            },
        }
    }

    async fn chat(
        &self,
        session_id: &str,
        target: &ReplyTarget,
        text: &str,
        budget: &Budget,
    ) -> OutcomeKind {
        let history = match self.store.append_user(session_id, text).await {
            Ok(history) => history,
            Err(e) => {
                let failure = Failure::io("history append", e);
                warn!(session_id, kind = failure.kind(), error = %failure, "chat aborted");
                self.reply(target, replies::BACKEND_FAILED).await;
                return OutcomeKind::BackendFailed;
            },
        };

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.settings.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(
            history
                .into_iter()
                .map(|turn| ChatMessage::from_turn(turn.role, turn.text)),
        );

        let Ok(completed) = budget
            .run(self.chat.complete(&self.settings.model, &messages))
            .await
        else {
            return self
                .budget_expired(session_id, target, budget, "chat completion")
                .await;
        };
        let answer = match completed {
            Ok(answer) => answer,
            Err(e) => {
                let failure = Failure::backend("chat completion", &e);
                warn!(
                    session_id,
                    provider = self.chat.id(),
                    kind = failure.kind(),
                    error = %failure,
                    "chat completion failed"
                );
                self.reply(target, replies::BACKEND_FAILED).await;
                return if failure.is_timeout() {
                    OutcomeKind::TimedOut
                } else {
                    OutcomeKind::BackendFailed
                };
            },
        };

        if let Err(e) = self.store.append_assistant_and_trim(session_id, &answer).await {
            let failure = Failure::io("history append", e);
            warn!(session_id, kind = failure.kind(), error = %failure, "answer not stored");
        }
        self.reply(target, &answer).await;
        OutcomeKind::Chat
    }

    async fn image(
        &self,
        session_id: &str,
        target: &ReplyTarget,
        prompt: &str,
        budget: &Budget,
    ) -> OutcomeKind {
        let Ok(generated) = budget.run(self.images.generate(prompt)).await else {
            return self
                .budget_expired(session_id, target, budget, "image generation")
                .await;
        };
        match generated {
            Ok(url) => {
                self.reply(target, &url).await;
                OutcomeKind::Image
            },
            Err(e) => {
                let failure = Failure::backend("image generation", &e);
                warn!(kind = failure.kind(), error = %failure, "image generation failed");
                self.reply(target, replies::IMAGE_FAILED).await;
                if failure.is_timeout() {
                    OutcomeKind::TimedOut
                } else {
                    OutcomeKind::BackendFailed
                }
            },
        }
    }

    async fn clear(&self, session_id: &str, target: &ReplyTarget) -> OutcomeKind {
        if let Err(e) = self.store.clear(session_id).await {
            let failure = Failure::io("history clear", e);
            warn!(session_id, kind = failure.kind(), error = %failure, "clear failed");
            self.reply(target, replies::BACKEND_FAILED).await;
            return OutcomeKind::BackendFailed;
        }
        self.reply(target, replies::CLEARED).await;
        OutcomeKind::Cleared
    }

    async fn budget_expired(
        &self,
        session_id: &str,
        target: &ReplyTarget,
        budget: &Budget,
        stage: &'static str,
    ) -> OutcomeKind {
        warn!(
            session_id,
            stage,
            budget_ms = budget.millis(),
            "event handling exceeded its budget"
        );
        self.reply(target, replies::BACKEND_FAILED).await;
        OutcomeKind::TimedOut
    }

    /// Best effort: a failed send is logged and otherwise ignored.
    async fn reply(&self, target: &ReplyTarget, text: &str) {
        if let Err(e) = self.replies.send_reply(target, text).await {
            let failure = Failure::delivery(&e);
            warn!(
                chat_id = %target.chat_id,
                message_id = %target.message_id,
                error = %failure,
                "reply not delivered"
            );
        }
    }
}

/// Deadline shared by the backend calls of one event.
struct Budget {
    limit: Option<Duration>,
    deadline: Option<Instant>,
}

/// The budget ran out before the wrapped call finished.
struct Expired;

impl Budget {
    fn start(limit: Option<Duration>) -> Self {
        Self {
            limit,
            deadline: limit.and_then(|limit| Instant::now().checked_add(limit)),
        }
    }

    async fn run<F: Future>(&self, call: F) -> Result<F::Output, Expired> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| Expired),
            None => Ok(call.await),
        }
    }

    fn millis(&self) -> u64 {
        self.limit
            .map_or(0, |limit| u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Remove every occurrence of the mention placeholder and trim.
fn strip_marker(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.trim().to_string();
    }
    text.replace(marker, " ").trim().to_string()
}
