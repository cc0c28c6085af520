#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    bytes::Bytes,
    futures::StreamExt,
    parley_auto_reply::{DispatcherSettings, OutcomeKind, SessionDispatcher, replies},
    parley_channels::{
        ByteStream, Credential, CredentialProvider, DedupeCache, EventGate, FileFetcher, FileRef,
        IgnoreReason, ReplySender, ReplyTarget,
    },
    parley_common::Role,
    parley_providers::{ChatCompletion, ChatMessage, ImageGeneration},
    parley_sessions::{CharCount, ConversationStore, MemoryBackend},
    parley_voice::{
        AudioFormat, SttProvider, TranscribeRequest, Transcoder, Transcript, TranscriptionPipeline,
    },
    serde_json::json,
};

const BOT: &str = "ou_bot";

// ── Mock collaborators ─────────────────────────────────────────────────────

#[derive(Default)]
struct MockChat {
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    fail: AtomicBool,
    delay: Option<Duration>,
}

#[async_trait]
impl ChatCompletion for MockChat {
    fn id(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("HTTP 500: upstream exploded");
        }
        let last = messages.last().map(ChatMessage::content).unwrap_or_default();
        Ok(format!("echo: {last}"))
    }
}

#[derive(Default)]
struct MockImages {
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl ImageGeneration for MockImages {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            anyhow::bail!("content policy violation");
        }
        Ok(format!("https://img.example/{}.png", prompt.replace(' ', "-")))
    }
}

#[derive(Default)]
struct RecordingReplies {
    sent: Mutex<Vec<(ReplyTarget, String)>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingReplies {
    fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ReplySender for RecordingReplies {
    async fn send_reply(&self, target: &ReplyTarget, text: &str) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), text.to_string()));
        if self.fail {
            anyhow::bail!("HTTP 400: message recalled");
        }
        Ok(())
    }
}

struct FixedCredential;

#[async_trait]
impl CredentialProvider for FixedCredential {
    async fn credential(&self) -> Result<Credential> {
        Ok(Credential::new("t-test"))
    }
}

struct VoiceNote;

#[async_trait]
impl FileFetcher for VoiceNote {
    async fn fetch(&self, _file: &FileRef, _credential: &Credential) -> Result<ByteStream> {
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"OggS-voice"))];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[derive(Default)]
struct MockTranscoder {
    fail: bool,
    inputs: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn transcode(&self, input: &Path, target: AudioFormat) -> Result<PathBuf> {
        self.inputs.lock().unwrap().push(input.to_path_buf());
        if self.fail {
            anyhow::bail!("ffmpeg: invalid data found when processing input");
        }
        let out = input.with_extension(target.extension());
        tokio::fs::copy(input, &out).await?;
        Ok(out)
    }
}

struct MockStt {
    text: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl SttProvider for MockStt {
    fn id(&self) -> &'static str {
        "mock-stt"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn transcribe(&self, _request: TranscribeRequest) -> Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Transcript {
            text: self.text.into(),
            language: None,
            duration_seconds: None,
        })
    }
}

// ── Harness ────────────────────────────────────────────────────────────────

struct Harness {
    dispatcher: SessionDispatcher,
    chat: Arc<MockChat>,
    images: Arc<MockImages>,
    replies: Arc<RecordingReplies>,
}

struct Options {
    chat: MockChat,
    images: MockImages,
    replies: RecordingReplies,
    settings: DispatcherSettings,
    max_size: usize,
    pipeline: Option<TranscriptionPipeline>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chat: MockChat::default(),
            images: MockImages::default(),
            replies: RecordingReplies::default(),
            settings: DispatcherSettings::default(),
            max_size: 10_000,
            pipeline: None,
        }
    }
}

fn harness(options: Options) -> Harness {
    let gate = EventGate::new(
        Arc::new(DedupeCache::new(Duration::from_secs(3600), 1000)),
        BOT,
        Duration::from_secs(30),
    );
    let store = Arc::new(ConversationStore::new(
        Arc::new(MemoryBackend::new(100, None)),
        Arc::new(CharCount),
        options.max_size,
    ));
    let chat = Arc::new(options.chat);
    let images = Arc::new(options.images);
    let replies = Arc::new(options.replies);
    let mut dispatcher = SessionDispatcher::new(
        gate,
        store,
        chat.clone(),
        images.clone(),
        replies.clone(),
        options.settings,
    );
    if let Some(pipeline) = options.pipeline {
        dispatcher = dispatcher.with_transcription(Arc::new(pipeline));
    }
    Harness {
        dispatcher,
        chat,
        images,
        replies,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

struct Payload {
    event_id: String,
    create_ms: u64,
    chat_type: &'static str,
    sender_type: &'static str,
    message_type: &'static str,
    content: serde_json::Value,
    mentions: Vec<&'static str>,
}

impl Payload {
    fn text(event_id: &str, text: &str) -> Self {
        Self {
            event_id: event_id.into(),
            create_ms: now_ms(),
            chat_type: "p2p",
            sender_type: "user",
            message_type: "text",
            content: json!({ "text": text }),
            mentions: Vec::new(),
        }
    }

    fn audio(event_id: &str) -> Self {
        Self {
            message_type: "audio",
            content: json!({ "file_key": "file_v2_voice", "duration": 2300 }),
            ..Self::text(event_id, "")
        }
    }

    fn bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "schema": "2.0",
            "header": {
                "event_id": self.event_id,
                "event_type": "im.message.receive_v1",
                "create_time": self.create_ms.to_string(),
            },
            "event": {
                "sender": {
                    "sender_id": { "open_id": "ou_alice" },
                    "sender_type": self.sender_type,
                },
                "message": {
                    "message_id": format!("om_{}", self.event_id),
                    "chat_id": "oc_chat",
                    "chat_type": self.chat_type,
                    "message_type": self.message_type,
                    "content": self.content.to_string(),
                    "mentions": self.mentions.iter().map(|id| json!({
                        "key": "@_user_1",
                        "id": { "open_id": id },
                        "name": "parley",
                    })).collect::<Vec<_>>(),
                },
            },
        }))
        .unwrap()
    }
}

const SESSION: &str = "oc_chat:ou_alice";

// ── Admission ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_delivery_is_processed_once() {
    let h = harness(Options::default());

    let first = h
        .dispatcher
        .handle_inbound_event(&Payload::text("e1", "hello").bytes())
        .await;
    assert!(first.admitted);
    assert_eq!(first.outcome, OutcomeKind::Chat);

    let mut retry = Payload::text("e1", "hello");
    retry.create_ms += 1500;
    let second = h.dispatcher.handle_inbound_event(&retry.bytes()).await;
    assert!(!second.admitted);
    assert_eq!(second.outcome, OutcomeKind::Ignored(IgnoreReason::Duplicate));

    assert_eq!(h.chat.requests.lock().unwrap().len(), 1);
    assert_eq!(h.replies.texts(), vec!["echo: hello".to_string()]);
}

#[tokio::test]
async fn accepted_event_is_finished_separately() {
    let h = harness(Options::default());
    let raw = Payload::text("a1", "hello").bytes();

    let event = h.dispatcher.accept(&raw).unwrap();
    assert!(h.replies.texts().is_empty());

    let again = h.dispatcher.accept(&raw).unwrap_err();
    assert_eq!(again.outcome, OutcomeKind::Ignored(IgnoreReason::Duplicate));

    assert_eq!(h.dispatcher.process_admitted(event).await, OutcomeKind::Chat);
    assert_eq!(h.replies.texts(), vec!["echo: hello".to_string()]);
}

#[tokio::test]
async fn stale_event_makes_no_external_calls() {
    let h = harness(Options::default());
    let mut payload = Payload::text("e-old", "/image cat");
    payload.create_ms -= 5 * 60 * 1000;

    let result = h.dispatcher.handle_inbound_event(&payload.bytes()).await;
    assert_eq!(result.outcome, OutcomeKind::Ignored(IgnoreReason::Stale));
    assert!(h.images.prompts.lock().unwrap().is_empty());
    assert!(h.replies.texts().is_empty());
}

#[tokio::test]
async fn bot_messages_are_ignored() {
    let h = harness(Options::default());
    let mut payload = Payload::text("e-bot", "echo: loop");
    payload.sender_type = "app";
    let result = h.dispatcher.handle_inbound_event(&payload.bytes()).await;
    assert_eq!(result.outcome, OutcomeKind::Ignored(IgnoreReason::SelfMessage));
    assert!(h.chat.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn group_messages_need_a_mention() {
    let h = harness(Options::default());

    let mut unaddressed = Payload::text("g1", "anyone there?");
    unaddressed.chat_type = "group";
    let result = h.dispatcher.handle_inbound_event(&unaddressed.bytes()).await;
    assert_eq!(result.outcome, OutcomeKind::Ignored(IgnoreReason::Unaddressed));

    let mut other_mention = Payload::text("g2", "@_user_1 hi");
    other_mention.chat_type = "group";
    other_mention.mentions = vec!["ou_someone_else"];
    let result = h.dispatcher.handle_inbound_event(&other_mention.bytes()).await;
    assert_eq!(result.outcome, OutcomeKind::Ignored(IgnoreReason::Unaddressed));

    let mut addressed = Payload::text("g3", "@_user_1 what time is it");
    addressed.chat_type = "group";
    addressed.mentions = vec![BOT];
    let result = h.dispatcher.handle_inbound_event(&addressed.bytes()).await;
    assert_eq!(result.outcome, OutcomeKind::Chat);
    assert_eq!(h.replies.texts(), vec!["echo: what time is it".to_string()]);
}

#[tokio::test]
async fn malformed_payload_is_reported_not_raised() {
    let h = harness(Options::default());
    let result = h.dispatcher.handle_inbound_event(b"{not json").await;
    assert!(!result.admitted);
    assert_eq!(result.outcome, OutcomeKind::Malformed);

    let mut weird_chat = Payload::text("e-weird", "hi");
    weird_chat.chat_type = "channel";
    let result = h.dispatcher.handle_inbound_event(&weird_chat.bytes()).await;
    assert_eq!(result.outcome, OutcomeKind::Malformed);
    assert!(h.replies.texts().is_empty());
}

// ── Commands and chat ──────────────────────────────────────────────────────

#[tokio::test]
async fn chat_keeps_history_and_prepends_system_prompt() {
    let h = harness(Options {
        settings: DispatcherSettings {
            system_prompt: Some("You are terse.".into()),
            ..DispatcherSettings::default()
        },
        ..Options::default()
    });

    h.dispatcher
        .handle_inbound_event(&Payload::text("c1", "first").bytes())
        .await;
    h.dispatcher
        .handle_inbound_event(&Payload::text("c2", "second").bytes())
        .await;

    let requests = h.chat.requests.lock().unwrap().clone();
    assert_eq!(requests[1], vec![
        ChatMessage::system("You are terse."),
        ChatMessage::user("first"),
        ChatMessage::assistant("echo: first"),
        ChatMessage::user("second"),
    ]);

    let history = h.dispatcher.store().history(SESSION).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|t| t.text != "You are terse."));
    assert_eq!(history[3].role, Role::Assistant);
}

#[tokio::test]
async fn clear_forgets_the_session() {
    let h = harness(Options::default());
    h.dispatcher
        .handle_inbound_event(&Payload::text("k1", "remember me").bytes())
        .await;

    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("k2", "/clear").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::Cleared);
    assert!(h.dispatcher.store().history(SESSION).await.unwrap().is_empty());
    assert_eq!(h.replies.texts().last().map(String::as_str), Some(replies::CLEARED));

    h.dispatcher
        .handle_inbound_event(&Payload::text("k3", "fresh start").bytes())
        .await;
    let last = h.chat.requests.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last, vec![ChatMessage::user("fresh start")]);
}

#[tokio::test]
async fn image_and_help_commands() {
    let h = harness(Options::default());

    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("i1", "/image a red fox").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::Image);

    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("i2", "/foo").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::Help);

    assert_eq!(h.replies.texts(), vec![
        "https://img.example/a-red-fox.png".to_string(),
        replies::HELP.to_string(),
    ]);
    assert!(h.chat.requests.lock().unwrap().is_empty());
    assert!(h.dispatcher.store().history(SESSION).await.unwrap().is_empty());
}

#[tokio::test]
async fn image_failure_sends_fixed_text() {
    let h = harness(Options {
        images: MockImages {
            fail: true,
            ..MockImages::default()
        },
        ..Options::default()
    });
    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("i3", "/image").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::BackendFailed);
    assert_eq!(h.images.prompts.lock().unwrap().as_slice(), [String::new()]);
    assert_eq!(h.replies.texts(), vec![replies::IMAGE_FAILED.to_string()]);
}

#[tokio::test]
async fn backend_failure_sends_apology() {
    let h = harness(Options::default());
    h.chat.fail.store(true, Ordering::SeqCst);
    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("b1", "hello").bytes())
        .await;
    assert!(result.admitted);
    assert_eq!(result.outcome, OutcomeKind::BackendFailed);
    assert_eq!(h.replies.texts(), vec![replies::BACKEND_FAILED.to_string()]);
}

#[tokio::test]
async fn delivery_failure_still_counts_as_handled() {
    let h = harness(Options {
        replies: RecordingReplies {
            fail: true,
            ..RecordingReplies::default()
        },
        ..Options::default()
    });
    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("d1", "hello").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::Chat);
    assert_eq!(h.replies.sent.lock().unwrap().len(), 1);
    assert_eq!(h.dispatcher.store().history(SESSION).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unsupported_message_type() {
    let h = harness(Options::default());
    let mut payload = Payload::text("u1", "");
    payload.message_type = "image";
    payload.content = json!({ "image_key": "img_v2_x" });
    let result = h.dispatcher.handle_inbound_event(&payload.bytes()).await;
    assert_eq!(result.outcome, OutcomeKind::Unsupported);
    assert_eq!(h.replies.texts(), vec![replies::UNSUPPORTED.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn event_budget_expiry_sends_apology() {
    let h = harness(Options {
        chat: MockChat {
            delay: Some(Duration::from_secs(600)),
            ..MockChat::default()
        },
        settings: DispatcherSettings {
            event_budget: Some(Duration::from_secs(5)),
            ..DispatcherSettings::default()
        },
        ..Options::default()
    });
    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("t1", "take your time").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::TimedOut);
    assert_eq!(h.replies.texts(), vec![replies::BACKEND_FAILED.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn slow_reply_is_not_cut_off_by_the_budget() {
    let h = harness(Options {
        replies: RecordingReplies {
            delay: Some(Duration::from_secs(30)),
            ..RecordingReplies::default()
        },
        settings: DispatcherSettings {
            event_budget: Some(Duration::from_secs(5)),
            ..DispatcherSettings::default()
        },
        ..Options::default()
    });
    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::text("t2", "hello").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::Chat);
    assert_eq!(h.replies.texts(), vec!["echo: hello".to_string()]);
    assert_eq!(h.dispatcher.store().history(SESSION).await.unwrap().len(), 2);
}

#[tokio::test]
async fn history_stays_within_ceiling_across_many_events() {
    let ceiling = 120;
    let h = harness(Options {
        max_size: ceiling,
        ..Options::default()
    });
    for i in 0..50 {
        h.dispatcher
            .handle_inbound_event(&Payload::text(&format!("m{i}"), &format!("message {i}")).bytes())
            .await;
    }
    let history = h.dispatcher.store().history(SESSION).await.unwrap();
    let total: usize = history.iter().map(|t| t.text.chars().count()).sum();
    assert!(total <= ceiling);
    assert!(!history.iter().any(|t| t.text == "message 0"));
    assert_eq!(history.last().unwrap().text, "echo: message 49");
}

// ── Voice ──────────────────────────────────────────────────────────────────

fn pipeline(
    transcoder: Arc<MockTranscoder>,
    stt: Arc<MockStt>,
    temp_root: &Path,
) -> TranscriptionPipeline {
    TranscriptionPipeline::new(
        Arc::new(FixedCredential),
        Arc::new(VoiceNote),
        Some(transcoder),
        stt,
    )
    .with_temp_root(Some(temp_root.to_path_buf()))
}

#[tokio::test]
async fn voice_message_is_answered_like_text() {
    let temp = tempfile::tempdir().unwrap();
    let transcoder = Arc::new(MockTranscoder::default());
    let stt = Arc::new(MockStt {
        text: " what's the weather ",
        calls: AtomicUsize::new(0),
    });
    let h = harness(Options {
        pipeline: Some(pipeline(transcoder, stt.clone(), temp.path())),
        ..Options::default()
    });

    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::audio("v1").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::Chat);
    assert_eq!(stt.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.replies.texts(), vec!["echo: what's the weather".to_string()]);
    assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn transcode_failure_cleans_up_and_skips_transcription() {
    let temp = tempfile::tempdir().unwrap();
    let transcoder = Arc::new(MockTranscoder {
        fail: true,
        ..MockTranscoder::default()
    });
    let stt = Arc::new(MockStt {
        text: "unused",
        calls: AtomicUsize::new(0),
    });
    let h = harness(Options {
        pipeline: Some(pipeline(transcoder.clone(), stt.clone(), temp.path())),
        ..Options::default()
    });

    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::audio("v2").bytes())
        .await;
    assert!(result.admitted);
    assert_eq!(result.outcome, OutcomeKind::AudioFailed);
    assert_eq!(stt.calls.load(Ordering::SeqCst), 0);

    let downloaded = transcoder.inputs.lock().unwrap()[0].clone();
    assert!(!downloaded.exists());
    assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
    assert_eq!(h.replies.texts(), vec![replies::AUDIO_FAILED.to_string()]);
    assert!(h.chat.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn voice_disabled_replies_unsupported() {
    let h = harness(Options::default());
    let result = h
        .dispatcher
        .handle_inbound_event(&Payload::audio("v3").bytes())
        .await;
    assert_eq!(result.outcome, OutcomeKind::Unsupported);
}
