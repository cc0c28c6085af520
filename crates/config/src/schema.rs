/// Config schema types (server, bot identity, gate, conversation, voice,
/// providers, platform, reliability).
use std::{path::PathBuf, time::Duration};

use {
    parley_common::CallPolicy,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub bot: BotConfig,
    pub gate: GateConfig,
    pub conversation: ConversationConfig,
    pub voice: VoiceConfig,
    pub providers: ProvidersConfig,
    pub platform: PlatformConfig,
    pub reliability: ReliabilityConfig,
}

/// Webhook server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
    /// Path the chat platform posts events to.
    pub webhook_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            webhook_path: "/webhook/event".into(),
        }
    }
}

/// How the bot identifies itself on the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Identifier the platform puts in `mentions` when the bot is addressed.
    pub identity: String,
    /// Placeholder token the platform leaves in message text for the
    /// mention (e.g. `@_user_1`). Stripped before routing.
    pub self_mention_marker: String,
    /// Chat model used for free-form conversation.
    pub model: String,
    /// Optional system prompt sent ahead of the history. Never stored.
    pub system_prompt: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            self_mention_marker: "@_user_1".into(),
            model: "gpt-4o-mini".into(),
            system_prompt: None,
        }
    }
}

/// Admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Events older than this are ignored as stale.
    pub staleness_secs: u64,
    /// How long a processed event id is remembered.
    pub dedupe_ttl_secs: u64,
    /// Upper bound on remembered event ids; the oldest is evicted first.
    pub dedupe_max_entries: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 30,
            dedupe_ttl_secs: 24 * 60 * 60,
            dedupe_max_entries: 10_000,
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    #[must_use]
    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }
}

/// Size metric used to enforce the history budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Unicode scalar count.
    Chars,
    /// Rough token count (about four characters per token).
    #[default]
    Tokens,
}

/// Where session histories live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackendKind {
    /// Volatile, bounded in-memory map.
    #[default]
    Memory,
    /// One JSONL file per session under `data_dir`.
    Jsonl,
}

/// Rolling conversation window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Budget ceiling for the summed size of a session's turns.
    pub max_history_size: usize,
    pub estimator: EstimatorKind,
    pub backend: HistoryBackendKind,
    /// In-memory backend: maximum number of live sessions.
    pub max_sessions: usize,
    /// In-memory backend: evict sessions idle for longer than this. `0` disables.
    pub session_idle_secs: u64,
    /// JSONL backend: directory holding session files.
    pub data_dir: Option<PathBuf>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history_size: 4096,
            estimator: EstimatorKind::default(),
            backend: HistoryBackendKind::default(),
            max_sessions: 1000,
            session_idle_secs: 0,
            data_dir: None,
        }
    }
}

impl ConversationConfig {
    #[must_use]
    pub fn session_idle(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }
}

/// Audio transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
    /// Convert downloads before transcription. Disable only when the
    /// platform already delivers `target_format`.
    pub transcode: bool,
    /// Container the transcription backend expects ("mp3", "ogg", "wav").
    pub target_format: String,
    /// Explicit ffmpeg binary; falls back to PATH lookup.
    pub ffmpeg_path: Option<String>,
    pub stt_model: String,
    /// Language hint (ISO 639-1).
    pub language: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transcode: true,
            target_format: "mp3".into(),
            ffmpeg_path: None,
            stt_model: "whisper-1".into(),
            language: None,
        }
    }
}

/// LLM / image / speech backend credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: OpenAiConfig,
}

/// OpenAI-compatible endpoint used for chat, images and transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    pub base_url: String,
    pub image_model: String,
    pub image_size: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            image_model: "dall-e-3".into(),
            image_size: "1024x1024".into(),
        }
    }
}

/// Chat platform endpoints and the static access credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub api_base: String,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_token: Option<Secret<String>>,
    /// Relative path for file downloads; `{message_id}` and `{file_key}`
    /// are substituted.
    pub file_path_template: String,
    /// Relative path for replies; `{message_id}` is substituted.
    pub reply_path_template: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: "https://open.feishu.cn/open-apis".into(),
            app_token: None,
            file_path_template: "/im/v1/messages/{message_id}/resources/{file_key}?type=file"
                .into(),
            reply_path_template: "/im/v1/messages/{message_id}/reply".into(),
        }
    }
}

/// Retry/timeout policy for one collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicyConfig {
    pub attempts: u32,
    pub base_backoff_ms: u64,
    /// Per-attempt deadline. `0` disables the deadline.
    pub timeout_secs: u64,
}

impl Default for CallPolicyConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff_ms: 200,
            timeout_secs: 30,
        }
    }
}

impl CallPolicyConfig {
    const fn single(timeout_secs: u64) -> Self {
        Self {
            attempts: 1,
            base_backoff_ms: 0,
            timeout_secs,
        }
    }

    #[must_use]
    pub fn to_policy(&self) -> CallPolicy {
        CallPolicy {
            attempts: self.attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
        }
    }
}

/// Per-collaborator call policies plus the overall per-event budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub chat: CallPolicyConfig,
    pub image: CallPolicyConfig,
    pub transcription: CallPolicyConfig,
    pub file_fetch: CallPolicyConfig,
    pub transcode: CallPolicyConfig,
    pub credential: CallPolicyConfig,
    /// Outbound replies are never retried by default.
    pub reply: CallPolicyConfig,
    /// Wall-clock budget for handling one admitted event. `0` disables it.
    pub event_budget_secs: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            chat: CallPolicyConfig {
                timeout_secs: 60,
                ..CallPolicyConfig::default()
            },
            image: CallPolicyConfig {
                attempts: 2,
                timeout_secs: 90,
                ..CallPolicyConfig::default()
            },
            transcription: CallPolicyConfig::default(),
            file_fetch: CallPolicyConfig::default(),
            transcode: CallPolicyConfig::single(30),
            credential: CallPolicyConfig::default(),
            reply: CallPolicyConfig::single(10),
            event_budget_secs: 120,
        }
    }
}

impl ReliabilityConfig {
    #[must_use]
    pub fn event_budget(&self) -> Option<Duration> {
        (self.event_budget_secs > 0).then(|| Duration::from_secs(self.event_budget_secs))
    }
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
