//! Builds the live collaborator graph from configuration.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    parley_auto_reply::{DispatcherSettings, Reliable, SessionDispatcher},
    parley_channels::{DedupeCache, EventGate, HttpPlatform, StaticCredential},
    parley_config::{EstimatorKind, HistoryBackendKind, ParleyConfig},
    parley_providers::OpenAiProvider,
    parley_sessions::{
        CharCount, ConversationStore, HistoryBackend, JsonlBackend, MemoryBackend, SizeEstimator,
        TokenApprox,
    },
    parley_voice::{AudioFormat, FfmpegTranscoder, Transcoder, TranscriptionPipeline, WhisperStt},
    tracing::{info, warn},
};

/// Everything the webhook route needs, wired from one config.
pub struct GatewayServices {
    pub dispatcher: Arc<SessionDispatcher>,
}

impl GatewayServices {
    pub fn from_config(config: &ParleyConfig) -> Result<Self> {
        let client = parley_providers::shared_http_client().clone();
        let reliability = &config.reliability;

        let credentials = Arc::new(Reliable::new(
            StaticCredential::new(config.platform.app_token.as_ref()),
            reliability.credential.to_policy(),
        ));
        let platform = Arc::new(HttpPlatform::new(
            client.clone(),
            config.platform.api_base.clone(),
            config.platform.file_path_template.clone(),
            config.platform.reply_path_template.clone(),
            credentials.clone(),
        ));

        let openai = &config.providers.openai;
        let provider = Arc::new(
            OpenAiProvider::new(openai.api_key.clone())
                .with_client(client.clone())
                .with_base_url(openai.base_url.clone())
                .with_image_options(openai.image_model.clone(), openai.image_size.clone()),
        );
        if !provider.is_configured() {
            warn!("no OpenAI API key configured; chat and image requests will fail");
        }

        let gate = EventGate::new(
            Arc::new(DedupeCache::new(
                config.gate.dedupe_ttl(),
                config.gate.dedupe_max_entries,
            )),
            config.bot.identity.clone(),
            config.gate.staleness(),
        );

        let settings = DispatcherSettings {
            model: config.bot.model.clone(),
            system_prompt: config.bot.system_prompt.clone(),
            self_mention_marker: config.bot.self_mention_marker.clone(),
            event_budget: reliability.event_budget(),
        };

        let mut dispatcher = SessionDispatcher::new(
            gate,
            Arc::new(build_store(config)?),
            Arc::new(Reliable::new(provider.clone(), reliability.chat.to_policy())),
            Arc::new(Reliable::new(provider, reliability.image.to_policy())),
            Arc::new(Reliable::new(platform.clone(), reliability.reply.to_policy())),
            settings,
        );

        if config.voice.enabled {
            let pipeline = build_pipeline(config, client, credentials, platform)?;
            dispatcher = dispatcher.with_transcription(Arc::new(pipeline));
        } else {
            info!("voice messages disabled");
        }

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
        })
    }
}

fn build_store(config: &ParleyConfig) -> Result<ConversationStore> {
    let conversation = &config.conversation;
    let estimator: Arc<dyn SizeEstimator> = match conversation.estimator {
        EstimatorKind::Chars => Arc::new(CharCount),
        EstimatorKind::Tokens => Arc::new(TokenApprox),
    };
    let backend: Arc<dyn HistoryBackend> = match conversation.backend {
        HistoryBackendKind::Memory => Arc::new(MemoryBackend::new(
            conversation.max_sessions,
            conversation.session_idle(),
        )),
        HistoryBackendKind::Jsonl => {
            let dir = sessions_dir(conversation.data_dir.clone())?;
            info!(dir = %dir.display(), "persisting sessions as JSONL");
            Arc::new(JsonlBackend::new(dir))
        },
    };
    Ok(ConversationStore::new(
        backend,
        estimator,
        conversation.max_history_size,
    ))
}

fn sessions_dir(configured: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match configured {
        Some(dir) => dir,
        None => parley_config::data_dir()
            .context("no data directory available; set conversation.data_dir")?
            .join("sessions"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create session dir {}", dir.display()))?;
    Ok(dir)
}

fn build_pipeline(
    config: &ParleyConfig,
    client: reqwest::Client,
    credentials: Arc<Reliable<StaticCredential>>,
    platform: Arc<HttpPlatform>,
) -> Result<TranscriptionPipeline> {
    let voice = &config.voice;
    let reliability = &config.reliability;
    let target: AudioFormat = voice
        .target_format
        .parse()
        .context("invalid voice.target_format")?;

    let transcoder: Option<Arc<dyn Transcoder>> = if voice.transcode {
        let ffmpeg = FfmpegTranscoder::new(voice.ffmpeg_path.clone());
        if !ffmpeg.is_available() {
            warn!("ffmpeg not found; voice messages will fail until it is installed");
        }
        Some(Arc::new(Reliable::new(
            ffmpeg,
            reliability.transcode.to_policy(),
        )))
    } else {
        None
    };

    let openai = &config.providers.openai;
    let stt = WhisperStt::new(openai.api_key.clone())
        .with_client(client)
        .with_base_url(openai.base_url.clone())
        .with_model(Some(voice.stt_model.clone()));

    Ok(TranscriptionPipeline::new(
        credentials,
        Arc::new(Reliable::new(platform, reliability.file_fetch.to_policy())),
        transcoder,
        Arc::new(Reliable::new(stt, reliability.transcription.to_policy())),
    )
    .with_target_format(target)
    .with_language(voice.language.clone()))
}
