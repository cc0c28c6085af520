//! Configuration loading, validation, and env substitution.
//!
//! Config files: `parley.toml`, `parley.yaml`, or `parley.json`
//! Searched in `./` then `~/.config/parley/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in all
//! string values, and `PARLEY_*` overrides for the common settings.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file,
        load_config,
    },
    schema::{
        BotConfig, CallPolicyConfig, ConversationConfig, EstimatorKind, GateConfig,
        HistoryBackendKind, OpenAiConfig, ParleyConfig, PlatformConfig, ProvidersConfig,
        ReliabilityConfig, ServerConfig, VoiceConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
