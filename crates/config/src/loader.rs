use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::{EstimatorKind, HistoryBackendKind, ParleyConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

/// Load config from the given path (any supported format), then apply
/// `PARLEY_*` environment overrides.
pub fn load_config(path: &Path) -> Result<ParleyConfig> {
    let mut config = parse_config(&read_substituted(path)?, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load the config file as a generic JSON value (after env substitution),
/// regardless of its on-disk format.
pub fn load_config_value(path: &Path) -> Result<serde_json::Value> {
    parse_config_value(&read_substituted(path)?, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parley/parley.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) if nothing loads.
pub fn discover_and_load() -> ParleyConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = ParleyConfig::default();
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/parley/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parley").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user-global data directory, used for JSONL histories when
/// `conversation.data_dir` is unset.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parley").map(|d| d.data_dir().to_path_buf())
}

/// Apply `PARLEY_*` environment overrides on top of file values.
pub fn apply_env_overrides(config: &mut ParleyConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

pub(crate) fn apply_env_overrides_with(
    config: &mut ParleyConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(bind) = var("PARLEY_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = var("PARLEY_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PARLEY_PORT"),
        }
    }
    if let Some(identity) = var("PARLEY_BOT_IDENTITY") {
        config.bot.identity = identity;
    }
    if let Some(model) = var("PARLEY_MODEL") {
        config.bot.model = model;
    }
    if let Some(size) = var("PARLEY_MAX_HISTORY_SIZE") {
        match size.parse() {
            Ok(size) => config.conversation.max_history_size = size,
            Err(e) => warn!(value = %size, error = %e, "ignoring invalid PARLEY_MAX_HISTORY_SIZE"),
        }
    }
    if let Some(estimator) = var("PARLEY_ESTIMATOR") {
        match estimator.as_str() {
            "chars" => config.conversation.estimator = EstimatorKind::Chars,
            "tokens" => config.conversation.estimator = EstimatorKind::Tokens,
            other => warn!(value = other, "ignoring invalid PARLEY_ESTIMATOR"),
        }
    }
    if let Some(backend) = var("PARLEY_HISTORY_BACKEND") {
        match backend.as_str() {
            "memory" => config.conversation.backend = HistoryBackendKind::Memory,
            "jsonl" => config.conversation.backend = HistoryBackendKind::Jsonl,
            other => warn!(value = other, "ignoring invalid PARLEY_HISTORY_BACKEND"),
        }
    }
    if let Some(dir) = var("PARLEY_DATA_DIR") {
        config.conversation.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(key) = var("PARLEY_OPENAI_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
        config.providers.openai.api_key = Some(Secret::new(key));
    }
    if let Some(url) = var("PARLEY_OPENAI_BASE_URL") {
        config.providers.openai.base_url = url;
    }
    if let Some(token) = var("PARLEY_APP_TOKEN") {
        config.platform.app_token = Some(Secret::new(token));
    }
    if let Some(base) = var("PARLEY_PLATFORM_API_BASE") {
        config.platform.api_base = base;
    }
}

fn read_substituted(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(substitute_env(&raw))
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> Result<ParleyConfig> {
    match extension(path) {
        "toml" => toml::from_str(raw).context("invalid TOML config"),
        "yaml" | "yml" => serde_yaml::from_str(raw).context("invalid YAML config"),
        "json" => serde_json::from_str(raw).context("invalid JSON config"),
        ext => Err(Error::message(format!("unsupported config format: .{ext}"))),
    }
}

fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    match extension(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw).context("invalid TOML config")?;
            serde_json::to_value(v).context("convert TOML config")
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid YAML config")?;
            serde_json::to_value(v).context("convert YAML config")
        },
        "json" => serde_json::from_str(raw).context("invalid JSON config"),
        ext => Err(Error::message(format!("unsupported config format: .{ext}"))),
    }
}
