//! Configuration validation.
//!
//! Detects unknown/misspelled keys against the known schema, type errors,
//! and settings that would make the gateway misbehave at runtime.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::schema::{HistoryBackendKind, ParleyConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "semantic", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "conversation.max_history_size"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let leaves = |keys: &[&'static str]| Struct(keys.iter().map(|k| (*k, Leaf)).collect());
    let policy = || leaves(&["attempts", "base_backoff_ms", "timeout_secs"]);

    Struct(HashMap::from([
        ("server", leaves(&["bind", "port", "webhook_path"])),
        (
            "bot",
            leaves(&["identity", "self_mention_marker", "model", "system_prompt"]),
        ),
        (
            "gate",
            leaves(&["staleness_secs", "dedupe_ttl_secs", "dedupe_max_entries"]),
        ),
        (
            "conversation",
            leaves(&[
                "max_history_size",
                "estimator",
                "backend",
                "max_sessions",
                "session_idle_secs",
                "data_dir",
            ]),
        ),
        (
            "voice",
            leaves(&[
                "enabled",
                "transcode",
                "target_format",
                "ffmpeg_path",
                "stt_model",
                "language",
            ]),
        ),
        (
            "providers",
            Struct(HashMap::from([(
                "openai",
                leaves(&["api_key", "base_url", "image_model", "image_size"]),
            )])),
        ),
        (
            "platform",
            leaves(&[
                "api_base",
                "app_token",
                "file_path_template",
                "reply_path_template",
            ]),
        ),
        (
            "reliability",
            Struct(HashMap::from([
                ("chat", policy()),
                ("image", policy()),
                ("transcription", policy()),
                ("file_fetch", policy()),
                ("transcode", policy()),
                ("credential", policy()),
                ("reply", policy()),
                ("event_budget_secs", Leaf),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        let mut result = validate_config(&ParleyConfig::default());
        result.diagnostics.insert(
            0,
            Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            ),
        );
        return result;
    };

    let mut result = match crate::loader::load_config_value(&actual_path) {
        Ok(value) => validate_value(&value),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                e.to_string(),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate a TOML string.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let value = match toml::from_str::<toml::Value>(toml_str)
        .map_err(|e| e.to_string())
        .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string()))
    {
        Ok(v) => v,
        Err(e) => {
            return ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    format!("TOML syntax error: {e}"),
                )],
                config_path: None,
            };
        },
    };
    validate_value(&value)
}

/// Validate a config tree already parsed into JSON form.
#[must_use]
pub fn validate_value(value: &serde_json::Value) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_unknown_fields(value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<ParleyConfig>(value.clone()) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on a fully typed config. Used at startup as well as by
/// `check-config`.
#[must_use]
pub fn validate_config(config: &ParleyConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();

    if config.bot.identity.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "bot.identity",
            "bot identity is empty; self-messages and group mentions cannot be recognized",
        ));
    }
    if config.bot.self_mention_marker.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "bot.self_mention_marker",
            "empty mention marker; group messages will keep the mention placeholder",
        ));
    }
    if config.conversation.max_history_size == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "conversation.max_history_size",
            "history budget must be greater than zero",
        ));
    }
    if config.conversation.max_sessions == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "conversation.max_sessions",
            "max_sessions must be greater than zero",
        ));
    }
    if config.conversation.backend == HistoryBackendKind::Jsonl
        && config.conversation.data_dir.is_none()
    {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "semantic",
            "conversation.data_dir",
            "no data_dir set; JSONL histories go to the platform data directory",
        ));
    }
    if config.gate.dedupe_max_entries == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "gate.dedupe_max_entries",
            "dedupe_max_entries must be greater than zero",
        ));
    }
    if config.providers.openai.api_key.is_none() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "providers.openai.api_key",
            "no API key configured; chat, image and transcription calls will fail",
        ));
    }
    if config.platform.app_token.is_none() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "platform.app_token",
            "no platform token configured; replies and file downloads will be rejected",
        ));
    }
    if config.voice.enabled
        && !["mp3", "ogg", "wav", "m4a", "webm"].contains(&config.voice.target_format.as_str())
    {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "voice.target_format",
            format!(
                "unsupported transcription format \"{}\"",
                config.voice.target_format
            ),
        ));
    }
    if !config.server.webhook_path.starts_with('/') {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "server.webhook_path",
            "webhook path must start with '/'",
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            message,
        ));
    }
}
