//! Response helpers shared by OpenAI-compatible endpoints.

/// Token usage reported by a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

fn usage_field_u32(usage: &serde_json::Value, keys: &[&str]) -> u32 {
    keys.iter()
        .find_map(|key| {
            let value = usage.get(*key)?;
            value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        })
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Read `usage` from a completion payload. Some compatible servers use
/// `input_tokens`/`output_tokens` instead of the OpenAI field names.
#[must_use]
pub fn parse_usage(payload: &serde_json::Value) -> Option<Usage> {
    let usage = payload.get("usage").filter(|u| u.is_object())?;
    Some(Usage {
        input_tokens: usage_field_u32(usage, &["prompt_tokens", "input_tokens"]),
        output_tokens: usage_field_u32(usage, &["completion_tokens", "output_tokens"]),
    })
}

/// Split `<think>...</think>` reasoning out of model output.
///
/// Returns `(visible, thinking)`. An unclosed `<think>` turns the rest of
/// the text into reasoning.
pub fn strip_think_tags(content: &str) -> (String, String) {
    let mut visible = String::new();
    let mut thinking = String::new();
    let mut remaining = content;

    loop {
        match remaining.find("<think>") {
            Some(start) => {
                visible.push_str(&remaining[..start]);
                let after_open = &remaining[start + "<think>".len()..];
                match after_open.find("</think>") {
                    Some(end) => {
                        thinking.push_str(&after_open[..end]);
                        remaining = &after_open[end + "</think>".len()..];
                    },
                    None => {
                        thinking.push_str(after_open);
                        break;
                    },
                }
            },
            None => {
                visible.push_str(remaining);
                break;
            },
        }
    }

    (
        visible.trim_start().to_string(),
        thinking.trim_start().to_string(),
    )
}

/// Extract the assistant text from a Chat Completions response body.
///
/// Reasoning models sometimes leave `content` empty and put everything in
/// `reasoning_content`; that is used as a fallback.
#[must_use]
pub fn extract_answer(payload: &serde_json::Value) -> Option<String> {
    let message = payload.get("choices")?.get(0)?.get("message")?;
    let content = message
        .get("content")
        .and_then(serde_json::Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .or_else(|| {
            message
                .get("reasoning_content")
                .and_then(serde_json::Value::as_str)
        })?;
    let (visible, _thinking) = strip_think_tags(content);
    Some(visible.trim_end().to_string())
}
