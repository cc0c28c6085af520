//! Slash-command recognition.
//!
//! The router does no I/O. It only classifies text so the dispatcher can
//! decide what to do with it.

/// What the dispatcher should do with a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Free-form text for the language model.
    Chat { text: String },
    /// `/image <prompt>`. The prompt may be empty.
    Image { prompt: String },
    /// `/clear`
    Clear,
    /// `/help`, any unknown command, or nothing at all.
    Help,
}

impl Outcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Image { .. } => "image",
            Self::Clear => "clear",
            Self::Help => "help",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRouter {
    prefix: char,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self { prefix: '/' }
    }
}

impl CommandRouter {
    #[must_use]
    pub fn new(prefix: char) -> Self {
        Self { prefix }
    }

    /// Classify already-cleaned user text. Command names are matched
    /// case-insensitively.
    #[must_use]
    pub fn route(&self, text: &str) -> Outcome {
        let text = text.trim();
        if text.is_empty() {
            return Outcome::Help;
        }
        let Some(rest) = text.strip_prefix(self.prefix) else {
            return Outcome::Chat {
                text: text.to_string(),
            };
        };

        let (head, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        };

        match head.to_ascii_lowercase().as_str() {
            "image" => Outcome::Image {
                prompt: args.to_string(),
            },
            "clear" => Outcome::Clear,
            _ => Outcome::Help,
        }
    }
}
