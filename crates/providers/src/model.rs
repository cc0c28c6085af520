use {anyhow::Result, async_trait::async_trait, parley_common::Role};

/// One message in a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Message for a stored conversation turn.
    pub fn from_turn(role: Role, content: impl Into<String>) -> Self {
        match role {
            Role::User => Self::user(content),
            Role::Assistant => Self::assistant(content),
        }
    }

    #[must_use]
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content
            },
        }
    }

    /// Chat Completions wire form.
    #[must_use]
    pub fn to_openai_value(&self) -> serde_json::Value {
        serde_json::json!({ "role": self.role(), "content": self.content() })
    }
}

/// Language-model backend answering a conversation.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Provider identifier for logs (e.g. "openai").
    fn id(&self) -> &str;

    /// Return the assistant's answer to `messages`, oldest first.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// Image generator returning a URL to the rendered picture.
#[async_trait]
pub trait ImageGeneration: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T: ChatCompletion + ?Sized> ChatCompletion for std::sync::Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        (**self).complete(model, messages).await
    }
}

#[async_trait]
impl<T: ImageGeneration + ?Sized> ImageGeneration for std::sync::Arc<T> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt).await
    }
}
