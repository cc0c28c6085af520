//! Language-model collaborators: chat completion and image generation.

pub mod model;
pub mod openai;
pub mod openai_compat;

pub use {
    model::{ChatCompletion, ChatMessage, ImageGeneration},
    openai::OpenAiProvider,
};

/// Shared HTTP client for providers.
///
/// Providers that don't need custom redirect/proxy settings reuse this
/// client to share connection pools, DNS cache, and TLS sessions.
pub fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> =
        std::sync::LazyLock::new(reqwest::Client::new);
    &CLIENT
}
