//! OpenAI (and compatible) chat completions and image generation.

use {
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    parley_common::{Error as CommonError, retry::is_permanent_status},
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use crate::{
    model::{ChatCompletion, ChatMessage, ImageGeneration},
    openai_compat::{extract_answer, parse_usage},
};

const API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: Option<Secret<String>>,
    base_url: String,
    image_model: String,
    image_size: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("image_model", &self.image_model)
            .finish()
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(api_key: Option<Secret<String>>) -> Self {
        Self {
            client: crate::shared_http_client().clone(),
            api_key,
            base_url: API_BASE.into(),
            image_model: DEFAULT_IMAGE_MODEL.into(),
            image_size: DEFAULT_IMAGE_SIZE.into(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_image_options(mut self, model: impl Into<String>, size: impl Into<String>) -> Self {
        self.image_model = model.into();
        self.image_size = size.into();
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self, operation: &str) -> Result<&Secret<String>> {
        self.api_key
            .as_ref()
            .ok_or_else(|| CommonError::permanent(operation, "OpenAI API key not configured").into())
    }

    async fn post_json(
        &self,
        operation: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let api_key = self.api_key(operation)?;
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(body)
            .send()
            .await
            .with_context(|| format!("{operation} request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("HTTP {status}: {body}");
            if is_permanent_status(status.as_u16()) {
                return Err(CommonError::permanent(operation, reason).into());
            }
            return Err(anyhow!("{operation} failed: {reason}"));
        }

        response
            .json()
            .await
            .with_context(|| format!("{operation} returned an unreadable body"))
    }
}

#[async_trait]
impl ChatCompletion for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages.iter().map(ChatMessage::to_openai_value).collect::<Vec<_>>(),
        });
        let payload = self.post_json("chat completion", "/chat/completions", &body).await?;

        if let Some(usage) = parse_usage(&payload) {
            debug!(
                model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "chat completion usage"
            );
        }

        extract_answer(&payload)
            .filter(|answer| !answer.is_empty())
            .ok_or_else(|| anyhow!("chat completion returned no answer"))
    }
}

#[async_trait]
impl ImageGeneration for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.image_model,
            "prompt": prompt,
            "n": 1,
            "size": self.image_size,
        });
        let payload = self
            .post_json("image generation", "/images/generations", &body)
            .await?;

        payload
            .pointer("/data/0/url")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("image generation returned no url"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {
        axum::{
            Json, Router,
            extract::State,
            http::{HeaderMap, StatusCode},
            routing::post,
        },
        tokio::sync::oneshot,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct MockApi {
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    async fn chat_handler(
        State(state): State<MockApi>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": {"message": "bad key"}})),
            );
        }
        let model = body["model"].as_str().unwrap_or_default().to_string();
        state.bodies.lock().unwrap().push(body);
        if model == "overloaded" {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": {"message": "try later"}})),
            );
        }
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Hi there!"}}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 3}
            })),
        )
    }

    async fn image_handler(
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        if body["prompt"] == "forbidden" {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": {"code": "content_policy_violation"}})),
            );
        }
        (
            StatusCode::OK,
            Json(serde_json::json!({"data": [{"url": "https://img.example/cat.png"}]})),
        )
    }

    async fn start_mock(state: MockApi) -> (String, oneshot::Sender<()>) {
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_handler))
            .route("/v1/images/generations", post(image_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("serve mock openai api");
        });
        (format!("http://{addr}/v1/"), shutdown_tx)
    }

    fn provider(base: &str, key: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::new(key.map(|k| Secret::new(k.to_string()))).with_base_url(base)
    }

    #[tokio::test]
    async fn completes_with_ordered_messages() {
        let state = MockApi::default();
        let (base, _shutdown) = start_mock(state.clone()).await;
        let answer = provider(&base, Some("sk-test"))
            .complete("gpt-4o-mini", &[
                ChatMessage::system("be brief"),
                ChatMessage::user("hello"),
            ])
            .await
            .unwrap();
        assert_eq!(answer, "Hi there!");

        let bodies = state.bodies.lock().unwrap();
        assert_eq!(bodies[0]["model"], "gpt-4o-mini");
        assert_eq!(bodies[0]["messages"][0]["role"], "system");
        assert_eq!(bodies[0]["messages"][1]["content"], "hello");
    }

    #[tokio::test]
    async fn auth_failure_is_permanent_overload_is_not() {
        let (base, _shutdown) = start_mock(MockApi::default()).await;

        let err = provider(&base, Some("sk-wrong"))
            .complete("gpt-4o-mini", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(parley_common::retry::is_permanent(&err));

        let err = provider(&base, Some("sk-test"))
            .complete("overloaded", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(!parley_common::retry::is_permanent(&err));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let state = MockApi::default();
        let (base, _shutdown) = start_mock(state.clone()).await;
        let p = provider(&base, None);
        assert!(!p.is_configured());
        let err = p.generate("cat").await.unwrap_err();
        assert!(parley_common::retry::is_permanent(&err));
        assert!(state.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generates_image_url() {
        let (base, _shutdown) = start_mock(MockApi::default()).await;
        let p = provider(&base, Some("sk-test")).with_image_options("dall-e-2", "512x512");
        assert_eq!(p.generate("a cat").await.unwrap(), "https://img.example/cat.png");

        let err = p.generate("forbidden").await.unwrap_err();
        assert!(parley_common::retry::is_permanent(&err));
    }

    #[test]
    fn debug_redacts_key() {
        let p = OpenAiProvider::new(Some(Secret::new("sk-very-secret".into())));
        assert!(!format!("{p:?}").contains("sk-very-secret"));
    }
}
