//! OpenAI Whisper STT provider (or any endpoint speaking the same
//! `/audio/transcriptions` protocol).

use {
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    parley_common::{Error as CommonError, retry::is_permanent_status},
    reqwest::{
        Client,
        multipart::{Form, Part},
    },
    secrecy::{ExposeSecret, Secret},
};

use super::{SttProvider, TranscribeRequest, Transcript};

const API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "whisper-1";

/// Posts voice notes to `{base_url}/audio/transcriptions` as multipart.
#[derive(Clone)]
pub struct WhisperStt {
    client: Client,
    api_key: Option<Secret<String>>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for WhisperStt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperStt")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl WhisperStt {
    #[must_use]
    pub fn new(api_key: Option<Secret<String>>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: API_BASE.into(),
            model: DEFAULT_MODEL.into(),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.unwrap_or_else(|| DEFAULT_MODEL.into());
        self
    }

    fn api_key(&self) -> Result<&Secret<String>> {
        self.api_key.as_ref().ok_or_else(|| {
            CommonError::permanent("transcription", "OpenAI API key not configured for Whisper")
                .into()
        })
    }

    fn voice_part(request: &TranscribeRequest) -> Result<Part> {
        Part::bytes(request.audio.to_vec())
            .file_name(format!("voice.{}", request.format.extension()))
            .mime_str(request.format.mime_type())
            .context("invalid audio mime type")
    }

    fn form(&self, request: TranscribeRequest) -> Result<Form> {
        let mut form = Form::new()
            .part("file", Self::voice_part(&request)?)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = request.language {
            form = form.text("language", language);
        }
        if let Some(prompt) = request.prompt {
            form = form.text("prompt", prompt);
        }
        Ok(form)
    }
}

#[async_trait]
impl SttProvider for WhisperStt {
    fn id(&self) -> &'static str {
        "whisper"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .multipart(self.form(request)?)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("HTTP {status}: {body}");
            if is_permanent_status(status.as_u16()) {
                return Err(CommonError::permanent("transcription", reason).into());
            }
            return Err(anyhow!("transcription failed: {reason}"));
        }

        response
            .json::<Transcript>()
            .await
            .context("transcription returned an unreadable body")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        bytes::Bytes,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{header, method, path},
        },
    };

    use {super::*, crate::format::AudioFormat};

    fn request() -> TranscribeRequest {
        TranscribeRequest {
            audio: Bytes::from_static(b"fake audio"),
            format: AudioFormat::Mp3,
            language: Some("zh".into()),
            prompt: None,
        }
    }

    #[test]
    fn debug_redacts_api_key() {
        let provider = WhisperStt::new(Some(Secret::new("super-secret-key".into())));
        let debug_output = format!("{provider:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super-secret-key"));
    }

    #[tokio::test]
    async fn transcribe_without_api_key_is_permanent() {
        let provider = WhisperStt::new(None);
        assert!(!provider.is_configured());
        let err = provider.transcribe(request()).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert!(parley_common::retry::is_permanent(&err));
    }

    #[tokio::test]
    async fn transcribes_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "你好，今天天气怎么样",
                "language": "chinese",
                "duration": 2.5,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = WhisperStt::new(Some(Secret::new("sk-test".into())))
            .with_base_url(server.uri())
            .with_model(Some("whisper-large-v3".into()));
        let transcript = provider.transcribe(request()).await.unwrap();
        assert_eq!(transcript.text, "你好，今天天气怎么样");
        assert_eq!(transcript.duration_seconds, Some(2.5));
    }

    #[tokio::test]
    async fn server_errors_are_retryable_client_errors_are_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad audio"))
            .mount(&server)
            .await;

        let provider =
            WhisperStt::new(Some(Secret::new("sk".into()))).with_base_url(server.uri());

        let first = provider.transcribe(request()).await.unwrap_err();
        assert!(!parley_common::retry::is_permanent(&first));
        assert!(first.to_string().contains("503"));

        let second = provider.transcribe(request()).await.unwrap_err();
        assert!(parley_common::retry::is_permanent(&second));
    }

    #[tokio::test]
    async fn minimal_verbose_json_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "Hello"})),
            )
            .mount(&server)
            .await;

        let provider =
            WhisperStt::new(Some(Secret::new("sk".into()))).with_base_url(server.uri());
        let transcript = provider.transcribe(request()).await.unwrap();
        assert_eq!(transcript.spoken_text(), Some("Hello"));
        assert!(transcript.language.is_none());
        assert!(transcript.duration_seconds.is_none());
    }
}
