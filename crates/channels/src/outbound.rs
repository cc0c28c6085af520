//! HTTP implementations of the platform collaborators.

use std::sync::Arc;

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    futures::StreamExt,
    parley_common::{Error as CommonError, retry::is_permanent_status},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tracing::debug,
};

use crate::{
    event::{FileRef, ReplyTarget},
    plugin::{ByteStream, Credential, CredentialProvider, FileFetcher, ReplySender},
};

/// A credential configured once and never refreshed.
pub struct StaticCredential {
    token: Option<Credential>,
}

impl StaticCredential {
    #[must_use]
    pub fn new(token: Option<&Secret<String>>) -> Self {
        Self {
            token: token
                .map(|t| t.expose_secret().trim().to_string())
                .filter(|t| !t.is_empty())
                .map(Credential::new),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Result<Credential> {
        match &self.token {
            Some(token) => Ok(token.clone()),
            None => {
                Err(CommonError::permanent("credential", "no platform token configured").into())
            },
        }
    }
}

/// Platform REST client for replies and attachment downloads.
pub struct HttpPlatform {
    client: reqwest::Client,
    api_base: String,
    file_path_template: String,
    reply_path_template: String,
    credentials: Arc<dyn CredentialProvider>,
}

/// Common platform response envelope; `code != 0` means failure.
#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

impl HttpPlatform {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        file_path_template: impl Into<String>,
        reply_path_template: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            file_path_template: file_path_template.into(),
            reply_path_template: reply_path_template.into(),
            credentials,
        }
    }

    fn file_url(&self, file: &FileRef) -> String {
        let path = self
            .file_path_template
            .replace("{message_id}", &file.message_id)
            .replace("{file_key}", &file.file_key);
        format!("{}{path}", self.api_base)
    }

    fn reply_url(&self, target: &ReplyTarget) -> String {
        let path = self
            .reply_path_template
            .replace("{message_id}", &target.message_id)
            .replace("{chat_id}", &target.chat_id);
        format!("{}{path}", self.api_base)
    }
}

fn status_error(operation: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    let reason = format!("HTTP {status}: {body}");
    if is_permanent_status(status.as_u16()) {
        CommonError::permanent(operation, reason).into()
    } else {
        anyhow::anyhow!("{operation} failed: {reason}")
    }
}

#[async_trait]
impl ReplySender for HttpPlatform {
    async fn send_reply(&self, target: &ReplyTarget, text: &str) -> Result<()> {
        let credential = self.credentials.credential().await?;
        let content = serde_json::json!({ "text": text }).to_string();
        let response = self
            .client
            .post(self.reply_url(target))
            .bearer_auth(credential.expose())
            .json(&serde_json::json!({
                "msg_type": "text",
                "content": content,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error("send reply", status, &body));
        }
        if let Ok(api) = serde_json::from_str::<ApiResponse>(&body)
            && api.code != 0
        {
            bail!("send reply rejected: code {} {}", api.code, api.msg);
        }
        debug!(message_id = %target.message_id, "reply delivered");
        Ok(())
    }
}

#[async_trait]
impl FileFetcher for HttpPlatform {
    async fn fetch(&self, file: &FileRef, credential: &Credential) -> Result<ByteStream> {
        let response = self
            .client
            .get(self.file_url(file))
            .bearer_auth(credential.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("fetch file", status, &body));
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from))
            .boxed())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        axum::{
            Json, Router,
            extract::{Path, State},
            http::{HeaderMap, StatusCode},
            routing::{get, post},
        },
        futures::TryStreamExt,
        tokio::sync::oneshot,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct MockPlatform {
        replies: Arc<Mutex<Vec<(String, String, serde_json::Value)>>>,
    }

    async fn reply_handler(
        State(state): State<MockPlatform>,
        Path(message_id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if message_id == "om_gone" {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"code": 230011, "msg": "message deleted"})),
            );
        }
        state.replies.lock().unwrap().push((message_id, auth, body));
        (StatusCode::OK, Json(serde_json::json!({"code": 0, "msg": "ok"})))
    }

    async fn file_handler(
        Path((_message_id, file_key)): Path<(String, String)>,
    ) -> (StatusCode, Vec<u8>) {
        if file_key == "missing" {
            return (StatusCode::NOT_FOUND, b"no such file".to_vec());
        }
        (StatusCode::OK, b"OggS-audio-bytes".to_vec())
    }

    async fn start_mock(state: MockPlatform) -> (String, oneshot::Sender<()>) {
        let app = Router::new()
            .route("/im/v1/messages/{message_id}/reply", post(reply_handler))
            .route(
                "/im/v1/messages/{message_id}/resources/{file_key}",
                get(file_handler),
            )
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
                .expect("serve mock platform api");
        });
        (format!("http://{addr}"), shutdown_tx)
    }

    fn platform(base: &str, token: Option<&str>) -> HttpPlatform {
        let secret = token.map(|t| Secret::new(t.to_string()));
        HttpPlatform::new(
            reqwest::Client::new(),
            format!("{base}/"),
            "/im/v1/messages/{message_id}/resources/{file_key}?type=file",
            "/im/v1/messages/{message_id}/reply",
            Arc::new(StaticCredential::new(secret.as_ref())),
        )
    }

    fn target(message_id: &str) -> ReplyTarget {
        ReplyTarget {
            chat_id: "oc_1".into(),
            message_id: message_id.into(),
        }
    }

    #[tokio::test]
    async fn reply_posts_text_with_bearer_token() {
        let state = MockPlatform::default();
        let (base, shutdown) = start_mock(state.clone()).await;

        platform(&base, Some("t-123"))
            .send_reply(&target("om_1"), "hello there")
            .await
            .unwrap();

        let replies = state.replies.lock().unwrap().clone();
        assert_eq!(replies.len(), 1);
        let (message_id, auth, body) = &replies[0];
        assert_eq!(message_id, "om_1");
        assert_eq!(auth, "Bearer t-123");
        assert_eq!(body["msg_type"], "text");
        let content: serde_json::Value =
            serde_json::from_str(body["content"].as_str().unwrap()).unwrap();
        assert_eq!(content["text"], "hello there");
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn reply_client_errors_are_permanent() {
        let (base, shutdown) = start_mock(MockPlatform::default()).await;
        let err = platform(&base, Some("t-123"))
            .send_reply(&target("om_gone"), "hi")
            .await
            .unwrap_err();
        assert!(parley_common::retry::is_permanent(&err));
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn missing_token_fails_before_sending() {
        let state = MockPlatform::default();
        let (base, shutdown) = start_mock(state.clone()).await;
        let err = platform(&base, None)
            .send_reply(&target("om_1"), "hi")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no platform token"));
        assert!(state.replies.lock().unwrap().is_empty());
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn fetch_streams_file_body() {
        let (base, shutdown) = start_mock(MockPlatform::default()).await;
        let file = FileRef {
            message_id: "om_1".into(),
            file_key: "file_v2_abc".into(),
        };
        let chunks: Vec<bytes::Bytes> = platform(&base, Some("t"))
            .fetch(&file, &Credential::new("t"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"OggS-audio-bytes");
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn fetch_not_found_is_an_error() {
        let (base, shutdown) = start_mock(MockPlatform::default()).await;
        let file = FileRef {
            message_id: "om_1".into(),
            file_key: "missing".into(),
        };
        let result = platform(&base, Some("t"))
            .fetch(&file, &Credential::new("t"))
            .await;
        let Err(err) = result else {
            panic!("expected fetch to fail");
        };
        assert!(err.to_string().contains("404"));
        let _ = shutdown.send(());
    }
}
