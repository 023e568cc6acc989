use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, StreamChunk};
use shared::error::ChatError;
use shared::settings::WallySettings;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::sse::{SseEvent, SseParser};

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(300))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

/// Streaming chat backend.
///
/// Contract: if the request fails *before* any chunk is sent (transport error,
/// non-success status) the error is returned. Once streaming starts, failures
/// go through `StreamChunk::Error` and the method returns `Ok(())`. Every
/// successful stream ends with exactly one `StreamChunk::Done`.
#[async_trait]
pub trait ChatStream: Send + Sync {
    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<(), ChatError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

pub struct WallyClient {
    http: Client,
    api_base: String,
    api_key: String,
}

impl WallyClient {
    pub fn new(settings: &WallySettings, api_key: impl Into<String>) -> Self {
        Self::with_base(&settings.api_base, api_key)
    }

    pub fn with_base(api_base: &str, api_key: impl Into<String>) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Forward one parsed line. Returns true once the end marker was sent.
    fn forward(event: SseEvent, tx: &UnboundedSender<StreamChunk>) -> bool {
        match event {
            SseEvent::Done => {
                let _ = tx.send(StreamChunk::Done);
                true
            }
            SseEvent::Data(data) => {
                match serde_json::from_str::<StreamDelta>(&data) {
                    Ok(delta) => {
                        if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                            let _ = tx.send(StreamChunk::Text(text));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, line = %data, "skipping malformed stream line");
                    }
                }
                false
            }
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> ChatError {
    let detail: String = body.chars().take(800).collect();
    let body = if detail.trim().is_empty() {
        status.canonical_reason().unwrap_or_default().to_string()
    } else {
        detail
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Unauthorized {
            status: status.as_u16(),
            body,
        },
        _ => ChatError::Api {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl ChatStream for WallyClient {
    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<(), ChatError> {
        let url = format!("{}/api/chat/stream", self.api_base);
        let req = ChatRequest {
            model,
            messages: &messages,
        };
        tracing::debug!(%url, model, messages = messages.len(), "starting chat stream");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(ChatError::Network(format!(
                        "stream read error: {e}"
                    ))));
                    return Ok(());
                }
            };
            for event in parser.feed(&bytes) {
                if Self::forward(event, &tx) {
                    return Ok(());
                }
            }
        }

        if let Some(event) = parser.finish() {
            if Self::forward(event, &tx) {
                return Ok(());
            }
        }
        tracing::debug!("chat stream ended without an end marker");
        let _ = tx.send(StreamChunk::Done);
        Ok(())
    }
}
