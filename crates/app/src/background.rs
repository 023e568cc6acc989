//! Turns user intents into streamed requests against the chat backend and
//! feeds the answers into a [`ChatSession`].

use anyhow::Result;
use providers::{ChatStream, WallyClient};
use render::StreamAccumulator;
use services::prompts::{self, PageContext};
use services::{AuthState, KeyValueStore, Sender, SiteSettings, SiteStatus};
use shared::agent_api::{ChatMessage, StreamChunk};
use shared::error::ChatError;
use shared::settings::WallySettings;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::session::ChatSession;

pub const SUMMARIZE_NOTICE: &str = "Analyzing content...";
pub const TRANSLATE_NOTICE: &str = "Translating text...";
pub const IMAGE_NOTICE: &str = "Analyzing image...";

pub struct Background {
    settings: WallySettings,
    auth: AuthState,
    sites: SiteSettings,
    /// Replaces the HTTP client, e.g. with a scripted stream.
    backend: Option<Arc<dyn ChatStream>>,
}

impl Background {
    pub fn new(settings: WallySettings, store: Arc<dyn KeyValueStore>) -> Self {
        let auth = AuthState::new(store.clone(), &settings);
        Self::with_auth(settings, store, auth)
    }

    pub fn with_auth(
        settings: WallySettings,
        store: Arc<dyn KeyValueStore>,
        auth: AuthState,
    ) -> Self {
        Self {
            sites: SiteSettings::new(store),
            settings,
            auth,
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ChatStream>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn sites(&self) -> &SiteSettings {
        &self.sites
    }

    pub fn settings(&self) -> &WallySettings {
        &self.settings
    }

    /// First-run setup.
    pub fn on_install(&self) -> Result<()> {
        if self.sites.seed_defaults()? {
            tracing::info!("seeded default translation language");
        }
        Ok(())
    }

    pub async fn check_site(&self, url: &str) -> SiteStatus {
        self.sites.check_site(&self.auth, url).await
    }

    /// Sends the user's message with the page context and recent history.
    pub async fn send_chat(
        &self,
        session: &mut ChatSession,
        page: &PageContext,
        text: &str,
    ) -> Result<String> {
        session.add_message(Sender::User, text);
        let messages = prompts::chat_request(page, session.history().request_window());
        self.handle_chat(session, messages).await
    }

    /// "Ask Wally about this": the selection becomes the question.
    pub async fn ask_about_selection(
        &self,
        session: &mut ChatSession,
        page: &PageContext,
        selection: &str,
    ) -> Result<String> {
        let question = format!("Help me understand this: \"{selection}\"");
        session.add_message(Sender::User, &question);
        let page = page.clone().with_selection(selection);
        let messages = prompts::chat_request(&page, vec![ChatMessage::user(question)]);
        self.handle_chat(session, messages).await
    }

    pub async fn handle_chat(
        &self,
        session: &mut ChatSession,
        messages: Vec<ChatMessage>,
    ) -> Result<String> {
        let model = self.settings.models.chat.clone();
        self.stream(session, &model, messages, None).await
    }

    pub async fn summarize(
        &self,
        session: &mut ChatSession,
        content: &str,
        page: &PageContext,
    ) -> Result<String> {
        let messages = prompts::summarize_request(content, page);
        let model = self.settings.models.chat.clone();
        self.stream(session, &model, messages, Some(SUMMARIZE_NOTICE))
            .await
    }

    pub async fn translate(&self, session: &mut ChatSession, text: &str) -> Result<String> {
        let language = self.sites.base_language()?;
        let messages = prompts::translate_request(text, &language);
        let model = self.settings.models.translate.clone();
        self.stream(session, &model, messages, Some(TRANSLATE_NOTICE))
            .await
    }

    pub async fn analyze_image(
        &self,
        session: &mut ChatSession,
        image_url: &str,
    ) -> Result<String> {
        let messages = prompts::image_request(image_url);
        let model = self.settings.models.vision.clone();
        self.stream(session, &model, messages, Some(IMAGE_NOTICE))
            .await
    }

    async fn api_key(&self) -> Result<String, ChatError> {
        if !self.auth.is_authenticated().await {
            return Err(ChatError::AuthRequired);
        }
        self.auth.api_key()?.ok_or(ChatError::AuthRequired)
    }

    /// Every failure ends up in the session as well as in the returned error.
    async fn stream(
        &self,
        session: &mut ChatSession,
        model: &str,
        messages: Vec<ChatMessage>,
        notice: Option<&str>,
    ) -> Result<String> {
        session.begin_request(notice);
        let mut acc = StreamAccumulator::new();

        let api_key = match self.api_key().await {
            Ok(key) => key,
            Err(e) => {
                acc.fail(&e, session);
                return Err(e.into());
            }
        };

        let client: Arc<dyn ChatStream> = match &self.backend {
            Some(backend) => backend.clone(),
            None => Arc::new(WallyClient::new(&self.settings, api_key)),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::info!(model, messages = messages.len(), "sending chat request");

        let producer = async {
            let errors = tx.clone();
            if let Err(e) = client.stream_chat(model, messages, tx).await {
                let _ = errors.send(StreamChunk::Error(e));
            }
        };
        let ((), result) = tokio::join!(producer, acc.pump(rx, session));
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MessageKind;
    use async_trait::async_trait;
    use services::auth_state::{ACCESS_TOKEN, API_KEY};
    use services::store::Entries;
    use services::{ChatHistory, MemoryStore};

    fn logged_in_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut entries = Entries::new();
        entries.insert(API_KEY.into(), serde_json::json!("key-1"));
        entries.insert(ACCESS_TOKEN.into(), serde_json::json!("at"));
        store.set(entries).unwrap();
        store
    }

    fn background(api_base: &str, store: Arc<MemoryStore>) -> Background {
        let settings = WallySettings {
            api_base: api_base.to_string(),
            auth_base: format!("{api_base}/api/auth"),
            ..WallySettings::default()
        };
        Background::new(settings, store)
    }

    fn session(store: Arc<MemoryStore>) -> ChatSession {
        ChatSession::new(ChatHistory::load(store, "example.com", 50, 10).unwrap())
    }

    #[tokio::test]
    async fn test_chat_streams_into_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat/stream")
            .match_header("authorization", "Bearer key-1")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"model": "ask-wally"})))
            .with_status(200)
            .with_body("data: {\"text\":\"Hi \"}\n\ndata: {\"text\":\"*there*\"}\n\ndata: [DONE]\n\n")
            .create_async()
            .await;

        let store = logged_in_store();
        let bg = background(&server.url(), store.clone());
        let mut session = session(store);
        let page = PageContext::new("https://example.com", "Example");

        let text = bg.send_chat(&mut session, &page, "hello").await.unwrap();
        assert_eq!(text, "Hi *there*");
        assert_eq!(session.last_reply_html(), Some("Hi <em>there</em>"));
        assert_eq!(session.history().entries().len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthenticated_request_shows_login_prompt() {
        let server = mockito::Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        let bg = background(&server.url(), store.clone());
        let mut session = session(store);

        let err = bg.translate(&mut session, "hola").await.unwrap_err();
        assert!(err.to_string().contains("Authentication required"));
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].kind, MessageKind::LoginPrompt);
    }

    #[tokio::test]
    async fn test_api_error_shows_apology() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat/stream")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let store = logged_in_store();
        let bg = background(&server.url(), store.clone());
        let mut session = session(store);

        let err = bg
            .analyze_image(&mut session, "https://example.com/cat.png")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
        let reply = &session.messages().last().unwrap().text;
        assert_eq!(
            reply,
            "Sorry, I encountered an error: API error (500): boom. Please try again."
        );
    }

    #[tokio::test]
    async fn test_translate_uses_base_language() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat/stream")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "wally",
                "messages": [{"role": "user", "content": "Translate this text to German: hola"}]
            })))
            .with_status(200)
            .with_body("data: {\"text\":\"Hallo\"}\n\ndata: [DONE]\n\n")
            .create_async()
            .await;

        let store = logged_in_store();
        let bg = background(&server.url(), store.clone());
        bg.on_install().unwrap();
        bg.sites().set_base_language("German").unwrap();
        let mut session = session(store);

        assert_eq!(bg.translate(&mut session, "hola").await.unwrap(), "Hallo");
        mock.assert_async().await;
    }

    /// Replays canned fragments, optionally failing after them.
    struct Scripted {
        fragments: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl ChatStream for Scripted {
        async fn stream_chat(
            &self,
            _model: &str,
            _messages: Vec<ChatMessage>,
            tx: mpsc::UnboundedSender<StreamChunk>,
        ) -> Result<(), ChatError> {
            for fragment in &self.fragments {
                let _ = tx.send(StreamChunk::Text(fragment.to_string()));
            }
            let last = if self.fail {
                StreamChunk::Error(ChatError::Network("connection reset".into()))
            } else {
                StreamChunk::Done
            };
            let _ = tx.send(last);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scripted_summary_renders_table() {
        let store = logged_in_store();
        let bg = background("http://127.0.0.1:9", store.clone()).with_backend(Arc::new(Scripted {
            fragments: vec!["| a | b |\n", "|---|---|\n", "| 1 | 2 |"],
            fail: false,
        }));
        let mut session = session(store);
        let page = PageContext::new("https://example.com", "Example");

        bg.summarize(&mut session, "some text", &page).await.unwrap();
        let html = session.last_reply_html().unwrap();
        assert!(html.starts_with("<table class=\"wally-markdown-table\"><thead>"));
        assert!(html.contains("<td>1</td><td>2</td>"));
        assert!(session
            .messages()
            .iter()
            .all(|m| m.kind != MessageKind::System));
    }

    #[tokio::test]
    async fn test_scripted_failure_keeps_partial_answer() {
        let store = logged_in_store();
        let bg = background("http://127.0.0.1:9", store.clone()).with_backend(Arc::new(Scripted {
            fragments: vec!["Half an ", "answer"],
            fail: true,
        }));
        let mut session = session(store);
        let page = PageContext::new("https://example.com", "Example");

        assert!(bg.send_chat(&mut session, &page, "q").await.is_err());
        let texts: Vec<&str> = session.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "q",
                "Half an answer",
                "Sorry, I encountered an error: network error: connection reset. Please try again.",
            ]
        );
    }
}
