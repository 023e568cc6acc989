pub mod error;

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::env;

    pub const DEFAULT_API_BASE: &str = "https://api.meetwally.app";
    pub const DEFAULT_AUTH_BASE: &str = "https://api.meetwally.app/api/auth";

    fn default_api_base() -> String {
        DEFAULT_API_BASE.into()
    }

    fn default_auth_base() -> String {
        DEFAULT_AUTH_BASE.into()
    }

    /// Model names understood by the chat backend.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelNames {
        pub chat: String,        // page chat and summaries
        pub translate: String,   // selection translation
        pub vision: String,      // image analysis
    }

    impl Default for ModelNames {
        fn default() -> Self {
            Self {
                chat: "ask-wally".into(),
                translate: "wally".into(),
                vision: "wally-vision".into(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct WallySettings {
        pub api_base: String,
        pub auth_base: String,
        pub models: ModelNames,
        /// How many past turns are sent along with a new chat message.
        pub request_history: usize,
        /// How many turns are kept per host in the store.
        pub stored_history: usize,
        /// Page text is cut at this many characters before summarizing.
        pub page_content_limit: usize,
        /// Refresh the access token when it expires within this window.
        pub refresh_window_secs: i64,
        /// Used when the server omits `expires_in`.
        pub default_expires_in_secs: i64,
    }

    impl Default for WallySettings {
        fn default() -> Self {
            Self {
                api_base: default_api_base(),
                auth_base: default_auth_base(),
                models: ModelNames::default(),
                request_history: 10,
                stored_history: 50,
                page_content_limit: 50_000,
                refresh_window_secs: 5 * 60,
                default_expires_in_secs: 3600,
            }
        }
    }

    impl WallySettings {
        /// Defaults with `WALLY_API_BASE` / `WALLY_AUTH_BASE` applied.
        pub fn from_env() -> Self {
            let mut settings = Self::default();
            if let Ok(base) = env::var("WALLY_API_BASE") {
                if !base.trim().is_empty() {
                    settings.api_base = base.trim().trim_end_matches('/').to_string();
                }
            }
            if let Ok(base) = env::var("WALLY_AUTH_BASE") {
                if !base.trim().is_empty() {
                    settings.auth_base = base.trim().trim_end_matches('/').to_string();
                }
            }
            settings
        }
    }
}

pub mod agent_api {
    use crate::error::ChatError;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum MessageContent {
        Text(String),
        Parts(Vec<ContentPart>),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ContentPart {
        Text { text: String },
        ImageUrl { image_url: ImageUrl },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ImageUrl {
        pub url: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "system" | "user" | "assistant"
        pub content: MessageContent,
    }

    impl ChatMessage {
        pub fn new(role: &str, content: impl Into<String>) -> Self {
            Self {
                role: role.to_string(),
                content: MessageContent::Text(content.into()),
            }
        }

        pub fn system(content: impl Into<String>) -> Self {
            Self::new("system", content)
        }

        pub fn user(content: impl Into<String>) -> Self {
            Self::new("user", content)
        }

        pub fn assistant(content: impl Into<String>) -> Self {
            Self::new("assistant", content)
        }

        /// Plain text of the message; image parts are skipped.
        pub fn text(&self) -> String {
            match &self.content {
                MessageContent::Text(text) => text.clone(),
                MessageContent::Parts(parts) => parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::ImageUrl { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            }
        }
    }

    /// One event of a streamed chat response.
    #[derive(Debug)]
    pub enum StreamChunk {
        /// A text delta, in arrival order.
        Text(String),
        /// Explicit end of stream.
        Done,
        /// The stream failed; no `Done` follows.
        Error(ChatError),
    }
}
