//! The chat panel's state for one host: what is on screen, which message is
//! streaming, and the persisted conversation.

use render::{escape_html, render, StreamSink};
use services::{ChatHistory, HistoryEntry, Sender};
use shared::error::{looks_like_auth_error, ChatError};

/// Shown while the first fragment is on its way.
pub const LOADING_HTML: &str = "<div class=\"wally-loading\">\
<div class=\"wally-loading-dot\"></div><div class=\"wally-loading-dot\"></div>\
<div class=\"wally-loading-dot\"></div></div>";

pub const LOGIN_PROMPT_HTML: &str = "<div class=\"wally-login-prompt\">\
<h3>Authentication Required</h3>\
<p>Please log in or sign up to continue using Wally's AI features.</p></div>";

/// Notices that disappear as soon as the answer starts streaming.
const TRANSIENT_NOTICES: [&str; 3] = ["Analyzing", "Translating", "Processing"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    User,
    Assistant,
    /// Status notice such as "Analyzing content...".
    System,
    LoginPrompt,
}

#[derive(Debug, Clone)]
pub struct DisplayMessage {
    pub kind: MessageKind,
    /// Raw text; empty for a streaming placeholder that has not received anything.
    pub text: String,
    pub html: String,
    pub streaming: bool,
}

pub struct ChatSession {
    open: bool,
    messages: Vec<DisplayMessage>,
    history: ChatHistory,
}

impl ChatSession {
    pub fn new(history: ChatHistory) -> Self {
        Self {
            open: false,
            messages: Vec::new(),
            history,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.streaming)
    }

    /// HTML of the most recent assistant answer or error.
    pub fn last_reply_html(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.kind, MessageKind::Assistant | MessageKind::LoginPrompt))
            .map(|m| m.html.as_str())
    }

    /// Opens the panel and adds an empty streaming answer, optionally
    /// preceded by a status notice. Any earlier placeholder is discarded.
    pub fn begin_request(&mut self, loading: Option<&str>) {
        self.open = true;
        self.messages
            .retain(|m| !m.streaming && m.kind != MessageKind::System);
        self.messages.push(DisplayMessage {
            kind: MessageKind::Assistant,
            text: String::new(),
            html: LOADING_HTML.to_string(),
            streaming: true,
        });
        if let Some(notice) = loading {
            self.messages.push(DisplayMessage {
                kind: MessageKind::System,
                text: notice.to_string(),
                html: escape_html(notice),
                streaming: false,
            });
        }
    }

    /// Appends a finished message. User text is shown escaped, assistant text
    /// goes through the markdown renderer. Assistant messages are not
    /// recorded while an answer is streaming.
    pub fn add_message(&mut self, sender: Sender, content: &str) {
        let (kind, html) = match sender {
            Sender::User => (MessageKind::User, escape_html(content)),
            Sender::Assistant => (MessageKind::Assistant, render(content)),
            Sender::System => (MessageKind::System, escape_html(content)),
        };
        self.messages.push(DisplayMessage {
            kind,
            text: content.to_string(),
            html,
            streaming: false,
        });

        if sender != Sender::Assistant || !self.is_streaming() {
            self.history.push(HistoryEntry::new(sender, content));
            self.persist();
        }
    }

    fn persist(&self) {
        if let Err(e) = self.history.save() {
            tracing::warn!(error = %e, "failed to save chat history");
        }
    }

    fn streaming_message(&mut self) -> &mut DisplayMessage {
        if let Some(pos) = self.messages.iter().position(|m| m.streaming) {
            return &mut self.messages[pos];
        }
        self.messages.push(DisplayMessage {
            kind: MessageKind::Assistant,
            text: String::new(),
            html: String::new(),
            streaming: true,
        });
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    fn drop_transient_notices(&mut self) {
        self.messages.retain(|m| {
            m.kind != MessageKind::System
                || !TRANSIENT_NOTICES.iter().any(|n| m.text.contains(n))
        });
    }

    fn drop_notices(&mut self) {
        self.messages.retain(|m| m.kind != MessageKind::System);
    }
}

impl StreamSink for ChatSession {
    fn on_render(&mut self, cumulative: &str) {
        self.drop_transient_notices();
        let message = self.streaming_message();
        message.text = cumulative.to_string();
        message.html = render(cumulative);
    }

    fn on_complete(&mut self, text: &str) {
        if text.is_empty() {
            self.messages.retain(|m| !m.streaming);
            self.drop_notices();
            return;
        }
        for message in self.messages.iter_mut().filter(|m| m.streaming) {
            message.streaming = false;
            message.text = text.to_string();
            message.html = render(text);
        }
        self.history
            .push(HistoryEntry::new(Sender::Assistant, text));
        self.persist();
        self.drop_notices();
    }

    fn on_error(&mut self, error: &ChatError) {
        // An empty placeholder goes away; partial output stays on screen.
        self.messages.retain(|m| !(m.streaming && m.text.is_empty()));
        for message in self.messages.iter_mut().filter(|m| m.streaming) {
            message.streaming = false;
        }
        self.drop_notices();

        if error.is_auth_error() || looks_like_auth_error(&error.to_string()) {
            self.messages.push(DisplayMessage {
                kind: MessageKind::LoginPrompt,
                text: String::new(),
                html: LOGIN_PROMPT_HTML.to_string(),
                streaming: false,
            });
        } else {
            self.add_message(
                Sender::Assistant,
                &format!("Sorry, I encountered an error: {error}. Please try again."),
            );
        }
    }
}
