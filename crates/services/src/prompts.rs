//! Message lists for each kind of request sent to the chat backend.

use shared::agent_api::{ChatMessage, ContentPart, ImageUrl, MessageContent};

/// Where the user is when they ask something.
#[derive(Clone, Debug, Default)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    /// Currently selected text, empty when nothing is selected.
    pub selection: String,
}

impl PageContext {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            selection: String::new(),
        }
    }

    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = selection.into();
        self
    }
}

pub fn chat_system_prompt(page: &PageContext) -> String {
    let selection = if page.selection.is_empty() {
        "No text is currently selected.".to_string()
    } else {
        format!("They have selected this text: {}", page.selection)
    };
    format!(
        "You are Wally, a helpful and cheerful AI assistant. The user is on the page: {} ({}). {}",
        page.title, page.url, selection
    )
}

/// System prompt followed by the recent conversation, which already ends with
/// the user's new message.
pub fn chat_request(page: &PageContext, history: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(chat_system_prompt(page)));
    messages.extend(history);
    messages
}

pub fn summarize_request(content: &str, page: &PageContext) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "You are Wally, a helpful AI assistant. The user wants you to summarize the content \
             from the page: {} ({}). Provide a clear, concise summary of the main points in a \
             few sentences.",
            page.title, page.url
        )),
        ChatMessage::user(format!("Summarize this for me in a few sentences: {content}")),
    ]
}

pub fn translate_request(text: &str, language: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Translate this text to {language}: {text}"
    ))]
}

pub fn image_request(image_url: &str) -> Vec<ChatMessage> {
    vec![ChatMessage {
        role: "user".into(),
        content: MessageContent::Parts(vec![
            ContentPart::Text {
                text: "Please analyze this image and tell me what you see in detail.".into(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_url.to_string(),
                },
            },
        ]),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_prompt_mentions_selection() {
        let page = PageContext::new("https://a.org/x", "A page");
        assert_eq!(
            chat_system_prompt(&page),
            "You are Wally, a helpful and cheerful AI assistant. The user is on the page: \
             A page (https://a.org/x). No text is currently selected."
        );

        let page = page.with_selection("quantum");
        assert!(chat_system_prompt(&page).ends_with("They have selected this text: quantum"));
    }

    #[test]
    fn test_chat_request_prepends_system() {
        let page = PageContext::new("https://a.org", "A");
        let messages = chat_request(&page, vec![ChatMessage::user("hello")]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].text(), "hello");
    }

    #[test]
    fn test_summarize_and_translate() {
        let page = PageContext::new("https://a.org", "A");
        let messages = summarize_request("long text", &page);
        assert!(messages[0]
            .text()
            .contains("summarize the content from the page: A (https://a.org)"));
        assert_eq!(
            messages[1].text(),
            "Summarize this for me in a few sentences: long text"
        );

        let messages = translate_request("hola", "English");
        assert_eq!(messages[0].text(), "Translate this text to English: hola");
    }

    #[test]
    fn test_image_request_has_two_parts() {
        let messages = image_request("https://a.org/cat.png");
        let json = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(json["content"][1]["image_url"]["url"], "https://a.org/cat.png");
        assert_eq!(
            messages[0].text(),
            "Please analyze this image and tell me what you see in detail."
        );
    }
}
