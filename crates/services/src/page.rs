//! Readable text from a page's HTML, for summarizing.

use html2text::from_read;
use regex::Regex;
use std::sync::LazyLock;

const TRUNCATION_NOTE: &str = "... (content truncated)";
const WRAP_WIDTH: usize = 1000;

static SCRIPTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static ARTICLES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article\s*>").unwrap());
static MAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<main\b[^>]*>(.*?)</main\s*>").unwrap());
static BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body\s*>").unwrap());
static CHROME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(nav|header|footer|aside)\b[^>]*>.*?</(nav|header|footer|aside)\s*>")
        .unwrap()
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Picks the main content region, converts it to text, collapses whitespace
/// and cuts it at `limit` characters.
pub fn extract_text(html: &str, limit: usize) -> String {
    let html = SCRIPTS.replace_all(html, "");

    let articles: Vec<&str> = ARTICLES
        .captures_iter(&html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let region = if !articles.is_empty() {
        articles
            .iter()
            .map(|a| to_text(a))
            .collect::<Vec<_>>()
            .join("\n\n")
    } else if let Some(main) = MAIN.captures(&html).and_then(|c| c.get(1)) {
        to_text(main.as_str())
    } else {
        let body = BODY
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(&html);
        to_text(&CHROME.replace_all(body, ""))
    };

    let text = WHITESPACE.replace_all(&region, " ").trim().to_string();
    truncate(text, limit)
}

fn to_text(fragment: &str) -> String {
    from_read(fragment.as_bytes(), WRAP_WIDTH)
}

fn truncate(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => {
            tracing::debug!(limit, "page content truncated");
            format!("{}{}", &text[..cut], TRUNCATION_NOTE)
        }
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_articles() {
        let html = "<html><body><nav>Menu</nav><article><p>First story</p></article>\
                    <main>Main area</main><article>Second story</article></body></html>";
        let text = extract_text(html, 50_000);
        assert!(text.contains("First story"));
        assert!(text.contains("Second story"));
        assert!(!text.contains("Menu"));
        assert!(!text.contains("Main area"));
    }

    #[test]
    fn test_falls_back_to_main_then_body() {
        let html = "<body><header>Site</header><main><p>Hello   there</p></main></body>";
        assert_eq!(extract_text(html, 50_000), "Hello there");

        let html = "<body><header>Site</header><p>Body text</p><footer>(c)</footer>\
                    <script>var x = 1;</script><aside>ads</aside></body>";
        assert_eq!(extract_text(html, 50_000), "Body text");
    }

    #[test]
    fn test_truncates_long_content() {
        let html = format!("<body><p>{}</p></body>", "word ".repeat(100));
        let text = extract_text(&html, 20);
        assert!(text.ends_with(TRUNCATION_NOTE));
        assert_eq!(text.chars().count(), 20 + TRUNCATION_NOTE.len());
    }
}
