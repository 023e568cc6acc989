//! Markdown to HTML for streamed chat responses.
//!
//! [`render`] is called with the whole cumulative response every time a new
//! fragment arrives, so it keeps no state between calls. Each pass below works
//! on the output of the previous one:
//!
//! 1. cut dangling delimiters ([`crate::repair`])
//! 2. pull fenced blocks and inline code out behind placeholders, escaped
//! 3. escape everything else
//! 4. headings, emphasis, links, rules, blockquotes, lists, tables
//! 5. paragraphs (only once the text has a blank line) and `<br>`s
//! 6. put the code back
//!
//! Code is hidden from the later passes, so markdown inside it stays literal.

use crate::escape::escape_html;
use crate::repair::{repair, scan_code, Token};
use regex::{Captures, Regex};
use std::panic;
use std::sync::LazyLock;

/// Opens a stash placeholder; never survives into the output.
const STASH_OPEN: char = '\u{E000}';
/// Closes a stash placeholder.
const STASH_CLOSE: char = '\u{E001}';

/// CSS class of rendered tables, shared with the chat surface's stylesheet.
pub const TABLE_CLASS: &str = "wally-markdown-table";

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#{1,6})[ \t]+(.*?)[ \t]*$").unwrap());
static BOLD_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*\n]+)\*\*").unwrap());
static BOLD_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b__([^_\n]+)__\b").unwrap());
static ITALIC_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(^|[^\w*])\*([^\s*](?:[^*\n]*[^\s*])?)\*").unwrap());
static ITALIC_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_([^\s_](?:[^_\n]*[^\s_])?)_\b").unwrap());
static STRIKETHROUGH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~~([^~\n]+)~~").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]\n]+)\]\(((?:[^()\s]|\([^()\s]*\))+)\)").unwrap()
});
static RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^-{3,}[ \t]*$").unwrap());
static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^&gt;[ \t]+(.*)$").unwrap());
static UNORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*[*+-][ \t]+(.*)$").unwrap());
static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*\d+\.[ \t]+(.*)$").unwrap());
static TABLE_ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\|(.+)\|[ \t]*$").unwrap());
static TABLE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|(?:[ \t]*:?-+:?[ \t]*\|)+[ \t]*$").unwrap());

/// Render cumulative markdown into HTML.
///
/// Never fails: if a pass panics on some unexpected input the escaped text is
/// returned instead, so a live stream keeps displaying.
pub fn render(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    match panic::catch_unwind(|| render_html(content)) {
        Ok(html) => html,
        Err(_) => {
            tracing::warn!(len = content.len(), "markdown render failed, showing escaped text");
            escape_html(content)
        }
    }
}

fn render_html(content: &str) -> String {
    let normalized: String = content
        .replace("\r\n", "\n")
        .chars()
        .filter(|&c| c != STASH_OPEN && c != STASH_CLOSE)
        .collect();

    let repaired = repair(&normalized);
    let mut stash = Stash::default();
    let html = stash.extract_code(repaired);
    let html = headings(&html);
    let html = emphasis(&html);
    let html = links(&html);
    let html = RULE.replace_all(&html, "<hr>").into_owned();
    let html = BLOCKQUOTE
        .replace_all(&html, "<blockquote>$1</blockquote>")
        .into_owned();
    let html = lists(&html);
    let html = tables(&html);
    let html = paragraphs(&html);
    let html = line_breaks(&html);
    stash.restore(&html)
}

/// Rendered code held out of the markup passes.
#[derive(Default)]
struct Stash {
    entries: Vec<String>,
}

impl Stash {
    fn placeholder(&mut self, html: String) -> String {
        self.entries.push(html);
        format!("{STASH_OPEN}{}{STASH_CLOSE}", self.entries.len() - 1)
    }

    /// Escape `text`, replacing code with placeholders. Fenced blocks keep
    /// their `<pre>` wrapper in place so later passes treat them as blocks.
    fn extract_code(&mut self, text: &str) -> String {
        let scan = scan_code(text);
        let mut out = String::with_capacity(text.len());
        for token in scan.tokens {
            match token {
                Token::Text { start, end } => out.push_str(&escape_html(&text[start..end])),
                Token::Fence { lang, body } => {
                    let class = if lang.is_empty() {
                        String::new()
                    } else {
                        format!(" class=\"language-{}\"", escape_html(lang))
                    };
                    let code = format!("<code{class}>{}</code>", escape_html(body.trim()));
                    out.push_str("<pre>");
                    out.push_str(&self.placeholder(code));
                    out.push_str("</pre>");
                }
                Token::Code(code) => {
                    let code = format!("<code>{}</code>", escape_html(code));
                    out.push_str(&self.placeholder(code));
                }
            }
        }
        out
    }

    fn restore(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut rest = html;
        while let Some(open) = rest.find(STASH_OPEN) {
            out.push_str(&rest[..open]);
            let after = &rest[open + STASH_OPEN.len_utf8()..];
            let Some(close) = after.find(STASH_CLOSE) else {
                rest = after;
                continue;
            };
            if let Some(entry) = after[..close]
                .parse::<usize>()
                .ok()
                .and_then(|i| self.entries.get(i))
            {
                out.push_str(entry);
            }
            rest = &after[close + STASH_CLOSE.len_utf8()..];
        }
        out.push_str(rest);
        out
    }
}

fn headings(text: &str) -> String {
    HEADING
        .replace_all(text, |caps: &Captures| {
            let level = caps[1].len();
            format!("<h{level}>{}</h{level}>", &caps[2])
        })
        .into_owned()
}

fn emphasis(text: &str) -> String {
    let text = BOLD_STAR.replace_all(text, "<strong>$1</strong>");
    let text = BOLD_UNDERSCORE.replace_all(&text, "<strong>$1</strong>");
    let text = ITALIC_STAR.replace_all(&text, "$1<em>$2</em>");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "<em>$1</em>");
    STRIKETHROUGH
        .replace_all(&text, "<del>$1</del>")
        .into_owned()
}

fn links(text: &str) -> String {
    LINK.replace_all(text, |caps: &Captures| {
        let (label, url) = (&caps[1], &caps[2]);
        if is_safe_url(url) {
            format!("<a href=\"{url}\" target=\"_blank\" rel=\"noopener noreferrer\">{label}</a>")
        } else {
            label.to_string()
        }
    })
    .into_owned()
}

/// Relative links and http(s)/mailto only; `javascript:` and friends are dropped.
fn is_safe_url(url: &str) -> bool {
    match url.split_once(':') {
        Some((scheme, _)) if !scheme.contains(['/', '?', '#']) => {
            matches!(
                scheme.to_ascii_lowercase().as_str(),
                "http" | "https" | "mailto"
            )
        }
        _ => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

impl ListKind {
    fn open_tag(self) -> &'static str {
        match self {
            ListKind::Unordered => "<ul>",
            ListKind::Ordered => "<ol>",
        }
    }

    fn close_tag(self) -> &'static str {
        match self {
            ListKind::Unordered => "</ul>",
            ListKind::Ordered => "</ol>",
        }
    }
}

fn list_item(line: &str) -> Option<(ListKind, &str)> {
    if let Some(caps) = UNORDERED_ITEM.captures(line) {
        return caps.get(1).map(|m| (ListKind::Unordered, m.as_str()));
    }
    ORDERED_ITEM
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| (ListKind::Ordered, m.as_str()))
}

/// Group contiguous item lines into one container each. Any other line, or
/// the end of the text, closes the open container.
fn lists(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut open: Option<ListKind> = None;

    for line in text.split('\n') {
        match list_item(line) {
            Some((kind, body)) => {
                let item = format!("<li>{body}</li>");
                match (open, out.last_mut()) {
                    (Some(current), Some(last)) if current == kind => last.push_str(&item),
                    (current, last) => {
                        if let (Some(current), Some(last)) = (current, last) {
                            last.push_str(current.close_tag());
                        }
                        out.push(format!("{}{item}", kind.open_tag()));
                        open = Some(kind);
                    }
                }
            }
            None => {
                if let (Some(current), Some(last)) = (open.take(), out.last_mut()) {
                    last.push_str(current.close_tag());
                }
                out.push(line.to_string());
            }
        }
    }
    if let (Some(current), Some(last)) = (open, out.last_mut()) {
        last.push_str(current.close_tag());
    }
    out.join("\n")
}

fn table_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// A pipe row directly followed by a separator row starts a table; the first
/// row is the header and later rows are padded or cut to its width.
fn tables(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let starts_table = TABLE_ROW.is_match(lines[i])
            && !TABLE_SEPARATOR.is_match(lines[i])
            && lines.get(i + 1).is_some_and(|l| TABLE_SEPARATOR.is_match(l));
        if !starts_table {
            out.push(lines[i].to_string());
            i += 1;
            continue;
        }

        let header = table_cells(lines[i]);
        let columns = header.len();
        let mut html = format!("<table class=\"{TABLE_CLASS}\"><thead><tr>");
        for cell in &header {
            html.push_str(&format!("<th>{cell}</th>"));
        }
        html.push_str("</tr></thead><tbody>");

        i += 2;
        while i < lines.len() && TABLE_ROW.is_match(lines[i]) {
            if !TABLE_SEPARATOR.is_match(lines[i]) {
                let mut cells = table_cells(lines[i]);
                cells.resize(columns, String::new());
                html.push_str("<tr>");
                for cell in &cells {
                    html.push_str(&format!("<td>{cell}</td>"));
                }
                html.push_str("</tr>");
            }
            i += 1;
        }
        html.push_str("</tbody></table>");
        out.push(html);
    }
    out.join("\n")
}

const BLOCK_MARKERS: [&str; 7] = [
    "<pre>",
    "<ul>",
    "<ol>",
    "<h",
    "<blockquote>",
    "<table",
    "<hr>",
];

/// Wrap blank-line separated segments in `<p>`, but only once a blank line
/// exists: wrapping every partial fragment would reflow earlier text.
fn paragraphs(text: &str) -> String {
    if !text.contains("\n\n") {
        return text.to_string();
    }
    text.split("\n\n")
        .map(|segment| {
            let segment = segment.trim_matches('\n');
            if segment.trim().is_empty() {
                String::new()
            } else if BLOCK_MARKERS.iter().any(|m| segment.contains(m)) {
                segment.to_string()
            } else {
                format!("<p>{segment}</p>")
            }
        })
        .collect()
}

const BLOCK_TAGS: [&str; 14] = [
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "ul", "ol", "li", "blockquote", "pre", "table", "p",
];

/// `tag` starts with `<`; true for block-level opening or closing tags.
fn is_block_tag(tag: &str) -> bool {
    let name = tag.trim_start_matches('<').trim_start_matches('/');
    let end = name
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(name.len());
    BLOCK_TAGS.contains(&&name[..end])
}

/// A newline between two runs of inline content becomes `<br>`; newlines
/// next to a block tag or another newline are left alone.
fn line_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        if c == '\n' {
            let (before, after) = (&text[..i], &text[i + 1..]);
            let after_inline = !before.is_empty()
                && !before.ends_with('\n')
                && !(before.ends_with('>')
                    && before.rfind('<').is_some_and(|lt| is_block_tag(&before[lt..])));
            let before_inline = !after.is_empty()
                && !after.starts_with('\n')
                && !(after.starts_with('<') && is_block_tag(after));
            if after_inline && before_inline {
                out.push_str("<br>");
                continue;
            }
        }
        out.push(c);
    }
    out
}
