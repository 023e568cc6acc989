//! Dangling-delimiter repair for partially streamed markdown.
//!
//! A streamed response is rendered many times while it is still incomplete, so
//! the tail of the buffer often holds an opener whose closer has not arrived
//! yet. Rendering such a tail literally makes `**` or a code fence flash on
//! screen and then disappear. Instead, [`repair`] cuts the buffer at the
//! earliest unmatched opener:
//!
//! | construct     | unmatched when                                  |
//! |---------------|-------------------------------------------------|
//! | fenced code   | a ```` ``` ```` has no closing fence             |
//! | inline code   | a `` ` `` has no closing backtick on its line    |
//! | bold          | a `**` opener has no closer on the last line     |
//! | italic        | a lone `*` opener has no closer on the last line |
//!
//! Emphasis and inline code are line-scoped: an opener left unclosed on a line
//! that already ended is plain text and never truncates what follows.
//! Delimiters inside code are ignored. A delimiter touching the very end of the
//! buffer is pending (the next fragment decides what it is) and is dropped too,
//! unless it follows a non-space character: then it can only be a closer and is
//! kept, even when its opener was on an earlier line.

/// A code-aware token of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Byte range of text outside any code construct.
    Text { start: usize, end: usize },
    /// A complete fenced block; `lang` is the word right after the opening fence.
    Fence { lang: &'a str, body: &'a str },
    /// A complete inline code span.
    Code(&'a str),
}

/// Result of [`scan_code`].
#[derive(Debug, Default)]
pub struct CodeScan<'a> {
    pub tokens: Vec<Token<'a>>,
    /// Offset of an unmatched code opener; tokens stop there.
    pub dangling: Option<usize>,
}

/// Split `text` into plain text and code tokens.
pub fn scan_code(text: &str) -> CodeScan<'_> {
    let bytes = text.as_bytes();
    let mut scan = CodeScan::default();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }

        let run = run_length(bytes, i, b'`');
        if run >= 3 {
            let after_fence = i + 3;
            let Some(close) = text[after_fence..].find("```").map(|off| after_fence + off) else {
                scan.dangling = Some(i);
                break;
            };
            let lang_len = text[after_fence..close]
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'+' | b'-'))
                .count();
            push_text(&mut scan.tokens, text_start, i);
            scan.tokens.push(Token::Fence {
                lang: &text[after_fence..after_fence + lang_len],
                body: &text[after_fence + lang_len..close],
            });
            i = close + 3;
            text_start = i;
        } else if i + run == bytes.len() {
            // one or two trailing backticks may still grow into a fence,
            // unless they touch a word and can only close
            if closes_only(text, i) {
                i += run;
            } else {
                scan.dangling = Some(i);
                break;
            }
        } else if run == 2 {
            i += 2;
        } else {
            let rest = &text[i + 1..];
            match rest.find(|c| c == '`' || c == '\n') {
                Some(off) if rest.as_bytes()[off] == b'`' => {
                    let close = i + 1 + off;
                    push_text(&mut scan.tokens, text_start, i);
                    scan.tokens.push(Token::Code(&text[i + 1..close]));
                    i = close + 1;
                    text_start = i;
                }
                Some(_) => i += 1,
                None => {
                    scan.dangling = Some(i);
                    break;
                }
            }
        }
    }

    let end = scan.dangling.unwrap_or(bytes.len());
    push_text(&mut scan.tokens, text_start, end);
    scan
}

/// Offset where the unmatched tail of `text` begins, if it has one.
pub fn dangling_start(text: &str) -> Option<usize> {
    let scan = scan_code(text);
    let region_end = scan.dangling.unwrap_or(text.len());
    let mut emphasis = EmphasisState::default();

    for token in &scan.tokens {
        match *token {
            Token::Text { start, end } => emphasis.scan(text, start, end, region_end),
            Token::Fence { .. } => emphasis.reset_line(),
            Token::Code(_) => {}
        }
    }

    [scan.dangling, emphasis.pending, emphasis.bold, emphasis.italic]
        .into_iter()
        .flatten()
        .min()
}

/// The renderable part of `text`: everything before the earliest dangling
/// opener. The input itself is never modified.
pub fn repair(text: &str) -> &str {
    let mut repaired = text;
    // Cutting can expose a new trailing delimiter, so settle on a fixpoint.
    while let Some(cut) = dangling_start(repaired) {
        if cut >= repaired.len() {
            break;
        }
        repaired = &repaired[..cut];
    }
    repaired
}

#[derive(Debug, Default)]
struct EmphasisState {
    bold: Option<usize>,
    italic: Option<usize>,
    pending: Option<usize>,
}

impl EmphasisState {
    fn reset_line(&mut self) {
        self.bold = None;
        self.italic = None;
    }

    fn scan(&mut self, text: &str, start: usize, end: usize, region_end: usize) {
        let bytes = text.as_bytes();
        let mut i = start;
        while i < end {
            match bytes[i] {
                b'\n' => {
                    self.reset_line();
                    i += 1;
                }
                b'*' => {
                    let run = run_length(&bytes[..end], i, b'*');
                    self.delimiter_run(text, i, run, region_end);
                    i += run;
                }
                _ => i += 1,
            }
        }
    }

    /// Pairs of `*` in a run act as bold, a leftover single one as italic.
    fn delimiter_run(&mut self, text: &str, pos: usize, run: usize, region_end: usize) {
        let next = if pos + run < region_end {
            text[pos + run..].chars().next()
        } else {
            None
        };

        let mut offset = 0;
        while run - offset >= 2 {
            let at = pos + offset;
            if self.bold.is_some() {
                self.bold = None;
            } else {
                self.open(Delimiter::Bold, at, next, closes_only(text, at));
            }
            offset += 2;
        }

        if run - offset == 1 {
            let at = pos + offset;
            let prev = text[..at].chars().next_back();
            if self.italic.is_some() && prev.is_some_and(|c| !c.is_whitespace()) {
                self.italic = None;
            } else if prev.map_or(true, |c| !c.is_alphanumeric()) {
                self.open(Delimiter::Italic, at, next, closes_only(text, at));
            }
        }
    }

    fn open(&mut self, delimiter: Delimiter, at: usize, next: Option<char>, closer: bool) {
        match next {
            None if closer => {}
            None => {
                self.pending.get_or_insert(at);
            }
            Some(c) if !c.is_whitespace() => match delimiter {
                Delimiter::Bold => self.bold = Some(at),
                Delimiter::Italic => self.italic = Some(at),
            },
            Some(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Delimiter {
    Bold,
    Italic,
}

/// A delimiter right after a non-space character cannot open anything.
fn closes_only(text: &str, at: usize) -> bool {
    text[..at].chars().next_back().is_some_and(|c| !c.is_whitespace())
}

fn run_length(bytes: &[u8], start: usize, byte: u8) -> usize {
    bytes[start..].iter().take_while(|&&b| b == byte).count()
}

fn push_text(tokens: &mut Vec<Token<'_>>, start: usize, end: usize) {
    if start < end {
        tokens.push(Token::Text { start, end });
    }
}
