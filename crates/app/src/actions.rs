use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

use crate::background::Background;
use crate::session::ChatSession;
use services::page;
use services::PageContext;

/// Where an action is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionContext {
    Selection,
    Page,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAction {
    AskAboutSelection,
    SummarizePage,
    SummarizeSelection,
    AnalyzeImage,
    TranslateSelection,
}

impl ContextAction {
    pub const ALL: [ContextAction; 5] = [
        ContextAction::AskAboutSelection,
        ContextAction::SummarizePage,
        ContextAction::SummarizeSelection,
        ContextAction::AnalyzeImage,
        ContextAction::TranslateSelection,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ContextAction::AskAboutSelection => "askWallyAboutSelection",
            ContextAction::SummarizePage => "summarize-page",
            ContextAction::SummarizeSelection => "summarize-selection",
            ContextAction::AnalyzeImage => "analyze-image",
            ContextAction::TranslateSelection => "translate-selection",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ContextAction::AskAboutSelection => "Ask Wally about this",
            ContextAction::SummarizePage => "Summarize this page with Wally",
            ContextAction::SummarizeSelection => "Summarize selection with Wally",
            ContextAction::AnalyzeImage => "Analyze this image with Wally",
            ContextAction::TranslateSelection => "Translate with Wally",
        }
    }

    pub fn context(self) -> ActionContext {
        match self {
            ContextAction::SummarizePage => ActionContext::Page,
            ContextAction::AnalyzeImage => ActionContext::Image,
            _ => ActionContext::Selection,
        }
    }
}

impl fmt::Display for ContextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ContextAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::ALL.into_iter().find(|a| a.id() == s) {
            Some(action) => Ok(action),
            None => bail!("unknown context action: {s}"),
        }
    }
}

/// What the user clicked on.
#[derive(Debug, Clone, Default)]
pub struct ActionTarget {
    pub page: PageContext,
    /// Page HTML, needed to summarize the whole page.
    pub page_html: Option<String>,
    pub image_url: Option<String>,
}

/// Runs a context action. Actions whose input is missing (no selection for a
/// selection action, no image URL) do nothing and return `None`.
pub async fn dispatch(
    bg: &Background,
    session: &mut ChatSession,
    action: ContextAction,
    target: &ActionTarget,
) -> Result<Option<String>> {
    let selection = target.page.selection.trim();
    tracing::debug!(%action, "dispatching context action");

    let reply = match action {
        ContextAction::SummarizePage => {
            let Some(html) = target.page_html.as_deref() else {
                bail!("summarizing a page needs its HTML");
            };
            let content = page::extract_text(html, bg.settings().page_content_limit);
            if content.is_empty() {
                return Ok(None);
            }
            bg.summarize(session, &content, &target.page).await?
        }
        ContextAction::SummarizeSelection => {
            bg.summarize(session, selection, &target.page).await?
        }
        ContextAction::AskAboutSelection if !selection.is_empty() => {
            bg.ask_about_selection(session, &target.page, selection)
                .await?
        }
        ContextAction::TranslateSelection if !selection.is_empty() => {
            bg.translate(session, selection).await?
        }
        ContextAction::AnalyzeImage => match target.image_url.as_deref() {
            Some(url) if !url.is_empty() => bg.analyze_image(session, url).await?,
            _ => return Ok(None),
        },
        ContextAction::AskAboutSelection | ContextAction::TranslateSelection => return Ok(None),
    };
    Ok(Some(reply))
}
