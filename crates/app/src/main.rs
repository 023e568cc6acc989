mod actions;
mod background;
mod session;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use render::{StreamAccumulator, StreamSink};
use services::{history, site_settings, ChatHistory, JsonFileStore, KeyValueStore, PageContext};
use shared::error::ChatError;
use shared::settings::WallySettings;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use crate::actions::{ActionTarget, ContextAction};
use crate::background::Background;
use crate::session::ChatSession;

#[derive(Parser)]
#[command(name = "wally")]
#[command(version)]
#[command(about = "Wally, a cheerful AI assistant for the page you are reading")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage file (default: platform config dir)
    #[arg(long, env = "WALLY_STORE", global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Read from stdin when omitted
        #[arg(long, env = "WALLY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log in and store the session tokens
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "WALLY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log out and clear stored credentials
    Logout,
    /// Show whether a usable session is stored
    Status,
    /// Ask a question about a page
    Chat {
        #[command(flatten)]
        page: PageArgs,
        message: String,
    },
    /// Summarize an HTML file (or `-` for stdin), or the selection if given
    Summarize {
        #[command(flatten)]
        page: PageArgs,
        /// HTML of the page
        #[arg(long, value_name = "FILE")]
        html: Option<PathBuf>,
    },
    /// Translate text into the base language
    Translate { text: String },
    /// Describe an image
    AnalyzeImage { url: String },
    /// Run a context menu action by id
    Action {
        /// e.g. askWallyAboutSelection, summarize-page
        id: String,
        #[command(flatten)]
        page: PageArgs,
        #[arg(long, value_name = "FILE")]
        html: Option<PathBuf>,
        #[arg(long)]
        image: Option<String>,
    },
    /// List context menu actions
    Actions,
    /// Render markdown from stdin to HTML
    Render {
        /// Feed the input in fragments of this many characters and print every frame
        #[arg(long, value_name = "CHARS")]
        chunk: Option<usize>,
    },
    /// Per-site enable switches
    Site {
        #[command(subcommand)]
        command: SiteCommands,
    },
    /// Show or set the translation language
    Language { language: Option<String> },
    /// Delete the chat history of every site
    ClearHistory,
}

#[derive(Subcommand)]
enum SiteCommands {
    /// Check whether Wally runs on a URL
    Check { url: String },
    Enable { host: String },
    Disable { host: String },
    /// Set the default for sites without an override
    Global {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct PageArgs {
    /// URL of the page the question is about
    #[arg(long, default_value = "about:blank")]
    url: String,
    #[arg(long, default_value = "")]
    title: String,
    /// Selected text on the page
    #[arg(long)]
    selection: Option<String>,
}

impl PageArgs {
    fn context(&self) -> PageContext {
        PageContext::new(&self.url, &self.title)
            .with_selection(self.selection.clone().unwrap_or_default())
    }

    fn host(&self) -> String {
        site_settings::host_of(&self.url).unwrap_or_else(|_| "local".to_string())
    }
}

fn read_password(flag: Option<String>) -> Result<Zeroizing<String>> {
    if let Some(password) = flag {
        return Ok(Zeroizing::new(password));
    }
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string());
    if trimmed.is_empty() {
        bail!("a password is required");
    }
    Ok(trimmed)
}

fn read_html(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut html = String::new();
        io::stdin().read_to_string(&mut html)?;
        return Ok(html);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn open_session(
    settings: &WallySettings,
    store: &Arc<dyn KeyValueStore>,
    page: &PageArgs,
) -> Result<ChatSession> {
    let history = ChatHistory::load(
        store.clone(),
        &page.host(),
        settings.stored_history,
        settings.request_history,
    )?;
    Ok(ChatSession::new(history))
}

/// Prints the session's reply whether the request succeeded or not.
fn print_reply(session: &ChatSession, result: Result<String>) -> Result<()> {
    if let Some(html) = session.last_reply_html() {
        println!("{html}");
    }
    result.map(|_| ())
}

/// Prints every intermediate frame of a simulated stream.
struct FramePrinter {
    frames: usize,
}

impl StreamSink for FramePrinter {
    fn on_render(&mut self, cumulative: &str) {
        self.frames += 1;
        println!("--- frame {} ---\n{}", self.frames, render::render(cumulative));
    }

    fn on_complete(&mut self, text: &str) {
        println!("--- final ---\n{}", render::render(text));
    }

    fn on_error(&mut self, error: &ChatError) {
        eprintln!("stream failed: {error}");
    }
}

fn render_stdin(chunk: Option<usize>) -> Result<()> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    let Some(size) = chunk.filter(|n| *n > 0) else {
        println!("{}", render::render(&input));
        return Ok(());
    };

    let mut acc = StreamAccumulator::new();
    let mut printer = FramePrinter { frames: 0 };
    let chars: Vec<char> = input.chars().collect();
    for piece in chars.chunks(size) {
        let fragment: String = piece.iter().collect();
        acc.on_fragment(&fragment, &mut printer);
    }
    acc.on_complete(&mut printer);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render { chunk } => render_stdin(chunk),
        Commands::Actions => {
            for action in ContextAction::ALL {
                let context = format!("{:?}", action.context());
                println!("{:<24} {:<10} {}", action.id(), context, action.title());
            }
            Ok(())
        }
        command => run(command, cli.store).await,
    }
}

async fn run(command: Commands, store_path: Option<PathBuf>) -> Result<()> {
    let settings = WallySettings::from_env();
    let store: Arc<dyn KeyValueStore> = Arc::new(match store_path {
        Some(path) => JsonFileStore::open(path)?,
        None => JsonFileStore::open_default()?,
    });
    let bg = Background::new(settings.clone(), store.clone());
    bg.on_install()?;

    match command {
        Commands::Register {
            email,
            name,
            password,
        } => {
            let password = read_password(password)?;
            bg.auth().register(&email, &password, &name).await?;
            println!("Registered {email}");
        }
        Commands::Login { email, password } => {
            let password = read_password(password)?;
            bg.auth().login(&email, &password).await?;
            println!("Logged in as {email}");
        }
        Commands::Logout => {
            let acknowledged = bg.auth().logout().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "logout request failed");
                false
            });
            println!("Logged out{}", if acknowledged { "" } else { " (locally)" });
        }
        Commands::Status => {
            if bg.auth().is_authenticated().await {
                let user = match bg.auth().fetch_user_data().await {
                    Ok(Some(user)) => Some(user),
                    Ok(None) => bg.auth().user_data()?,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not refresh user data");
                        bg.auth().user_data()?
                    }
                };
                match user.as_ref().and_then(|u| u.get("email")).and_then(|e| e.as_str()) {
                    Some(email) => println!("Logged in as {email}"),
                    None => println!("Logged in"),
                }
            } else {
                println!("Not logged in");
            }
        }
        Commands::Chat { page, message } => {
            let mut session = open_session(&settings, &store, &page)?;
            let result = bg.send_chat(&mut session, &page.context(), &message).await;
            print_reply(&session, result)?;
        }
        Commands::Summarize { page, html } => {
            let action = if html.is_some() {
                ContextAction::SummarizePage
            } else {
                ContextAction::SummarizeSelection
            };
            let target = ActionTarget {
                page: page.context(),
                page_html: html.as_deref().map(read_html).transpose()?,
                image_url: None,
            };
            let mut session = open_session(&settings, &store, &page)?;
            let result = actions::dispatch(&bg, &mut session, action, &target).await;
            print_reply(&session, result.map(Option::unwrap_or_default))?;
        }
        Commands::Translate { text } => {
            let page = PageArgs {
                url: "about:blank".into(),
                title: String::new(),
                selection: None,
            };
            let mut session = open_session(&settings, &store, &page)?;
            let result = bg.translate(&mut session, &text).await;
            print_reply(&session, result)?;
        }
        Commands::AnalyzeImage { url } => {
            let page = PageArgs {
                url: url.clone(),
                title: String::new(),
                selection: None,
            };
            let mut session = open_session(&settings, &store, &page)?;
            let result = bg.analyze_image(&mut session, &url).await;
            print_reply(&session, result)?;
        }
        Commands::Action {
            id,
            page,
            html,
            image,
        } => {
            let action: ContextAction = id.parse()?;
            let target = ActionTarget {
                page: page.context(),
                page_html: html.as_deref().map(read_html).transpose()?,
                image_url: image,
            };
            let mut session = open_session(&settings, &store, &page)?;
            match actions::dispatch(&bg, &mut session, action, &target).await {
                Ok(None) => println!("Nothing to do for {}", action.title()),
                result => print_reply(&session, result.map(Option::unwrap_or_default))?,
            }
        }
        Commands::Site { command } => match command {
            SiteCommands::Check { url } => {
                let status = bg.check_site(&url).await;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            SiteCommands::Enable { host } => bg.sites().set_site_enabled(&host, true)?,
            SiteCommands::Disable { host } => bg.sites().set_site_enabled(&host, false)?,
            SiteCommands::Global { enabled } => bg.sites().set_global_enabled(enabled)?,
        },
        Commands::Language { language } => match language {
            Some(language) => bg.sites().set_base_language(&language)?,
            None => println!("{}", bg.sites().base_language()?),
        },
        Commands::ClearHistory => {
            let cleared = history::clear_all(store.as_ref())?;
            println!("Cleared history for {cleared} site(s)");
        }
        Commands::Render { .. } | Commands::Actions => {}
    }
    Ok(())
}
