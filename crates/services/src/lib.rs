pub mod auth_state;
pub mod history;
pub mod page;
pub mod prompts;
pub mod site_settings;
pub mod store;

pub use auth_state::AuthState;
pub use history::{ChatHistory, HistoryEntry, Sender};
pub use prompts::PageContext;
pub use site_settings::{SiteSettings, SiteStatus};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
