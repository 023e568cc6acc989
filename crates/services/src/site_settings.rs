use serde::Serialize;
use serde_json::{json, Value};
use shared::error::ChatError;
use std::sync::Arc;
use url::Url;

use crate::auth_state::AuthState;
use crate::store::{string_value, Entries, KeyValueStore};

pub const ENABLED_SITES: &str = "enabledSites";
pub const GLOBAL_ENABLED: &str = "globalEnabled";
pub const BASE_LANGUAGE: &str = "baseLanguage";
pub const DEFAULT_LANGUAGE: &str = "English";

const AUTH_MESSAGE: &str = "Authentication required. Please log in to use Wally.";
const CHECK_FAILED_MESSAGE: &str = "Failed to check settings. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    pub is_enabled: bool,
    pub requires_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SiteStatus {
    fn blocked(message: &str) -> Self {
        Self {
            is_enabled: false,
            requires_auth: true,
            message: Some(message.to_string()),
        }
    }
}

/// Per-host enable switches and the translation target language.
pub struct SiteSettings {
    store: Arc<dyn KeyValueStore>,
}

impl SiteSettings {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn check_site(&self, auth: &AuthState, url: &str) -> SiteStatus {
        if !auth.is_authenticated().await {
            return SiteStatus::blocked(AUTH_MESSAGE);
        }
        match self.is_enabled_for(url) {
            Ok(is_enabled) => SiteStatus {
                is_enabled,
                requires_auth: false,
                message: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, %url, "site check failed");
                SiteStatus::blocked(CHECK_FAILED_MESSAGE)
            }
        }
    }

    /// Host override, then the global switch, then enabled.
    pub fn is_enabled_for(&self, url: &str) -> Result<bool, ChatError> {
        let host = host_of(url)?;
        let values = self.store.get(&[ENABLED_SITES, GLOBAL_ENABLED])?;
        let global = values.get(GLOBAL_ENABLED).and_then(Value::as_bool);
        let site = values
            .get(ENABLED_SITES)
            .and_then(|sites| sites.get(&host))
            .and_then(Value::as_bool);
        Ok(site.or(global).unwrap_or(true))
    }

    pub fn set_site_enabled(&self, host: &str, enabled: bool) -> Result<(), ChatError> {
        let mut sites = self
            .store
            .get(&[ENABLED_SITES])?
            .remove(ENABLED_SITES)
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();
        sites.insert(host.to_string(), json!(enabled));

        let mut entries = Entries::new();
        entries.insert(ENABLED_SITES.into(), Value::Object(sites));
        self.store.set(entries)
    }

    pub fn set_global_enabled(&self, enabled: bool) -> Result<(), ChatError> {
        let mut entries = Entries::new();
        entries.insert(GLOBAL_ENABLED.into(), json!(enabled));
        self.store.set(entries)
    }

    pub fn base_language(&self) -> Result<String, ChatError> {
        Ok(string_value(&self.store.get(&[BASE_LANGUAGE])?, BASE_LANGUAGE)
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()))
    }

    pub fn set_base_language(&self, language: &str) -> Result<(), ChatError> {
        let mut entries = Entries::new();
        entries.insert(BASE_LANGUAGE.into(), json!(language));
        self.store.set(entries)
    }

    /// Seeds the default language if none is stored yet. Returns true if it wrote.
    pub fn seed_defaults(&self) -> Result<bool, ChatError> {
        if string_value(&self.store.get(&[BASE_LANGUAGE])?, BASE_LANGUAGE).is_some() {
            return Ok(false);
        }
        self.set_base_language(DEFAULT_LANGUAGE)?;
        Ok(true)
    }
}

pub fn host_of(url: &str) -> Result<String, ChatError> {
    let parsed = Url::parse(url).map_err(|e| ChatError::Store(format!("invalid url {url}: {e}")))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| ChatError::Store(format!("url has no host: {url}")))
}
