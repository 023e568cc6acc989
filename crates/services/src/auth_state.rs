use chrono::Utc;
use providers::auth::{AuthClient, LoginResponse, RefreshResponse, RegisterResponse};
use serde_json::{json, Value};
use shared::error::ChatError;
use shared::settings::WallySettings;
use std::sync::Arc;

use crate::store::{string_value, Entries, KeyValueStore};

pub const API_KEY: &str = "wallyApiKey";
pub const ACCESS_TOKEN: &str = "accessToken";
pub const REFRESH_TOKEN: &str = "refreshToken";
pub const TOKEN_EXPIRES_AT: &str = "tokenExpiresAt";
pub const USER_DATA: &str = "userData";

const ALL_KEYS: [&str; 5] = [API_KEY, ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_EXPIRES_AT, USER_DATA];

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Stored credentials plus the refresh policy around them.
pub struct AuthState {
    store: Arc<dyn KeyValueStore>,
    client: AuthClient,
    refresh_window_ms: i64,
    default_expires_in: i64,
}

impl AuthState {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &WallySettings) -> Self {
        Self::with_client(store, AuthClient::new(&settings.auth_base), settings)
    }

    pub fn with_client(
        store: Arc<dyn KeyValueStore>,
        client: AuthClient,
        settings: &WallySettings,
    ) -> Self {
        Self {
            store,
            client,
            refresh_window_ms: settings.refresh_window_secs * 1000,
            default_expires_in: settings.default_expires_in_secs,
        }
    }

    fn expires_at(&self, expires_in: Option<i64>) -> i64 {
        let secs = expires_in
            .filter(|s| *s > 0)
            .unwrap_or(self.default_expires_in);
        now_millis() + secs * 1000
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> anyhow::Result<RegisterResponse> {
        let resp = self.client.register(email, password, full_name).await?;
        let mut entries = Entries::new();
        if let Some(key) = &resp.api_key {
            entries.insert(API_KEY.into(), json!(key));
        }
        entries.insert(USER_DATA.into(), resp.user.clone().unwrap_or(Value::Null));
        self.store.set(entries)?;
        tracing::info!("registered new account");
        Ok(resp)
    }

    pub async fn login(&self, email: &str, password: &str) -> anyhow::Result<LoginResponse> {
        let resp = self.client.login(email, password).await?;
        self.save_login(&resp)?;
        tracing::info!("logged in");
        Ok(resp)
    }

    pub fn save_login(&self, resp: &LoginResponse) -> Result<(), ChatError> {
        let mut entries = Entries::new();
        entries.insert(API_KEY.into(), json!(resp.api_key));
        entries.insert(ACCESS_TOKEN.into(), json!(resp.access_token));
        entries.insert(REFRESH_TOKEN.into(), json!(resp.refresh_token));
        entries.insert(TOKEN_EXPIRES_AT.into(), json!(self.expires_at(resp.expires_in)));
        entries.insert(USER_DATA.into(), resp.user.clone().unwrap_or(Value::Null));
        self.store.set(entries)
    }

    pub fn save_refresh(&self, resp: &RefreshResponse) -> Result<(), ChatError> {
        let mut entries = Entries::new();
        entries.insert(ACCESS_TOKEN.into(), json!(resp.access_token));
        entries.insert(REFRESH_TOKEN.into(), json!(resp.refresh_token));
        entries.insert(TOKEN_EXPIRES_AT.into(), json!(self.expires_at(resp.expires_in)));
        self.store.set(entries)
    }

    pub fn api_key(&self) -> Result<Option<String>, ChatError> {
        Ok(string_value(&self.store.get(&[API_KEY])?, API_KEY))
    }

    pub fn user_data(&self) -> Result<Option<Value>, ChatError> {
        Ok(self
            .store
            .get(&[USER_DATA])?
            .remove(USER_DATA)
            .filter(|v| !v.is_null()))
    }

    /// Fetches the profile with the stored access token and caches it as
    /// `userData`. `None` without an access token.
    pub async fn fetch_user_data(&self) -> anyhow::Result<Option<Value>> {
        let Some(token) = string_value(&self.store.get(&[ACCESS_TOKEN])?, ACCESS_TOKEN) else {
            return Ok(None);
        };
        let user = self.client.me(&token).await?;
        let mut entries = Entries::new();
        entries.insert(USER_DATA.into(), user.clone());
        self.store.set(entries)?;
        Ok(Some(user))
    }

    /// True when a key is stored and the session is not about to lapse.
    ///
    /// A token expiring within the refresh window is refreshed first; if that
    /// fails the current token still counts until it actually expires.
    pub async fn is_authenticated(&self) -> bool {
        match self.check().await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                tracing::warn!(error = %e, "auth check failed");
                false
            }
        }
    }

    async fn check(&self) -> Result<bool, ChatError> {
        let values = self.store.get(&[API_KEY, REFRESH_TOKEN, TOKEN_EXPIRES_AT])?;
        if string_value(&values, API_KEY).is_none() {
            return Ok(false);
        }

        let expires_at = values
            .get(TOKEN_EXPIRES_AT)
            .and_then(Value::as_i64)
            .filter(|t| *t != 0);
        let refresh_token = string_value(&values, REFRESH_TOKEN);
        let now = now_millis();

        match (expires_at, refresh_token) {
            (Some(expires_at), Some(refresh_token))
                if expires_at - now < self.refresh_window_ms =>
            {
                match self.client.refresh(&refresh_token).await {
                    Ok(resp) => {
                        self.save_refresh(&resp)?;
                        tracing::debug!("access token refreshed");
                        Ok(true)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "token refresh failed");
                        Ok(now < expires_at)
                    }
                }
            }
            _ => Ok(true),
        }
    }

    /// Tells the server, then clears every credential key whatever it answered.
    pub async fn logout(&self) -> anyhow::Result<bool> {
        let token = string_value(&self.store.get(&[ACCESS_TOKEN])?, ACCESS_TOKEN);
        let result = match token {
            Some(token) => self.client.logout(&token).await,
            None => Ok(false),
        };
        self.store.remove(&ALL_KEYS)?;
        tracing::info!("logged out");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seeded(server_url: &str, expires_at: i64) -> (Arc<MemoryStore>, AuthState) {
        let store = Arc::new(MemoryStore::new());
        let mut entries = Entries::new();
        entries.insert(API_KEY.into(), json!("key"));
        entries.insert(ACCESS_TOKEN.into(), json!("at"));
        entries.insert(REFRESH_TOKEN.into(), json!("rt"));
        entries.insert(TOKEN_EXPIRES_AT.into(), json!(expires_at));
        store.set(entries).unwrap();
        let state = AuthState::with_client(
            store.clone(),
            AuthClient::new(server_url),
            &WallySettings::default(),
        );
        (store, state)
    }

    #[tokio::test]
    async fn test_no_key_is_unauthenticated() {
        let state = AuthState::with_client(
            Arc::new(MemoryStore::new()),
            AuthClient::new("http://127.0.0.1:9"),
            &WallySettings::default(),
        );
        assert!(!state.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_fresh_token_needs_no_refresh() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server.mock("POST", "/refresh").expect(0).create_async().await;
        let (_, state) = seeded(&server.url(), now_millis() + 3_600_000);

        assert!(state.is_authenticated().await);
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(200)
            .with_body(r#"{"access_token":"at2","refresh_token":"rt2","expires_in":7200}"#)
            .create_async()
            .await;
        let (store, state) = seeded(&server.url(), now_millis() + 60_000);

        assert!(state.is_authenticated().await);
        let values = store.get(&[ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_EXPIRES_AT]).unwrap();
        assert_eq!(values[ACCESS_TOKEN], "at2");
        assert_eq!(values[REFRESH_TOKEN], "rt2");
        assert!(values[TOKEN_EXPIRES_AT].as_i64().unwrap() > now_millis() + 7_000_000);
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_expiry() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let (_, still_valid) = seeded(&server.url(), now_millis() + 60_000);
        assert!(still_valid.is_authenticated().await);

        let (_, expired) = seeded(&server.url(), now_millis() - 1_000);
        assert!(!expired.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_logout_clears_keys_even_when_server_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logout")
            .with_status(500)
            .create_async()
            .await;
        let (store, state) = seeded(&server.url(), now_millis() + 3_600_000);

        assert!(!state.logout().await.unwrap());
        assert!(store.get(&ALL_KEYS).unwrap().is_empty());
        assert_eq!(state.api_key().unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_user_data_caches_profile() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/me")
            .match_header("authorization", "Bearer at")
            .with_status(200)
            .with_body(r#"{"email":"a@b.c","name":"Ann"}"#)
            .create_async()
            .await;
        let (_, state) = seeded(&server.url(), now_millis() + 3_600_000);

        let user = state.fetch_user_data().await.unwrap().unwrap();
        assert_eq!(user["name"], "Ann");
        assert_eq!(state.user_data().unwrap().unwrap()["email"], "a@b.c");
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_user_data_without_token() {
        let state = AuthState::with_client(
            Arc::new(MemoryStore::new()),
            AuthClient::new("http://127.0.0.1:9"),
            &WallySettings::default(),
        );
        assert!(state.fetch_user_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_applies_default_expiry() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"apiKey":"k","access_token":"a","refresh_token":"r","user":{"email":"a@b.c"}}"#)
            .create_async()
            .await;
        let store = Arc::new(MemoryStore::new());
        let state = AuthState::with_client(
            store.clone(),
            AuthClient::new(&server.url()),
            &WallySettings::default(),
        );

        state.login("a@b.c", "pw").await.unwrap();
        assert_eq!(state.api_key().unwrap().as_deref(), Some("k"));
        assert_eq!(state.user_data().unwrap().unwrap()["email"], "a@b.c");
        let expires_at = store.get(&[TOKEN_EXPIRES_AT]).unwrap()[TOKEN_EXPIRES_AT]
            .as_i64()
            .unwrap();
        let delta = expires_at - now_millis();
        assert!(delta > 3_500_000 && delta <= 3_600_000);
    }
}
