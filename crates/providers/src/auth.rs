//! REST client for the Wally auth service.

use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds; the caller applies a default when absent.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Thin client over `/signup/email`, `/login`, `/refresh`, `/logout` and `/me`.
pub struct AuthClient {
    http: Client,
    base: String,
}

impl AuthClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<RegisterResponse> {
        let resp = self
            .http
            .post(self.url("signup/email"))
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "full_name": full_name,
            }))
            .send()
            .await?;
        parse(resp, "Registration failed").await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let resp = self
            .http
            .post(self.url("login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        parse(resp, "Login failed").await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        let resp = self
            .http
            .post(self.url("refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        parse(resp, "Token refresh failed").await
    }

    /// Returns whether the server acknowledged the logout.
    pub async fn logout(&self, access_token: &str) -> Result<bool> {
        let resp = self
            .http
            .post(self.url("logout"))
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    pub async fn me(&self, access_token: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(self.url("me"))
            .bearer_auth(access_token)
            .send()
            .await?;
        parse(resp, "Failed to get user data").await
    }
}

/// Decode a success body, or turn the server's `message` into the error.
async fn parse<T: DeserializeOwned>(resp: Response, fallback: &str) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());
        tracing::warn!(%status, %message, "auth request failed");
        return Err(anyhow!("{} ({})", message, status.as_u16()));
    }
    Ok(resp.json().await?)
}
