use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";
const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.feishu.cn";

/// Scopes needed to read the drive, copy documents and build a wiki space.
pub const DEFAULT_SCOPE: &str = "drive:drive:readonly drive:drive.metadata:readonly wiki:wiki space:folder:create docs:document:copy";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    base_url: Url,
    accounts_url: Url,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_base_urls(
            DEFAULT_BASE_URL,
            DEFAULT_ACCOUNTS_URL,
            client_id,
            client_secret,
        )
    }

    pub fn with_base_urls(
        base_url: &str,
        accounts_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            accounts_url: Url::parse(accounts_url)?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        scope: Option<&str>,
        state: Option<&str>,
    ) -> Result<Url, OAuthError> {
        let mut url = self.accounts_url.join("/open-apis/authen/v1/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("response_type", "code");
            if let Some(scope) = scope.map(normalize_scope).filter(|s| !s.is_empty()) {
                query.append_pair("scope", &scope);
            }
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scope: Option<&str>,
    ) -> Result<OAuthToken, OAuthError> {
        let mut payload = json!({
            "grant_type": "authorization_code",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "code": code,
            "redirect_uri": redirect_uri,
        });
        if let Some(scope) = scope.map(normalize_scope).filter(|s| !s.is_empty()) {
            payload["scope"] = json!(scope);
        }
        self.post_token(payload).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        let payload = json!({
            "grant_type": "refresh_token",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "refresh_token": refresh_token,
        });
        self.post_token(payload).await
    }

    async fn post_token(&self, payload: Value) -> Result<OAuthToken, OAuthError> {
        let url = self.base_url.join("/open-apis/authen/v2/oauth/token")?;
        let response = self.http.post(url).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<Value>(&body).ok();
        let code_ok = parsed
            .as_ref()
            .and_then(|value| value.get("code"))
            .is_none_or(|code| code.as_i64() == Some(0));
        match parsed {
            Some(value) if status.is_success() && code_ok => serde_json::from_value(value)
                .map_err(|_| OAuthError::Api { status, body }),
            _ => Err(OAuthError::Api { status, body }),
        }
    }
}

fn normalize_scope(scope: &str) -> String {
    scope.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}
