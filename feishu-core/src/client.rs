use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";

/// Largest page the drive listing endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum FeishuError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The request as it was actually sent, minus credentials.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Normalized result of one API call.
///
/// `ok` is true only when the HTTP status is a success and the JSON body
/// either has no `code` field or reports `code == 0`. Callers branch on `ok`
/// and on documented `data` fields, never on the raw status.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiEnvelope {
    pub ok: bool,
    pub request: ApiRequest,
    pub response: ApiResponse,
}

impl ApiEnvelope {
    pub fn code(&self) -> Option<i64> {
        self.response.body.get("code").and_then(Value::as_i64)
    }

    pub fn message(&self) -> Option<&str> {
        self.response.body.get("msg").and_then(Value::as_str)
    }

    pub fn data(&self) -> &Value {
        self.response.body.get("data").unwrap_or(&Value::Null)
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, FeishuError> {
        let data = match self.data() {
            Value::Null => json!({}),
            other => other.clone(),
        };
        Ok(serde_json::from_value(data)?)
    }
}

/// Returns the first non-empty string found along any of `paths`.
///
/// The open platform is inconsistent about where it puts tokens, so lookups
/// go through an ordered list of candidate locations.
pub fn first_string(data: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        let value = path
            .iter()
            .try_fold(data, |current, key| current.get(*key))?;
        match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    })
}

#[derive(Clone)]
pub struct FeishuClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl FeishuClient {
    pub fn new(token: impl Into<String>) -> Result<Self, FeishuError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, FeishuError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn root_folder_meta(&self) -> Result<ApiEnvelope, FeishuError> {
        let url = self.endpoint("/open-apis/drive/explorer/v2/root_folder/meta")?;
        self.send(Method::GET, url, None).await
    }

    pub async fn folder_meta(&self, folder_token: &str) -> Result<ApiEnvelope, FeishuError> {
        let mut url = self.endpoint("/open-apis/drive/explorer/v2/folder/")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(folder_token)
            .push("meta");
        self.send(Method::GET, url, None).await
    }

    pub async fn list_folder(
        &self,
        folder_token: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        let mut url = self.endpoint("/open-apis/drive/v1/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("folder_token", folder_token);
            query.append_pair("page_size", &page_size.clamp(1, MAX_PAGE_SIZE).to_string());
            if let Some(page_token) = page_token.filter(|t| !t.is_empty()) {
                query.append_pair("page_token", page_token);
            }
        }
        self.send(Method::GET, url, None).await
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_token: &str,
    ) -> Result<ApiEnvelope, FeishuError> {
        let url = self.endpoint("/open-apis/drive/v1/files/create_folder")?;
        let body = json!({
            "name": name,
            "folder_token": parent_token,
        });
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn copy_file(
        &self,
        file_token: &str,
        name: &str,
        obj_type: &str,
        folder_token: &str,
    ) -> Result<ApiEnvelope, FeishuError> {
        let url = self.token_endpoint("/open-apis/drive/v1/files/", &[file_token, "copy"])?;
        let body = json!({
            "name": name,
            "type": obj_type,
            "folder_token": folder_token,
        });
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn check_copy_task(&self, task_id: &str) -> Result<ApiEnvelope, FeishuError> {
        let mut url = self.endpoint("/open-apis/drive/v1/files/task_check")?;
        url.query_pairs_mut().append_pair("task_id", task_id);
        self.send(Method::GET, url, None).await
    }

    pub async fn create_wiki_space(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        let url = self.endpoint("/open-apis/wiki/v2/spaces")?;
        let mut body = json!({ "name": name });
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            body["description"] = json!(description);
        }
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn create_wiki_node(
        &self,
        space_id: &str,
        title: &str,
        parent_node_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        let url = self.token_endpoint("/open-apis/wiki/v2/spaces/", &[space_id, "nodes"])?;
        let mut body = json!({
            "obj_type": "docx",
            "node_type": "origin",
            "title": title,
        });
        if let Some(parent) = parent_node_token {
            body["parent_node_token"] = json!(parent);
        }
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn move_docs_to_wiki(
        &self,
        space_id: &str,
        obj_type: &str,
        obj_token: &str,
        parent_wiki_token: Option<&str>,
        apply: bool,
    ) -> Result<ApiEnvelope, FeishuError> {
        let url = self.token_endpoint(
            "/open-apis/wiki/v2/spaces/",
            &[space_id, "nodes", "move_docs_to_wiki"],
        )?;
        let mut body = json!({
            "obj_type": obj_type,
            "obj_token": obj_token,
            "apply": apply,
        });
        if let Some(parent) = parent_wiki_token {
            body["parent_wiki_token"] = json!(parent);
        }
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn get_wiki_task(
        &self,
        task_id: &str,
        task_type: &str,
    ) -> Result<ApiEnvelope, FeishuError> {
        let mut url = self.token_endpoint("/open-apis/wiki/v2/tasks/", &[task_id])?;
        url.query_pairs_mut().append_pair("task_type", task_type);
        self.send(Method::GET, url, None).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, FeishuError> {
        Ok(self.base_url.join(path)?)
    }

    fn token_endpoint(&self, prefix: &str, segments: &[&str]) -> Result<Url, FeishuError> {
        let mut url = self.endpoint(prefix)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<ApiEnvelope, FeishuError> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("Authorization", self.auth_header_value());
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        let ok = status.is_success() && body_reports_success(&parsed);
        Ok(ApiEnvelope {
            ok,
            request: ApiRequest {
                method: method.to_string(),
                url: url.to_string(),
                body,
            },
            response: ApiResponse {
                status: status.as_u16(),
                body: parsed,
            },
        })
    }
}

fn body_reports_success(body: &Value) -> bool {
    match body.get("code") {
        None => true,
        Some(code) => code.as_i64() == Some(0),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FolderMeta {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, alias = "next_page_token")]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DriveFile {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub file_token: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, rename = "file_type")]
    pub alt_kind: Option<String>,
    #[serde(default)]
    pub parent_token: Option<String>,
    #[serde(default)]
    pub shortcut_info: Option<ShortcutInfo>,
}

impl DriveFile {
    pub fn raw_token(&self) -> Option<&str> {
        [&self.token, &self.file_token, &self.id]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|token| !token.is_empty())
    }

    pub fn display_name(&self) -> Option<&str> {
        [&self.name, &self.title]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|name| !name.is_empty())
    }

    pub fn declared_type(&self) -> Option<&str> {
        [&self.kind, &self.alt_kind]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|kind| !kind.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShortcutInfo {
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub target_token: Option<String>,
}
