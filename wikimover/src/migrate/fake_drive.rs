//! In-memory drive used by the engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use feishu_core::{ApiEnvelope, ApiRequest, ApiResponse, FeishuError};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::api::DriveApi;

pub const DRIVE_ROOT: &str = "my-drive-root";
pub const SPACE_ID: &str = "space-1";

pub fn file(token: &str, kind: &str) -> Value {
    json!({ "token": token, "name": token, "type": kind })
}

pub fn folder(token: &str) -> Value {
    json!({ "token": token, "name": token, "type": "folder" })
}

pub fn shortcut(token: &str, target_type: &str, target_token: &str) -> Value {
    json!({
        "token": token,
        "name": token,
        "type": "shortcut",
        "shortcut_info": { "target_type": target_type, "target_token": target_token }
    })
}

#[derive(Default)]
struct State {
    folders: HashMap<String, Vec<Value>>,
    names: HashMap<String, String>,
    calls: Vec<String>,
    failures: HashSet<String>,
    cancel_after: Option<(usize, CancellationToken)>,
    copy_as_task: bool,
    drop_copies: bool,
    copy_statuses: VecDeque<String>,
    move_tasks: bool,
    wiki_tasks: HashMap<String, Value>,
    wiki_nodes: Vec<(String, Option<String>)>,
    moves: Vec<(String, String, Option<String>)>,
    created: usize,
}

#[derive(Default)]
pub struct FakeDrive {
    state: Mutex<State>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(self, token: &str, items: Vec<Value>) -> Self {
        self.lock().folders.insert(token.to_string(), items);
        self
    }

    pub fn with_folder_name(self, token: &str, name: &str) -> Self {
        self.lock().names.insert(token.to_string(), name.to_string());
        self
    }

    /// Makes every call whose label matches fail with a non-success envelope.
    /// Labels are either a method name or `method:argument`.
    pub fn fail_on(self, label: &str) -> Self {
        self.lock().failures.insert(label.to_string());
        self
    }

    /// Cancels `token` while serving the `calls`-th request.
    pub fn cancel_after(self, calls: usize, token: CancellationToken) -> Self {
        self.lock().cancel_after = Some((calls, token));
        self
    }

    pub fn copy_as_task(self) -> Self {
        self.lock().copy_as_task = true;
        self
    }

    /// Copies are acknowledged but never show up in the target folder.
    pub fn drop_copies(self) -> Self {
        self.lock().drop_copies = true;
        self
    }

    pub fn with_copy_task_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .copy_statuses
            .extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn with_move_tasks(self) -> Self {
        self.lock().move_tasks = true;
        self
    }

    pub fn with_wiki_task(self, task_id: &str, data: Value) -> Self {
        self.lock().wiki_tasks.insert(task_id.to_string(), data);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_named(&self, method: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.split(':').next() == Some(method))
            .count()
    }

    /// Created wiki nodes as `(title, parent node token)`.
    pub fn wiki_nodes(&self) -> Vec<(String, Option<String>)> {
        self.lock().wiki_nodes.clone()
    }

    /// Moves as `(object token, object type, parent node token)`.
    pub fn moves(&self) -> Vec<(String, String, Option<String>)> {
        self.lock().moves.clone()
    }

    pub fn folder_items(&self, token: &str) -> Vec<Value> {
        self.lock().folders.get(token).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the call and decides whether it fails. The state lock is held
    /// for the whole request so handlers can keep using the guard.
    fn serve(
        &self,
        method: &str,
        arg: &str,
        handle: impl FnOnce(&mut State) -> Value,
    ) -> Result<ApiEnvelope, FeishuError> {
        let mut state = self.lock();
        let label = format!("{method}:{arg}");
        state.calls.push(label.clone());
        let served = state.calls.len();
        if let Some((limit, token)) = &state.cancel_after {
            if served >= *limit {
                token.cancel();
            }
        }
        let request = ApiRequest {
            method: method.to_string(),
            url: format!("fake://{method}/{arg}"),
            body: None,
        };
        if state.failures.contains(method) || state.failures.contains(&label) {
            return Ok(ApiEnvelope {
                ok: false,
                request,
                response: ApiResponse {
                    status: 400,
                    body: json!({ "code": 1_061_002, "msg": "injected failure" }),
                },
            });
        }
        let data = handle(&mut *state);
        Ok(ApiEnvelope {
            ok: true,
            request,
            response: ApiResponse {
                status: 200,
                body: json!({ "code": 0, "msg": "success", "data": data }),
            },
        })
    }
}

fn next_token(state: &mut State, prefix: &str) -> String {
    state.created += 1;
    format!("{prefix}-{}", state.created)
}

impl DriveApi for FakeDrive {
    async fn root_folder_meta(&self) -> Result<ApiEnvelope, FeishuError> {
        self.serve("root_folder_meta", "", |_| {
            json!({ "token": DRIVE_ROOT, "id": "7000" })
        })
    }

    async fn folder_meta(&self, folder_token: &str) -> Result<ApiEnvelope, FeishuError> {
        self.serve("folder_meta", folder_token, |state| {
            let name = state.names.get(folder_token).cloned();
            json!({ "token": folder_token, "name": name })
        })
    }

    async fn list_folder(
        &self,
        folder_token: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        self.serve("list_folder", folder_token, |state| {
            let items = state.folders.get(folder_token).cloned().unwrap_or_default();
            let start = page_token
                .and_then(|token| token.parse::<usize>().ok())
                .unwrap_or(0)
                .min(items.len());
            let end = (start + page_size.max(1) as usize).min(items.len());
            let has_more = end < items.len();
            let next = if has_more { end.to_string() } else { String::new() };
            json!({
                "files": &items[start..end],
                "has_more": has_more,
                "next_page_token": next,
            })
        })
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_token: &str,
    ) -> Result<ApiEnvelope, FeishuError> {
        self.serve("create_folder", name, |state| {
            let token = next_token(state, "fld");
            state.folders.insert(token.clone(), Vec::new());
            state
                .folders
                .entry(parent_token.to_string())
                .or_default()
                .push(json!({ "token": token, "name": name, "type": "folder" }));
            json!({ "token": token, "url": format!("https://example.test/{token}") })
        })
    }

    async fn copy_file(
        &self,
        file_token: &str,
        name: &str,
        obj_type: &str,
        folder_token: &str,
    ) -> Result<ApiEnvelope, FeishuError> {
        self.serve("copy_file", file_token, |state| {
            let copied = format!("copy-{file_token}");
            if !state.drop_copies {
                state
                    .folders
                    .entry(folder_token.to_string())
                    .or_default()
                    .push(json!({ "token": copied, "name": name, "type": obj_type }));
            }
            if state.copy_as_task {
                json!({ "task_id": format!("task-{file_token}") })
            } else {
                json!({ "file": { "token": copied, "name": name, "type": obj_type } })
            }
        })
    }

    async fn check_copy_task(&self, task_id: &str) -> Result<ApiEnvelope, FeishuError> {
        self.serve("check_copy_task", task_id, |state| {
            let status = state
                .copy_statuses
                .pop_front()
                .unwrap_or_else(|| "success".to_string());
            json!({ "status": status })
        })
    }

    async fn create_wiki_space(&self, name: &str) -> Result<ApiEnvelope, FeishuError> {
        self.serve("create_wiki_space", name, |_| {
            json!({ "space": { "space_id": SPACE_ID, "name": name } })
        })
    }

    async fn create_wiki_node(
        &self,
        _space_id: &str,
        title: &str,
        parent_node_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        self.serve("create_wiki_node", title, |state| {
            let token = next_token(state, "node");
            state
                .wiki_nodes
                .push((title.to_string(), parent_node_token.map(str::to_string)));
            json!({ "node": { "node_token": token, "title": title } })
        })
    }

    async fn move_docs_to_wiki(
        &self,
        _space_id: &str,
        obj_type: &str,
        obj_token: &str,
        parent_wiki_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        self.serve("move_docs_to_wiki", obj_token, |state| {
            state.moves.push((
                obj_token.to_string(),
                obj_type.to_string(),
                parent_wiki_token.map(str::to_string),
            ));
            if state.move_tasks {
                json!({ "task_id": format!("move-{obj_token}") })
            } else {
                json!({ "wiki_token": format!("wiki-{obj_token}") })
            }
        })
    }

    async fn get_wiki_task(&self, task_id: &str) -> Result<ApiEnvelope, FeishuError> {
        self.serve("get_wiki_task", task_id, |state| {
            state.wiki_tasks.get(task_id).cloned().unwrap_or_else(|| {
                json!({ "task": { "task_id": task_id, "move_result": [{ "status": 0, "status_msg": "success" }] } })
            })
        })
    }
}
