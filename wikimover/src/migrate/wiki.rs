use std::collections::HashMap;

use feishu_core::first_string;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::backoff::PollBackoff;
use super::copy::CopiedItem;
use super::error::{MigrationError, ensure_ok};
use super::plan::{FolderPlan, normalize_wiki_type};
use super::progress::RunContext;
use crate::api::DriveApi;
use crate::config::MigrationConfig;

/// Creates the destination space and returns its id.
pub async fn create_wiki_space<A: DriveApi>(
    api: &A,
    ctx: &RunContext,
    name: &str,
) -> Result<String, MigrationError> {
    const STEP: &str = "create wiki space";
    ctx.checkpoint()?;
    let envelope = ensure_ok(STEP, api.create_wiki_space(name).await)?;
    let space_id = first_string(
        envelope.data(),
        &[&["space", "space_id"], &["space_id"], &["space", "id"], &["id"]],
    )
    .ok_or_else(|| MigrationError::transport(STEP, envelope.clone()))?;
    info!(space_id = %space_id, space_name = name, "wiki space created");
    Ok(space_id)
}

/// Original folder token to the wiki node created for it.
#[derive(Debug, Clone, Default)]
pub struct WikiNodeMap {
    nodes: HashMap<String, String>,
}

impl WikiNodeMap {
    pub fn get(&self, folder_token: &str) -> Option<&str> {
        self.nodes.get(folder_token).map(String::as_str)
    }

    pub fn insert(&mut self, folder_token: impl Into<String>, node_token: impl Into<String>) {
        self.nodes.insert(folder_token.into(), node_token.into());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Creates one wiki node per planned folder, parents before children.
///
/// Entries become ready once their parent is the subtree root or already has
/// a node; each wave is created in plan order. Everything that can be
/// created is, and whatever is left afterwards (a parent cycle or a parent
/// missing from the plan) fails the run with [`MigrationError::Plan`].
pub async fn create_wiki_nodes<A: DriveApi>(
    api: &A,
    ctx: &RunContext,
    space_id: &str,
    folders: &FolderPlan,
    root_token: &str,
) -> Result<WikiNodeMap, MigrationError> {
    let entries: Vec<_> = folders.iter().collect();
    let total = entries.len();
    let mut waiting: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut wave = Vec::new();
    for (pos, entry) in entries.iter().enumerate() {
        if entry.parent_token.is_empty() || entry.parent_token == root_token {
            wave.push(pos);
        } else {
            waiting.entry(entry.parent_token.as_str()).or_default().push(pos);
        }
    }

    let mut map = WikiNodeMap::default();
    ctx.nodes_progress(0, total);
    while !wave.is_empty() {
        let mut next = Vec::new();
        for pos in wave {
            ctx.checkpoint()?;
            let entry = entries[pos];
            let parent_node = map.get(&entry.parent_token).map(str::to_string);
            let step = format!("create wiki node {}", entry.name);
            let envelope = ensure_ok(
                &step,
                api.create_wiki_node(space_id, &entry.name, parent_node.as_deref())
                    .await,
            )?;
            let node_token = first_string(
                envelope.data(),
                &[
                    &["node", "node_token"],
                    &["node_token"],
                    &["wiki_node", "node_token"],
                    &["wiki_node", "token"],
                ],
            )
            .ok_or_else(|| MigrationError::transport(&step, envelope.clone()))?;
            debug!(folder = %entry.token, node = %node_token, "wiki node created");
            map.insert(entry.token.clone(), node_token);
            ctx.nodes_progress(map.len(), total);
            if let Some(children) = waiting.remove(entry.token.as_str()) {
                next.extend(children);
            }
        }
        next.sort_unstable();
        wave = next;
    }

    if map.len() < total {
        let pending = entries
            .iter()
            .filter(|entry| map.get(&entry.token).is_none())
            .map(|entry| entry.token.clone())
            .collect();
        return Err(MigrationError::Plan { pending });
    }
    info!(created = map.len(), "wiki nodes created");
    Ok(map)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveReport {
    pub moved: Vec<CopiedItem>,
    pub skipped: Vec<CopiedItem>,
    pub task_ids: Vec<String>,
}

/// Moves verified copies into the space in index order, pausing for the
/// configured cooldown before every call that starts a new batch.
pub async fn move_documents<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    space_id: &str,
    items: &[CopiedItem],
    root_token: &str,
    nodes: &WikiNodeMap,
) -> Result<MoveReport, MigrationError> {
    let batch = config.move_batch_size.max(1);
    let mut report = MoveReport::default();
    let mut targets = Vec::with_capacity(items.len());
    for item in items {
        let obj_type = normalize_wiki_type(&item.kind);
        if config.is_supported(&obj_type) {
            targets.push((item, obj_type));
        } else {
            warn!(token = %item.token, kind = %item.kind, "not moving unsupported document");
            report.skipped.push(item.clone());
        }
    }
    let total = targets.len();
    let mut requests = 0usize;
    ctx.moves_progress(0, total);

    for (item, obj_type) in targets {
        ctx.checkpoint()?;
        let parent = if item.parent_token.is_empty() || item.parent_token == root_token {
            None
        } else {
            Some(nodes.get(&item.parent_token).ok_or_else(|| MigrationError::Plan {
                pending: vec![item.parent_token.clone()],
            })?)
        };

        if requests > 0 && requests % batch == 0 {
            ctx.cooldown(config.cooldown, config.cooldown_tick).await?;
            ctx.checkpoint()?;
        }
        let step = format!("move {}", item.name);
        let envelope = ensure_ok(
            &step,
            api.move_docs_to_wiki(space_id, &obj_type, &item.token, parent)
                .await,
        )?;
        requests += 1;
        if let Some(task_id) = first_string(envelope.data(), &[&["task_id"]]) {
            report.task_ids.push(task_id);
        }
        report.moved.push(item.clone());
        ctx.moves_progress(report.moved.len(), total);
    }

    info!(
        moved = report.moved.len(),
        skipped = report.skipped.len(),
        tasks = report.task_ids.len(),
        "documents moved"
    );
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WikiTaskSummary {
    pub task_id: String,
    pub ok: bool,
    pub status: Option<String>,
    pub success: Option<u64>,
    pub failed: Option<u64>,
    pub fail_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WikiTaskSummary {
    pub fn is_failure(&self) -> bool {
        !self.ok
            || self.failed.is_some_and(|failed| failed > 0)
            || matches!(self.status.as_deref(), Some("failed" | "fail" | "failure"))
    }
}

/// Polls every move task. Failures are recorded on the summary; only
/// cancellation stops the sweep.
pub async fn check_wiki_tasks<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    task_ids: &[String],
) -> Result<Vec<WikiTaskSummary>, MigrationError> {
    let backoff = PollBackoff::from_config(config);
    let attempts = config.task_poll_attempts.max(1);
    let mut summaries = Vec::with_capacity(task_ids.len());

    for task_id in task_ids {
        let mut summary = WikiTaskSummary {
            task_id: task_id.clone(),
            ..WikiTaskSummary::default()
        };
        for attempt in 0..attempts {
            if attempt > 0 {
                ctx.pause(backoff.delay(attempt - 1)).await?;
            }
            ctx.checkpoint()?;
            let running = match api.get_wiki_task(task_id).await {
                Err(err) => {
                    summary.ok = false;
                    summary.error = Some(err.to_string());
                    false
                }
                Ok(envelope) if !envelope.ok => {
                    summary.ok = false;
                    summary.error = Some(format!(
                        "status {}: {}",
                        envelope.response.status,
                        envelope.message().unwrap_or("request rejected")
                    ));
                    false
                }
                Ok(envelope) => {
                    let (parsed, running) = parse_task_summary(envelope.data());
                    summary = WikiTaskSummary {
                        task_id: task_id.clone(),
                        ok: true,
                        error: None,
                        ..parsed
                    };
                    running
                }
            };
            if !running {
                break;
            }
        }

        if summary.is_failure() {
            warn!(
                task = %task_id,
                status = summary.status.as_deref().unwrap_or("unknown"),
                reason = summary
                    .fail_reason
                    .as_deref()
                    .or(summary.error.as_deref())
                    .unwrap_or(""),
                "wiki move task failed"
            );
        } else {
            debug!(task = %task_id, status = ?summary.status, "wiki move task checked");
        }
        summaries.push(summary);
    }
    Ok(summaries)
}

/// Reads a task payload in either the per-document `move_result` shape or
/// the flat counter shape. The flag is true while the task is still running.
fn parse_task_summary(data: &Value) -> (WikiTaskSummary, bool) {
    if let Some(results) = data
        .pointer("/task/move_result")
        .and_then(Value::as_array)
    {
        let status_of = |result: &Value| result.get("status").and_then(Value::as_i64);
        let success = results.iter().filter(|r| status_of(r) == Some(0)).count() as u64;
        let running = results.iter().any(|r| status_of(r) == Some(1));
        let failures: Vec<&Value> = results
            .iter()
            .filter(|r| !matches!(status_of(r), Some(0 | 1)))
            .collect();
        let reasons: Vec<String> = failures
            .iter()
            .filter_map(|r| first_string(r, &[&["status_msg"], &["fail_reason"]]))
            .collect();
        let status = if running {
            "processing"
        } else if failures.is_empty() {
            "success"
        } else {
            "failed"
        };
        let summary = WikiTaskSummary {
            status: Some(status.to_string()),
            success: Some(success),
            failed: Some(failures.len() as u64),
            fail_reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
            ..WikiTaskSummary::default()
        };
        return (summary, running);
    }

    let result = data.get("result").unwrap_or(data);
    let number = |keys: [&str; 2]| keys.iter().find_map(|key| result.get(*key)?.as_u64());
    let status = first_string(result, &[&["status"], &["state"]]);
    let running = matches!(
        status.as_deref().map(str::to_lowercase).as_deref(),
        Some("processing" | "running" | "pending" | "1")
    );
    let summary = WikiTaskSummary {
        status,
        success: number(["success_num", "success_count"]),
        failed: number(["fail_num", "fail_count"]),
        fail_reason: first_string(result, &[&["fail_reason"], &["fail_reasons"], &["fail_msg"]]),
        ..WikiTaskSummary::default()
    };
    (summary, running)
}
