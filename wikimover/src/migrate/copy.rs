use std::collections::{HashMap, HashSet};

use feishu_core::{DriveFile, first_string};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backoff::PollBackoff;
use super::discovery::{fetch_folder_items, normalize_item};
use super::error::{MigrationError, ensure_ok};
use super::plan::{CopyPlan, FilePlanEntry, PendingCopyTask, normalize_wiki_type};
use super::progress::RunContext;
use crate::api::DriveApi;
use crate::config::MigrationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingFolder {
    pub name: String,
    pub token: String,
}

/// Creates the folder that receives every copy, directly under the user's
/// own drive root.
pub async fn create_staging_folder<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    root_name: &str,
    drive_root_token: &str,
) -> Result<StagingFolder, MigrationError> {
    const STEP: &str = "create staging folder";
    ctx.checkpoint()?;
    let name = format!("{root_name}{}", config.staging_suffix);
    let envelope = ensure_ok(STEP, api.create_folder(&name, drive_root_token).await)?;
    let token = first_string(
        envelope.data(),
        &[&["folder_token"], &["token"], &["file_token"], &["folder", "token"]],
    )
    .ok_or_else(|| MigrationError::transport(STEP, envelope.clone()))?;
    info!(name = %name, token = %token, "staging folder created");
    Ok(StagingFolder { name, token })
}

/// Issues one copy per supported file. Copies that finish inline land in
/// `copy_map`; the rest become pending tasks.
pub async fn copy_files<A: DriveApi>(
    api: &A,
    ctx: &RunContext,
    plan: &mut CopyPlan,
    staging_token: &str,
) -> Result<(), MigrationError> {
    for file in &plan.supported {
        ctx.checkpoint()?;
        let step = format!("copy {}", file.name);
        let obj_type = normalize_wiki_type(&file.kind);
        let envelope = ensure_ok(
            &step,
            api.copy_file(&file.token, &file.name, &obj_type, staging_token)
                .await,
        )?;
        let data = envelope.data();
        if let Some(copied) = first_string(data, &[&["file", "token"], &["token"], &["file_token"]])
        {
            debug!(original = %file.token, copied = %copied, "copied file");
            plan.copy_map.insert(file.token.clone(), copied);
        } else if let Some(task_id) = first_string(data, &[&["task_id"]]) {
            debug!(original = %file.token, task = %task_id, "copy deferred to task");
            plan.tasks.push(PendingCopyTask {
                task_id,
                original_token: file.token.clone(),
            });
        } else {
            warn!(
                token = %file.token,
                name = %file.name,
                "copy response carried neither a token nor a task id"
            );
        }
    }
    info!(
        inline = plan.copy_map.len(),
        tasks = plan.tasks.len(),
        "copy requests issued"
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyTaskStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyTaskOutcome {
    pub task_id: String,
    pub original_token: String,
    pub status: CopyTaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_status: Option<String>,
}

/// Polls every pending copy task until it settles or the attempt budget is
/// spent. A non-success envelope from the status endpoint fails the run.
pub async fn check_copy_tasks<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    plan: &mut CopyPlan,
) -> Result<Vec<CopyTaskOutcome>, MigrationError> {
    let backoff = PollBackoff::from_config(config);
    let attempts = config.task_poll_attempts.max(1);
    let mut outcomes = Vec::with_capacity(plan.tasks.len());

    for task in &plan.tasks {
        let step = format!("copy task {}", task.task_id);
        let mut outcome = CopyTaskOutcome {
            task_id: task.task_id.clone(),
            original_token: task.original_token.clone(),
            status: CopyTaskStatus::Pending,
            raw_status: None,
        };

        for attempt in 0..attempts {
            if attempt > 0 {
                ctx.pause(backoff.delay(attempt - 1)).await?;
            }
            ctx.checkpoint()?;
            let envelope = ensure_ok(&step, api.check_copy_task(&task.task_id).await)?;
            let data = envelope.data();
            let raw_status = first_string(data, &[&["status"], &["task", "status"]]);
            outcome.status = classify_copy_status(raw_status.as_deref());
            outcome.raw_status = raw_status;
            if outcome.status == CopyTaskStatus::Success {
                if let Some(copied) = first_string(data, &[&["file_token"], &["token"]]) {
                    plan.copy_map.insert(task.original_token.clone(), copied);
                }
            }
            if outcome.status != CopyTaskStatus::Pending {
                break;
            }
        }

        match outcome.status {
            CopyTaskStatus::Success => debug!(task = %task.task_id, "copy task finished"),
            CopyTaskStatus::Failed => warn!(task = %task.task_id, "copy task failed"),
            CopyTaskStatus::Pending => {
                warn!(task = %task.task_id, attempts, "copy task still running after polling")
            }
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn classify_copy_status(status: Option<&str>) -> CopyTaskStatus {
    match status.map(str::to_lowercase).as_deref() {
        Some("success" | "succeeded" | "done" | "0") => CopyTaskStatus::Success,
        Some("fail" | "failed" | "failure") => CopyTaskStatus::Failed,
        _ => CopyTaskStatus::Pending,
    }
}

/// A document found in the staging folder, tied back to its original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopiedItem {
    pub token: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub parent_token: String,
    pub original_token: Option<String>,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub listed: usize,
    pub copied_items: Vec<CopiedItem>,
}

/// Re-lists the staging folder and matches what is there against the plan.
/// Fails with an integrity error when fewer documents turn up than were
/// requested.
pub async fn verify_copies<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    plan: &CopyPlan,
    staging_token: &str,
    root_token: &str,
) -> Result<Verification, MigrationError> {
    let items = fetch_folder_items(api, config, ctx, staging_token, "verify copies").await?;
    let files: Vec<DriveFile> = items
        .into_iter()
        .filter(|item| {
            normalize_item(item).is_none_or(|normalized| !normalized.is_folder)
        })
        .collect();
    let listed = files.len();
    let copied_items = reconcile(&files, &plan.supported, &plan.copy_map, root_token);

    if copied_items.len() < plan.supported.len() {
        return Err(MigrationError::Integrity {
            expected: plan.supported.len(),
            actual: copied_items.len(),
        });
    }
    info!(listed, verified = copied_items.len(), "copies verified");
    Ok(Verification {
        listed,
        copied_items,
    })
}

/// Ties listed copies to their originals. The copy-token map is consulted
/// for every item before any name and type fallback, so a fallback can
/// never claim an original that a token lookup would have matched.
pub fn reconcile(
    listed: &[DriveFile],
    originals: &[FilePlanEntry],
    copy_map: &HashMap<String, String>,
    root_token: &str,
) -> Vec<CopiedItem> {
    let copied_to_original: HashMap<&str, &str> = copy_map
        .iter()
        .map(|(original, copied)| (copied.as_str(), original.as_str()))
        .collect();
    let by_token: HashMap<&str, &FilePlanEntry> = originals
        .iter()
        .map(|entry| (entry.token.as_str(), entry))
        .collect();

    let normalized: Vec<_> = listed.iter().filter_map(normalize_item).collect();
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut matches: Vec<Option<&FilePlanEntry>> = normalized
        .iter()
        .map(|item| {
            let original = copied_to_original
                .get(item.token.as_str())
                .and_then(|token| by_token.get(token).copied())?;
            claimed.insert(original.token.as_str()).then_some(original)
        })
        .collect();

    let mut remaining: Vec<&FilePlanEntry> = originals
        .iter()
        .filter(|entry| !claimed.contains(entry.token.as_str()))
        .collect();
    for (item, slot) in normalized.iter().zip(matches.iter_mut()) {
        if slot.is_some() {
            continue;
        }
        let kind = normalize_wiki_type(&item.kind);
        if let Some(pos) = remaining.iter().position(|original| {
            original.name == item.name && normalize_wiki_type(&original.kind) == kind
        }) {
            *slot = Some(remaining.remove(pos));
        }
    }

    let mut copied: Vec<CopiedItem> = normalized
        .into_iter()
        .zip(matches)
        .map(|(item, original)| {
            if original.is_none() {
                warn!(token = %item.token, name = %item.name, "staged copy has no matching original");
            }
            CopiedItem {
                original_token: original
                    .map(|entry| entry.token.clone())
                    .or_else(|| copied_to_original.get(item.token.as_str()).map(|t| t.to_string())),
                parent_token: original
                    .map_or_else(|| root_token.to_string(), |entry| entry.parent_token.clone()),
                index: original.map_or(usize::MAX, |entry| entry.index),
                token: item.token,
                name: item.name,
                kind: item.kind,
            }
        })
        .collect();
    copied.sort_by_key(|item| item.index);
    copied
}
