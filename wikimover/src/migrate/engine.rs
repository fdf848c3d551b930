use feishu_core::FolderMeta;
use serde::Serialize;
use tracing::{error, info, warn};

use super::copy::{
    CopyTaskOutcome, CopyTaskStatus, StagingFolder, check_copy_tasks, copy_files,
    create_staging_folder, verify_copies,
};
use super::discovery::{build_selection_plan, load_children};
use super::error::{MigrationError, ensure_ok};
use super::plan::CopyPlan;
use super::progress::{RunContext, RunState, StepId};
use super::tree::{NodeId, Tree};
use super::wiki::{
    WikiTaskSummary, check_wiki_tasks, create_wiki_nodes, create_wiki_space, move_documents,
};
use crate::api::DriveApi;
use crate::config::MigrationConfig;

const DEFAULT_DRIVE_ROOT_NAME: &str = "My Space";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderRef {
    pub token: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionCounts {
    pub folders: usize,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupNotice {
    pub reminder: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopySummary {
    pub requested: usize,
    pub skipped: usize,
    pub errors: usize,
    pub listed: usize,
    pub tasks_checked: usize,
    pub tasks: Vec<CopyTaskOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiSummary {
    pub space_id: String,
    pub nodes_created: usize,
    pub moved: usize,
    pub failed: usize,
    pub skipped: usize,
    pub task_ids: Vec<String>,
    pub task_summaries: Vec<WikiTaskSummary>,
}

/// Outcome of a completed run. The staging folder is left in place and has
/// to be removed by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub root: FolderRef,
    pub my_drive_root: FolderRef,
    pub selection: SelectionCounts,
    pub migrate_folder: StagingFolder,
    pub cleanup: CleanupNotice,
    pub copy: CopySummary,
    pub wiki: WikiSummary,
}

pub struct Migrator<A> {
    api: A,
    config: MigrationConfig,
}

impl<A: DriveApi> Migrator<A> {
    pub fn new(api: A, config: MigrationConfig) -> Self {
        Self { api, config }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Lists a folder node and attaches what was found to the tree.
    pub async fn expand(
        &self,
        tree: &mut Tree,
        id: NodeId,
        ctx: &RunContext,
    ) -> Result<Vec<NodeId>, MigrationError> {
        load_children(&self.api, &self.config, ctx, tree, id).await
    }

    /// Runs the whole pipeline once and leaves `ctx` in its terminal state.
    pub async fn run(
        &self,
        tree: &Tree,
        ctx: &RunContext,
    ) -> Result<MigrationReport, MigrationError> {
        let outcome = self.execute(tree, ctx).await;
        ctx.finish(&outcome);
        match &outcome {
            Ok(report) => info!(
                space_id = %report.wiki.space_id,
                moved = report.wiki.moved,
                failed = report.wiki.failed,
                "migration finished"
            ),
            Err(MigrationError::Cancelled) => {
                warn!("migration cancelled; remote resources created so far are left in place")
            }
            Err(err) => error!(error = %err, "migration failed"),
        }
        outcome
    }

    async fn execute(
        &self,
        tree: &Tree,
        ctx: &RunContext,
    ) -> Result<MigrationReport, MigrationError> {
        let api = &self.api;
        let config = &self.config;

        ctx.set_state(RunState::Selecting);
        ctx.start_step(StepId::Select);
        let selection = build_selection_plan(api, config, ctx, tree).await?;
        let mut copy_plan = CopyPlan::partition(&selection.files, config)?;
        ctx.finish_step(StepId::Select);

        ctx.set_state(RunState::ResolvingRoot);
        ctx.start_step(StepId::RootMeta);
        let root_name = self
            .root_name(ctx, &selection.root_token, &selection.root_name)
            .await?;
        let drive_root = self.drive_root(ctx).await?;
        ctx.finish_step(StepId::RootMeta);

        ctx.start_step(StepId::CreateMigrateFolder);
        let staging = create_staging_folder(api, config, ctx, &root_name, &drive_root.token).await?;
        ctx.set_state(RunState::StagingCreated);
        ctx.finish_step(StepId::CreateMigrateFolder);

        ctx.set_state(RunState::Copying);
        ctx.start_step(StepId::CopyFiles);
        copy_files(api, ctx, &mut copy_plan, &staging.token).await?;
        ctx.finish_step(StepId::CopyFiles);

        ctx.set_state(RunState::Verifying);
        ctx.start_step(StepId::CopyCheck);
        let copy_tasks = check_copy_tasks(api, config, ctx, &mut copy_plan).await?;
        let verification = verify_copies(
            api,
            config,
            ctx,
            &copy_plan,
            &staging.token,
            &selection.root_token,
        )
        .await?;
        ctx.finish_step(StepId::CopyCheck);

        ctx.start_step(StepId::CreateSpace);
        let space_id = create_wiki_space(api, ctx, &root_name).await?;
        ctx.set_state(RunState::SpaceCreated);
        ctx.finish_step(StepId::CreateSpace);

        ctx.start_step(StepId::CreateNodes);
        let nodes = create_wiki_nodes(
            api,
            ctx,
            &space_id,
            &selection.folders,
            &selection.root_token,
        )
        .await?;
        ctx.set_state(RunState::NodesCreated);
        ctx.finish_step(StepId::CreateNodes);

        ctx.set_state(RunState::Moving);
        ctx.start_step(StepId::MoveDocs);
        let moves = move_documents(
            api,
            config,
            ctx,
            &space_id,
            &verification.copied_items,
            &selection.root_token,
            &nodes,
        )
        .await?;
        ctx.finish_step(StepId::MoveDocs);

        ctx.set_state(RunState::PollingTasks);
        ctx.start_step(StepId::WikiTask);
        let task_summaries = check_wiki_tasks(api, config, ctx, &moves.task_ids).await?;
        ctx.finish_step(StepId::WikiTask);

        let failed = task_summaries
            .iter()
            .filter(|summary| summary.is_failure())
            .count();
        let copy_errors = copy_tasks
            .iter()
            .filter(|task| task.status == CopyTaskStatus::Failed)
            .count();

        Ok(MigrationReport {
            root: FolderRef {
                token: selection.root_token.clone(),
                name: root_name,
            },
            my_drive_root: drive_root,
            selection: SelectionCounts {
                folders: selection.folders.len(),
                files: selection.files.len(),
            },
            cleanup: CleanupNotice {
                reminder: format!("delete the staging folder {} manually", staging.name),
            },
            migrate_folder: staging,
            copy: CopySummary {
                requested: copy_plan.requested(),
                skipped: copy_plan.skipped.len(),
                errors: copy_errors,
                listed: verification.listed,
                tasks_checked: copy_tasks.len(),
                tasks: copy_tasks,
            },
            wiki: WikiSummary {
                space_id,
                nodes_created: nodes.len(),
                moved: moves.moved.len(),
                failed,
                skipped: moves.skipped.len(),
                task_ids: moves.task_ids,
                task_summaries,
            },
        })
    }

    /// Display name of the subtree root, falling back to the name the tree
    /// already knows when the metadata lookup comes back empty.
    async fn root_name(
        &self,
        ctx: &RunContext,
        root_token: &str,
        fallback: &str,
    ) -> Result<String, MigrationError> {
        ctx.checkpoint()?;
        let remote = match self.api.folder_meta(root_token).await {
            Ok(envelope) if envelope.ok => envelope
                .data_as::<FolderMeta>()
                .ok()
                .and_then(|meta| meta.name)
                .filter(|name| !name.trim().is_empty()),
            Ok(envelope) => {
                warn!(status = envelope.response.status, "folder metadata lookup rejected");
                None
            }
            Err(err) => {
                warn!(error = %err, "folder metadata lookup failed");
                None
            }
        };
        match remote.or_else(|| (!fallback.is_empty()).then(|| fallback.to_string())) {
            Some(name) => Ok(name),
            None => Err(MigrationError::validation(format!(
                "cannot determine a name for folder {root_token}"
            ))),
        }
    }

    async fn drive_root(&self, ctx: &RunContext) -> Result<FolderRef, MigrationError> {
        const STEP: &str = "resolve drive root";
        ctx.checkpoint()?;
        let envelope = ensure_ok(STEP, self.api.root_folder_meta().await)?;
        let meta: FolderMeta = envelope
            .data_as()
            .map_err(|source| MigrationError::request(STEP, source))?;
        let Some(token) = meta.token.filter(|token| !token.is_empty()) else {
            return Err(MigrationError::transport(STEP, envelope));
        };
        Ok(FolderRef {
            token,
            name: meta
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_DRIVE_ROOT_NAME.to_string()),
        })
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
