use std::collections::HashSet;

use feishu_core::{DriveFile, FileList};
use tracing::{debug, info, warn};

use super::error::{MigrationError, ensure_ok};
use super::plan::{FilePlan, FolderPlan, FolderPlanEntry, SelectionPlan};
use super::progress::RunContext;
use super::tree::{NodeId, Tree};
use crate::api::DriveApi;
use crate::config::MigrationConfig;

/// Marker appended to shortcut names so they can be told apart from the
/// document they point at.
pub const SHORTCUT_SUFFIX: &str = " (shortcut)";

/// A listed drive item with shortcuts resolved to their target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedItem {
    pub token: String,
    pub name: String,
    pub kind: String,
    pub is_folder: bool,
    pub is_shortcut: bool,
}

/// Resolves type and token of a listed item. Returns `None` when no usable
/// token exists; a shortcut without a target token counts as unresolvable.
pub fn normalize_item(item: &DriveFile) -> Option<NormalizedItem> {
    let declared = item.declared_type().unwrap_or("file").to_lowercase();
    let info = item.shortcut_info.as_ref();
    let target_type = match declared.strip_prefix("shortcut:") {
        Some(target) => Some(target.to_string()),
        None if declared == "shortcut" => info
            .and_then(|info| info.target_type.as_deref())
            .filter(|target| !target.is_empty())
            .map(str::to_lowercase),
        None => None,
    };

    let (token, kind, is_shortcut) = match target_type {
        Some(target_type) => {
            let token = info
                .and_then(|info| info.target_token.as_deref())
                .filter(|token| !token.is_empty())?;
            (token.to_string(), target_type, true)
        }
        None => (item.raw_token()?.to_string(), declared, false),
    };

    let base = item.display_name().unwrap_or(&token).to_string();
    let name = if is_shortcut && item.display_name().is_some() {
        format!("{base}{SHORTCUT_SUFFIX}")
    } else {
        base
    };

    Some(NormalizedItem {
        is_folder: kind == "folder",
        token,
        name,
        kind,
        is_shortcut,
    })
}

/// Lists every item of a folder, following continuation tokens until the
/// listing is exhausted or `max_pages` pages have been read.
pub async fn fetch_folder_items<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    folder_token: &str,
    step: &str,
) -> Result<Vec<DriveFile>, MigrationError> {
    let mut items = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0u32;

    loop {
        ctx.checkpoint()?;
        pages += 1;
        let envelope = ensure_ok(
            step,
            api.list_folder(folder_token, config.page_size, page_token.as_deref())
                .await,
        )?;
        let page: FileList = envelope
            .data_as()
            .map_err(|source| MigrationError::request(step, source))?;
        debug!(folder = folder_token, page = pages, items = page.files.len(), "listed folder page");
        items.extend(page.files);

        match page.page_token.filter(|token| !token.is_empty()) {
            Some(next) if page.has_more => page_token = Some(next),
            _ => break,
        }
        if pages >= config.max_pages {
            warn!(
                folder = folder_token,
                pages, "pagination stopped after too many pages; listing is truncated"
            );
            break;
        }
    }

    Ok(items)
}

/// Lazily expands one tree node with its listed children.
pub async fn load_children<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    tree: &mut Tree,
    id: NodeId,
) -> Result<Vec<NodeId>, MigrationError> {
    if !tree.node(id).is_folder {
        return Ok(Vec::new());
    }
    let token = tree.node(id).token.clone();
    let items = fetch_folder_items(api, config, ctx, &token, "list folder").await?;
    let normalized = items
        .iter()
        .filter_map(|item| {
            let normalized = normalize_item(item);
            if normalized.is_none() {
                warn!(folder = %token, "skipping listed item without a usable token");
            }
            normalized
        })
        .collect();
    Ok(tree.attach_children(id, normalized))
}

/// Resolves the selection and walks every selected folder, producing the
/// folder and file plans.
pub async fn build_selection_plan<A: DriveApi>(
    api: &A,
    config: &MigrationConfig,
    ctx: &RunContext,
    tree: &Tree,
) -> Result<SelectionPlan, MigrationError> {
    let selection = tree.resolve()?;
    ctx.checkpoint()?;
    let root = tree.node(selection.root);
    let mut walker = Walker {
        api,
        config,
        ctx,
        root_token: root.token.clone(),
        folders: FolderPlan::default(),
        files: FilePlan::default(),
        visited: HashSet::new(),
    };

    for id in selection.roots {
        let node = tree.node(id);
        let parent_token = node
            .parent
            .map(|parent| tree.node(parent).token.clone())
            .unwrap_or_else(|| walker.root_token.clone());
        walker.record_ancestors(tree, node.parent);
        if node.is_folder {
            walker.traverse(&node.token, &node.name, &parent_token).await?;
        } else {
            walker
                .files
                .push(&node.token, &node.name, &node.kind, parent_token);
        }
    }

    info!(
        root = %root.token,
        folders = walker.folders.len(),
        files = walker.files.len(),
        "selection discovered"
    );
    Ok(SelectionPlan {
        root_token: walker.root_token,
        root_name: root.name.clone(),
        folders: walker.folders,
        files: walker.files,
    })
}

struct Frame {
    token: String,
    items: std::vec::IntoIter<DriveFile>,
}

struct Walker<'a, A> {
    api: &'a A,
    config: &'a MigrationConfig,
    ctx: &'a RunContext,
    root_token: String,
    folders: FolderPlan,
    files: FilePlan,
    visited: HashSet<String>,
}

impl<A: DriveApi> Walker<'_, A> {
    /// Records the chain of folders from `start` up to, but excluding, the
    /// subtree root.
    fn record_ancestors(&mut self, tree: &Tree, start: Option<NodeId>) {
        let mut current = start;
        while let Some(id) = current {
            let node = tree.node(id);
            if node.token == self.root_token {
                break;
            }
            let parent_token = node
                .parent
                .map(|parent| tree.node(parent).token.clone())
                .unwrap_or_else(|| self.root_token.clone());
            self.folders.insert(FolderPlanEntry {
                token: node.token.clone(),
                name: node.name.clone(),
                parent_token,
            });
            current = node.parent;
        }
    }

    /// Depth-first walk over an explicit stack. Files get their index in
    /// the order they are met, exactly as a recursive walk would assign it.
    async fn traverse(
        &mut self,
        token: &str,
        name: &str,
        parent_token: &str,
    ) -> Result<(), MigrationError> {
        let mut stack = Vec::new();
        if let Some(frame) = self.enter(token, name, parent_token).await? {
            stack.push(frame);
        }

        while let Some(frame) = stack.last_mut() {
            let Some(raw) = frame.items.next() else {
                stack.pop();
                continue;
            };
            let folder = frame.token.clone();
            self.ctx.checkpoint()?;
            let Some(item) = normalize_item(&raw) else {
                warn!(folder = %folder, "skipping listed item without a usable token");
                continue;
            };
            if item.is_folder {
                if let Some(child) = self.enter(&item.token, &item.name, &folder).await? {
                    stack.push(child);
                }
            } else if self
                .files
                .push(&item.token, &item.name, &item.kind, &folder)
                .is_none()
            {
                debug!(token = %item.token, "file already planned, keeping first occurrence");
            }
        }
        Ok(())
    }

    async fn enter(
        &mut self,
        token: &str,
        name: &str,
        parent_token: &str,
    ) -> Result<Option<Frame>, MigrationError> {
        self.ctx.checkpoint()?;
        if !self.visited.insert(token.to_string()) {
            debug!(folder = token, "folder already visited");
            return Ok(None);
        }
        if token != self.root_token {
            self.folders.insert(FolderPlanEntry {
                token: token.to_string(),
                name: if name.is_empty() { token } else { name }.to_string(),
                parent_token: parent_token.to_string(),
            });
        }
        let items = fetch_folder_items(
            self.api,
            self.config,
            self.ctx,
            token,
            &format!("list folder {token}"),
        )
        .await?;
        Ok(Some(Frame {
            token: token.to_string(),
            items: items.into_iter(),
        }))
    }
}
