use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use super::error::MigrationError;
use crate::config::MigrationConfig;

/// A folder that needs a wiki container. `parent_token` is either the
/// subtree root or another entry of the same plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderPlanEntry {
    pub token: String,
    pub name: String,
    pub parent_token: String,
}

/// Insertion-ordered folder map keyed by token.
#[derive(Debug, Clone, Default)]
pub struct FolderPlan {
    entries: Vec<FolderPlanEntry>,
    positions: HashMap<String, usize>,
}

impl FolderPlan {
    /// Records a folder unless it is already known; the first placement wins.
    pub fn insert(&mut self, entry: FolderPlanEntry) -> bool {
        if self.positions.contains_key(&entry.token) {
            return false;
        }
        self.positions.insert(entry.token.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn get(&self, token: &str) -> Option<&FolderPlanEntry> {
        self.positions.get(token).map(|pos| &self.entries[*pos])
    }

    pub fn contains(&self, token: &str) -> bool {
        self.positions.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FolderPlanEntry> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePlanEntry {
    pub token: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub parent_token: String,
    pub index: usize,
}

/// Files in discovery order. `index` equals the position in this plan.
#[derive(Debug, Clone, Default)]
pub struct FilePlan {
    entries: Vec<FilePlanEntry>,
    positions: HashMap<String, usize>,
}

impl FilePlan {
    /// Appends a file and assigns the next index. A token seen before is
    /// ignored so indices stay contiguous.
    pub fn push(
        &mut self,
        token: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        parent_token: impl Into<String>,
    ) -> Option<usize> {
        let token = token.into();
        if self.positions.contains_key(&token) {
            return None;
        }
        let index = self.entries.len();
        self.positions.insert(token.clone(), index);
        self.entries.push(FilePlanEntry {
            token,
            name: name.into(),
            kind: kind.into(),
            parent_token: parent_token.into(),
            index,
        });
        Some(index)
    }

    pub fn get(&self, token: &str) -> Option<&FilePlanEntry> {
        self.positions.get(token).map(|pos| &self.entries[*pos])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilePlanEntry> {
        self.entries.iter()
    }
}

/// Everything discovery learned about the selected subtree.
#[derive(Debug, Clone)]
pub struct SelectionPlan {
    pub root_token: String,
    pub root_name: String,
    pub folders: FolderPlan,
    pub files: FilePlan,
}

/// Maps a drive type tag to the object type the wiki expects.
pub fn normalize_wiki_type(kind: &str) -> String {
    let lowered = kind.trim().to_lowercase();
    match lowered.strip_prefix("shortcut:") {
        Some(target) => target.to_string(),
        None => lowered,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCopyTask {
    pub task_id: String,
    pub original_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    pub supported: Vec<FilePlanEntry>,
    pub skipped: Vec<FilePlanEntry>,
    /// Original token to copied token, for copies that completed inline.
    pub copy_map: HashMap<String, String>,
    pub tasks: Vec<PendingCopyTask>,
}

impl CopyPlan {
    pub fn partition(files: &FilePlan, config: &MigrationConfig) -> Result<Self, MigrationError> {
        let (supported, skipped): (Vec<_>, Vec<_>) = files
            .iter()
            .cloned()
            .partition(|file| config.is_supported(&normalize_wiki_type(&file.kind)));

        for file in &skipped {
            warn!(
                token = %file.token,
                name = %file.name,
                kind = %file.kind,
                "skipping file: type cannot be imported into a wiki space"
            );
        }
        if supported.is_empty() {
            return Err(MigrationError::validation(
                "the selection contains no files that can be migrated",
            ));
        }
        info!(
            supported = supported.len(),
            skipped = skipped.len(),
            "copy plan ready"
        );

        Ok(Self {
            supported,
            skipped,
            copy_map: HashMap::new(),
            tasks: Vec::new(),
        })
    }

    pub fn requested(&self) -> usize {
        self.supported.len()
    }
}
