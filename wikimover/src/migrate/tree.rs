//! Drive tree state and selection resolution.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. Parents own
//! their children; a node's root is reached by walking `parent` links.

use serde::Serialize;

use super::discovery::NormalizedItem;
use super::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct Node {
    pub token: String,
    pub name: String,
    pub kind: String,
    pub is_folder: bool,
    pub is_shortcut: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub selected: bool,
    pub indeterminate: bool,
    pub loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionSummary {
    pub root_label: Option<String>,
    pub folders: usize,
    pub files: usize,
}

/// Selected nodes with no selected ancestor, all under `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelection {
    pub root: NodeId,
    pub roots: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    selected_root: Option<NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(
        &mut self,
        token: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<NodeId, MigrationError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(MigrationError::validation("folder token is empty"));
        }
        if self.roots.iter().any(|id| self.node(*id).token == token) {
            return Err(MigrationError::validation(format!(
                "folder {token} is already in the tree"
            )));
        }
        let name = name.into();
        let id = self.push(Node {
            name: if name.is_empty() { token.clone() } else { name },
            token,
            kind: "folder".to_string(),
            is_folder: true,
            is_shortcut: false,
            parent: None,
            children: Vec::new(),
            selected: false,
            indeterminate: false,
            loaded: false,
        });
        self.roots.push(id);
        Ok(id)
    }

    /// Replaces the children of `parent` with freshly listed items.
    pub fn attach_children(&mut self, parent: NodeId, items: Vec<NormalizedItem>) -> Vec<NodeId> {
        let inherit = self.nodes[parent.0].selected;
        self.nodes[parent.0].children.clear();
        let mut attached = Vec::with_capacity(items.len());
        for item in items {
            let id = self.push(Node {
                token: item.token,
                name: item.name,
                kind: item.kind,
                is_folder: item.is_folder,
                is_shortcut: item.is_shortcut,
                parent: Some(parent),
                children: Vec::new(),
                selected: false,
                indeterminate: false,
                loaded: false,
            });
            self.nodes[parent.0].children.push(id);
            if inherit {
                self.propagate(id, true);
            }
            attached.push(id);
        }
        self.nodes[parent.0].loaded = true;
        self.update_parent_selection(Some(parent));
        self.refresh_selected_root();
        attached
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn find(&self, token: &str) -> Option<NodeId> {
        self.walk().into_iter().find(|id| self.node(*id).token == token)
    }

    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            current = parent;
        }
        current
    }

    pub fn selected_root(&self) -> Option<NodeId> {
        self.selected_root
    }

    /// Checkbox entry point: refuses to start a selection under a second root.
    pub fn toggle(&mut self, id: NodeId, checked: bool) -> Result<(), MigrationError> {
        let root = self.root_of(id);
        if checked {
            if let Some(current) = self.selected_root.filter(|current| *current != root) {
                return Err(MigrationError::validation(format!(
                    "selection is limited to one root: {} is selected, {} was requested",
                    self.node(current).token,
                    self.node(root).token
                )));
            }
        }
        self.set_selected(id, checked);
        Ok(())
    }

    /// Selects or clears a node and everything under it, then recomputes
    /// ancestor state.
    pub fn set_selected(&mut self, id: NodeId, selected: bool) {
        self.propagate(id, selected);
        self.update_parent_selection(self.nodes[id.0].parent);
        self.refresh_selected_root();
    }

    pub fn clear_selection(&mut self) {
        for node in &mut self.nodes {
            node.selected = false;
            node.indeterminate = false;
        }
        self.selected_root = None;
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.selected_root = None;
    }

    pub fn selection_roots(&self) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.selected {
                found.push(id);
                continue;
            }
            stack.extend(node.children.iter().rev().copied());
        }
        found
    }

    pub fn resolve(&self) -> Result<ResolvedSelection, MigrationError> {
        let roots = self.selection_roots();
        let Some(first) = roots.first() else {
            return Err(MigrationError::validation(
                "select at least one file or folder",
            ));
        };
        let root = self.root_of(*first);
        if let Some(stray) = roots.iter().find(|id| self.root_of(**id) != root) {
            return Err(MigrationError::validation(format!(
                "selection spans more than one root ({} and {})",
                self.node(root).token,
                self.node(self.root_of(*stray)).token
            )));
        }
        Ok(ResolvedSelection { root, roots })
    }

    pub fn summary(&self) -> SelectionSummary {
        let selected: Vec<&Node> = self
            .walk()
            .into_iter()
            .map(|id| self.node(id))
            .filter(|node| node.selected)
            .collect();
        let folders = selected.iter().filter(|node| node.is_folder).count();
        SelectionSummary {
            root_label: self.selected_root.map(|id| self.node(id).name.clone()),
            folders,
            files: selected.len() - folders,
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Reachable nodes in display order. Detached children from an earlier
    /// listing stay in the arena but are never visited.
    fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        order
    }

    fn propagate(&mut self, id: NodeId, selected: bool) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current.0];
            node.selected = selected;
            node.indeterminate = false;
            stack.extend(node.children.iter().copied());
        }
    }

    fn update_parent_selection(&mut self, start: Option<NodeId>) {
        let mut current = start;
        while let Some(id) = current {
            let children = &self.nodes[id.0].children;
            if children.is_empty() {
                return;
            }
            let total = children.len();
            let selected = children
                .iter()
                .filter(|child| self.nodes[child.0].selected)
                .count();
            let indeterminate = children
                .iter()
                .filter(|child| self.nodes[child.0].indeterminate)
                .count();

            let node = &mut self.nodes[id.0];
            if selected == total {
                node.selected = true;
                node.indeterminate = false;
            } else if selected == 0 && indeterminate == 0 {
                node.selected = false;
                node.indeterminate = false;
            } else {
                node.selected = false;
                node.indeterminate = true;
            }
            current = node.parent;
        }
    }

    fn refresh_selected_root(&mut self) {
        self.selected_root = self
            .walk()
            .into_iter()
            .find(|id| self.node(*id).selected)
            .map(|id| self.root_of(id));
    }
}
