//! Forest / Graph Manager (C4) — registry of all nodes and trees,
//! creation, lookup, active-node selection.
//!
//! A single `DashMap` is the sole strong-ownership point for every live
//! `Node`, so lookups never block on a tree-wide lock and concurrent
//! branches can be created independently.

use std::sync::{Arc, Mutex};

use ctxtree_core::{NodeId, TreeId};
use dashmap::DashMap;

use crate::error::{Result, TreeError};
use crate::node::{FollowUp, Node};

pub struct Forest {
    nodes: DashMap<NodeId, Arc<Node>>,
    /// tree_id -> root node_id
    trees: DashMap<TreeId, NodeId>,
    active_node_id: Mutex<Option<NodeId>>,
    default_max_turns: usize,
}

impl Forest {
    pub fn new(default_max_turns: usize) -> Self {
        Self {
            nodes: DashMap::new(),
            trees: DashMap::new(),
            active_node_id: Mutex::new(None),
            default_max_turns,
        }
    }

    /// Create a new tree with a single root node.
    pub fn create_root(&self, title: String) -> Arc<Node> {
        let tree_id = TreeId::new();
        let node = Arc::new(Node::new(
            NodeId::new(),
            tree_id.clone(),
            title,
            None,
            None,
            self.default_max_turns,
        ));
        self.nodes.insert(node.id.clone(), node.clone());
        self.trees.insert(tree_id, node.id.clone());
        node
    }

    /// Create a child of `parent_id`. Fails if the parent is absent —
    /// invariant 4 forbids a node whose parent does not (yet) exist.
    /// The child inherits its parent's `tree_id` — a tree is the set of
    /// nodes reachable from one root, so a child can never belong to a
    /// different tree than its parent.
    pub fn create_child(
        &self,
        parent_id: &NodeId,
        title: String,
        follow_up: Option<FollowUp>,
    ) -> Result<Arc<Node>> {
        let parent = self
            .nodes
            .get(parent_id)
            .ok_or_else(|| TreeError::ParentNotFound {
                id: parent_id.to_string(),
            })?;

        let child = Arc::new(Node::new(
            NodeId::new(),
            parent.tree_id.clone(),
            title,
            Some(parent_id.clone()),
            follow_up,
            self.default_max_turns,
        ));
        self.nodes.insert(child.id.clone(), child.clone());
        parent.add_child_id(child.id.clone());
        Ok(child)
    }

    pub fn get(&self, node_id: &NodeId) -> Result<Arc<Node>> {
        self.nodes
            .get(node_id)
            .map(|n| n.clone())
            .ok_or_else(|| TreeError::NodeNotFound {
                id: node_id.to_string(),
            })
    }

    /// Look up a tree's root node by `tree_id`. The inverse of the id the
    /// client received from [`Forest::create_root`]'s node — mirrors
    /// `get` but keyed by tree rather than node.
    pub fn tree_root(&self, tree_id: &TreeId) -> Result<Arc<Node>> {
        let root_id = self
            .trees
            .get(tree_id)
            .map(|id| id.clone())
            .ok_or_else(|| TreeError::TreeNotFound {
                id: tree_id.to_string(),
            })?;
        self.get(&root_id)
    }

    pub fn set_active(&self, node_id: NodeId) {
        *self.active_node_id.lock().expect("active node lock poisoned") = Some(node_id);
    }

    pub fn active(&self) -> Option<Arc<Node>> {
        let id = self.active_node_id.lock().expect("active node lock poisoned").clone()?;
        self.nodes.get(&id).map(|n| n.clone())
    }

    /// Depth-first removal of `node_id` and its whole subtree. Archive
    /// records for removed nodes are intentionally left in place — only
    /// the live tree is pruned; long-term memory persists beyond node
    /// death.
    pub fn delete(&self, node_id: &NodeId) -> Result<()> {
        let node = self.get(node_id)?;
        for child_id in node.children() {
            self.delete(&child_id)?;
        }
        self.nodes.remove(node_id);

        let mut active = self.active_node_id.lock().expect("active node lock poisoned");
        if active.as_ref() == Some(node_id) {
            *active = None;
        }
        Ok(())
    }

    /// Titles from root to `node_id`, oldest first. Used for UI
    /// breadcrumbs only — never consulted by prompt assembly.
    pub fn path_titles(&self, node_id: &NodeId) -> Result<Vec<String>> {
        let node = self.get(node_id)?;
        let ancestors = match &node.parent {
            Some(parent_id) => self.path_titles(parent_id)?,
            None => Vec::new(),
        };
        Ok(node.path_titles(&ancestors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_child_fails_for_unknown_parent() {
        let forest = Forest::new(15);
        let bogus = NodeId::new();
        let err = forest.create_child(&bogus, "child".into(), None).unwrap_err();
        assert!(matches!(err, TreeError::ParentNotFound { .. }));
    }

    #[test]
    fn create_root_and_child_are_reachable() {
        let forest = Forest::new(15);
        let root = forest.create_root("root".into());
        let child = forest.create_child(&root.id, "child".into(), None).unwrap();

        assert_eq!(forest.get(&child.id).unwrap().id, child.id);
        assert_eq!(root.children(), vec![child.id.clone()]);
        assert_eq!(child.parent.as_ref(), Some(&root.id));
    }

    #[test]
    fn delete_cascades_to_descendants() {
        let forest = Forest::new(15);
        let root = forest.create_root("root".into());
        let child = forest.create_child(&root.id, "child".into(), None).unwrap();
        let grandchild = forest.create_child(&child.id, "gc".into(), None).unwrap();

        forest.delete(&child.id).unwrap();

        assert!(forest.get(&child.id).is_err());
        assert!(forest.get(&grandchild.id).is_err());
        assert!(forest.get(&root.id).is_ok());
    }

    #[test]
    fn active_node_roundtrips() {
        let forest = Forest::new(15);
        let root = forest.create_root("root".into());
        assert!(forest.active().is_none());
        forest.set_active(root.id.clone());
        assert_eq!(forest.active().unwrap().id, root.id);
    }

    #[test]
    fn path_titles_orders_root_to_leaf() {
        let forest = Forest::new(15);
        let root = forest.create_root("root".into());
        let child = forest.create_child(&root.id, "child".into(), None).unwrap();
        let titles = forest.path_titles(&child.id).unwrap();
        assert_eq!(titles, vec!["root".to_string(), "child".to_string()]);
    }

    #[test]
    fn tree_root_resolves_to_the_root_node() {
        let forest = Forest::new(15);
        let root = forest.create_root("root".into());
        let found = forest.tree_root(&root.tree_id).unwrap();
        assert_eq!(found.id, root.id);
    }

    #[test]
    fn tree_root_fails_for_unknown_tree_id() {
        let forest = Forest::new(15);
        let bogus = TreeId::new();
        let err = forest.tree_root(&bogus).unwrap_err();
        assert!(matches!(err, TreeError::TreeNotFound { .. }));
    }

    #[test]
    fn child_inherits_parents_tree_id() {
        let forest = Forest::new(15);
        let root = forest.create_root("root".into());
        let child = forest.create_child(&root.id, "child".into(), None).unwrap();
        assert_eq!(child.tree_id, root.tree_id);
        assert_eq!(forest.tree_root(&child.tree_id).unwrap().id, root.id);
    }
}
