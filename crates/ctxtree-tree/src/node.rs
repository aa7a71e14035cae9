//! Tree Node (C3) — one conversation branch: identity, title, parent
//! link, child list, owned buffer, optional follow-up link to its parent.

use std::sync::Mutex;

use ctxtree_buffer::MessageBuffer;
use ctxtree_core::{NodeId, Timestamp, TreeId};
use serde::{Deserialize, Serialize};

/// How a child node relates to the fragment of its parent it was spawned
/// from. Drives the wording of [`Node::enhanced_follow_up_prompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    FollowUp,
    NewTopic,
    General,
}

/// The only channel through which parent semantics reach a child's
/// prompt (invariant 7: the parent's full buffer is never copied,
/// referenced, or inherited).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUp {
    pub selected_text: String,
    pub follow_up_context: String,
    pub context_type: ContextType,
}

/// One node in the conversation forest. Owns exactly one [`MessageBuffer`]
/// (invariant 1). `parent`/`children` hold [`NodeId`]s rather than strong
/// references to other nodes — the [`crate::forest::Forest`]'s registry is
/// the single strong-ownership point, so there is no `Arc`/`Weak` graph to
/// keep consistent by hand.
pub struct Node {
    pub id: NodeId,
    /// Which tree (set of nodes reachable from one root) this node
    /// belongs to — shared by every node in the tree, inherited from the
    /// root at creation time.
    pub tree_id: TreeId,
    title: Mutex<String>,
    pub parent: Option<NodeId>,
    children: Mutex<Vec<NodeId>>,
    pub follow_up: Option<FollowUp>,
    pub created_at: Timestamp,
    buffer: Mutex<MessageBuffer>,
}

impl Node {
    pub fn new(
        id: NodeId,
        tree_id: TreeId,
        title: String,
        parent: Option<NodeId>,
        follow_up: Option<FollowUp>,
        max_turns: usize,
    ) -> Self {
        Self {
            id,
            tree_id,
            title: Mutex::new(title),
            parent,
            children: Mutex::new(Vec::new()),
            follow_up,
            created_at: Timestamp::now(),
            buffer: Mutex::new(MessageBuffer::new(max_turns)),
        }
    }

    pub fn title(&self) -> String {
        self.title.lock().expect("node title lock poisoned").clone()
    }

    pub fn rename(&self, title: String) {
        *self.title.lock().expect("node title lock poisoned") = title;
    }

    pub fn children(&self) -> Vec<NodeId> {
        self.children.lock().expect("node children lock poisoned").clone()
    }

    pub(crate) fn add_child_id(&self, child: NodeId) {
        self.children
            .lock()
            .expect("node children lock poisoned")
            .push(child);
    }

    /// Lock the buffer for the duration of the closure. The per-node
    /// critical section this produces must never span an LM `.await` —
    /// callers snapshot or append here, then release before streaming.
    pub fn with_buffer<T>(&self, f: impl FnOnce(&mut MessageBuffer) -> T) -> T {
        let mut guard = self.buffer.lock().expect("node buffer lock poisoned");
        f(&mut guard)
    }

    /// Compose the single system message through which a child sees its
    /// parent. Renders to `None` for root nodes and nodes created without
    /// a follow-up record.
    pub fn enhanced_follow_up_prompt(&self) -> Option<String> {
        let fu = self.follow_up.as_ref()?;
        Some(format!(
            "Follow-up context: user selected \"{}\" from the parent; focus narrowly on {}.",
            fu.selected_text, fu.follow_up_context
        ))
    }

    /// Titles from root to this node — used by clients for breadcrumbs,
    /// never consulted by prompt assembly (spec invariant 7).
    pub fn path_titles(&self, ancestors: &[String]) -> Vec<String> {
        let mut path = ancestors.to_vec();
        path.push(self.title());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxtree_core::Role;

    #[test]
    fn follow_up_prompt_is_none_without_follow_up() {
        let node = Node::new(NodeId::new(), TreeId::new(), "root".into(), None, None, 15);
        assert!(node.enhanced_follow_up_prompt().is_none());
    }

    #[test]
    fn follow_up_prompt_renders_selected_text_and_context() {
        let fu = FollowUp {
            selected_text: "the pricing table".to_string(),
            follow_up_context: "why tier 2 costs more".to_string(),
            context_type: ContextType::FollowUp,
        };
        let node = Node::new(NodeId::new(), TreeId::new(), "pricing".into(), None, Some(fu), 15);
        let prompt = node.enhanced_follow_up_prompt().unwrap();
        assert!(prompt.contains("the pricing table"));
        assert!(prompt.contains("why tier 2 costs more"));
    }

    #[test]
    fn with_buffer_allows_append_and_snapshot() {
        let node = Node::new(NodeId::new(), TreeId::new(), "root".into(), None, None, 15);
        node.with_buffer(|b| {
            b.append(Role::User, "hi".to_string(), Timestamp::now()).unwrap();
        });
        let snapshot = node.with_buffer(|b| b.snapshot());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "hi");
    }

    #[test]
    fn rename_updates_title() {
        let node = Node::new(NodeId::new(), TreeId::new(), "old".into(), None, None, 15);
        node.rename("new".to_string());
        assert_eq!(node.title(), "new");
    }
}
