//! Context Assembler (C8) — builds the exact message list handed to the
//! LM for one turn, in a fixed five-step order.
//!
//! The LM surface (`ctxtree_llm::ChatRequest`) carries a single `system`
//! string rather than interleaved system-role messages, matching how the
//! Anthropic Messages API itself is shaped — so steps 1–3 are concatenated
//! into one system string instead of three separate system messages.

use ctxtree_archive::ArchiveRecord;
use ctxtree_core::Role;
use ctxtree_llm::Message;
use ctxtree_tree::Node;

pub const ARCHIVE_MEMORY_LABEL: &str = "The following are archived messages from related past \
conversations; treat them as reference material, not as the current thread.";

/// The assembled system string plus conversation-turn messages for one
/// LM call, along with retrieval metrics the orchestrator surfaces to
/// logs/tests.
pub struct AssembledPrompt {
    pub system: String,
    pub messages: Vec<Message>,
    pub retrieval_ran: bool,
    pub retrieved_count: usize,
}

/// Build the prompt for `node` answering `user_text`, given optional
/// retrieval results already produced by C6+C7 for this call (`None` if
/// retrieval was disabled for this turn). The buffer snapshot is taken
/// under `node`'s mutex and released before this function is called by
/// the orchestrator — this function itself does no locking or I/O.
pub fn assemble(
    node: &Node,
    retrieved: Option<&[ArchiveRecord]>,
    user_text: &str,
) -> AssembledPrompt {
    let mut system_blocks = Vec::new();

    // Step 1: follow-up linkage.
    if let Some(follow_up) = node.enhanced_follow_up_prompt() {
        system_blocks.push(follow_up);
    }

    // Step 2: rolling summary.
    let summary = node.with_buffer(|b| b.summary().to_string());
    if !summary.is_empty() {
        system_blocks.push(format!("Conversation summary so far: {summary}"));
    }

    // Step 3: archived memory, only if retrieval ran and produced hits.
    let retrieval_ran = retrieved.is_some();
    let retrieved_count = retrieved.map(|r| r.len()).unwrap_or(0);
    if let Some(records) = retrieved {
        if !records.is_empty() {
            let mut block = String::from(ARCHIVE_MEMORY_LABEL);
            block.push('\n');
            for record in records {
                block.push_str(&format!(
                    "[{} @ {}]: {}\n",
                    record.role.as_str(),
                    record.node_title_at_index_time,
                    record.text
                ));
            }
            system_blocks.push(block.trim_end().to_string());
        }
    }

    let system = system_blocks.join("\n\n");

    // Step 4: buffer messages, chronological, original roles.
    let mut messages: Vec<Message> = node.with_buffer(|b| {
        b.iter()
            .map(|m| Message {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    });

    // Step 5: the new user message.
    messages.push(Message {
        role: Role::User,
        content: user_text.to_string(),
    });

    AssembledPrompt {
        system,
        messages,
        retrieval_ran,
        retrieved_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxtree_core::{NodeId, Timestamp, TreeId};
    use ctxtree_tree::{ContextType, FollowUp};

    #[test]
    fn assembles_buffer_then_new_user_message_with_no_extras() {
        let node = Node::new(NodeId::new(), TreeId::new(), "root".into(), None, None, 15);
        node.with_buffer(|b| {
            b.append(Role::User, "hi".to_string(), Timestamp::now()).unwrap();
            b.append(Role::Assistant, "hello".to_string(), Timestamp::now()).unwrap();
        });

        let prompt = assemble(&node, None, "how are you");

        assert_eq!(prompt.system, "");
        assert_eq!(prompt.messages.len(), 3);
        assert_eq!(prompt.messages[0].content, "hi");
        assert_eq!(prompt.messages[1].content, "hello");
        assert_eq!(prompt.messages[2].content, "how are you");
        assert!(matches!(prompt.messages[2].role, Role::User));
        assert!(!prompt.retrieval_ran);
    }

    #[test]
    fn follow_up_and_summary_precede_archive_memory_in_system_string() {
        let fu = FollowUp {
            selected_text: "pricing table".to_string(),
            follow_up_context: "tier 2 cost".to_string(),
            context_type: ContextType::FollowUp,
        };
        let node = Node::new(NodeId::new(), TreeId::new(), "pricing".into(), None, Some(fu), 15);
        node.with_buffer(|b| b.replace_summary("earlier we discussed tiers".to_string()));

        let record = ArchiveRecord {
            record_id: ctxtree_core::RecordId::new(),
            node_id: NodeId::new(),
            role: Role::User,
            text: "I prefer tier 2".to_string(),
            timestamp: Timestamp::now(),
            node_title_at_index_time: "other-chat".to_string(),
            embedding: vec![],
        };

        let prompt = assemble(&node, Some(&[record]), "why");

        let follow_up_pos = prompt.system.find("Follow-up context").unwrap();
        let summary_pos = prompt.system.find("Conversation summary").unwrap();
        let archive_pos = prompt.system.find(ARCHIVE_MEMORY_LABEL).unwrap();
        assert!(follow_up_pos < summary_pos);
        assert!(summary_pos < archive_pos);
        assert!(prompt.system.contains("other-chat"));
        assert!(prompt.retrieval_ran);
        assert_eq!(prompt.retrieved_count, 1);
    }

    #[test]
    fn empty_retrieval_hits_omit_archive_memory_block() {
        let node = Node::new(NodeId::new(), TreeId::new(), "root".into(), None, None, 15);
        let prompt = assemble(&node, Some(&[]), "hi");
        assert!(!prompt.system.contains(ARCHIVE_MEMORY_LABEL));
        assert!(prompt.retrieval_ran);
        assert_eq!(prompt.retrieved_count, 0);
    }
}
