//! Message reconciliation.
//!
//! The log receives two kinds of input: authoritative messages
//! (`chat_update`) and token deltas (`chat_chunk`). Deltas build an
//! unidentified assistant placeholder at the tail; the authoritative message
//! that follows collapses into it instead of appearing twice.

use crate::protocol::ChatChunkFrame;
use crate::types::{ChatMessage, Role};

/// What a reconciliation step did to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChange {
    /// A new entry was pushed at this index.
    Appended(usize),
    /// An entry with the same id was replaced in place.
    Replaced(usize),
    /// The trailing assistant entry absorbed an authoritative message.
    Merged(usize),
    /// The trailing assistant entry grew by a streamed delta.
    Extended(usize),
}

impl LogChange {
    pub fn index(&self) -> usize {
        match *self {
            LogChange::Appended(i)
            | LogChange::Replaced(i)
            | LogChange::Merged(i)
            | LogChange::Extended(i) => i,
        }
    }
}

/// Ordered conversation log. Insertion order is display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationLog {
    entries: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over with a fetched history.
    pub fn seed(&mut self, messages: Vec<ChatMessage>) {
        self.entries = messages;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a complete message: upsert by id, else merge into a trailing
    /// assistant entry, else append.
    pub fn apply_update(&mut self, message: ChatMessage) -> LogChange {
        if let Some(id) = &message.id {
            if let Some(pos) = self.entries.iter().position(|m| m.id.as_ref() == Some(id)) {
                self.entries[pos] = message;
                return LogChange::Replaced(pos);
            }
        }

        if message.role == Role::Assistant {
            if let Some(last) = self.trailing_assistant_mut() {
                last.content = message.content;
                if message.id.is_some() {
                    last.id = message.id;
                }
                if message.thinking_content.is_some() {
                    last.thinking_content = message.thinking_content;
                }
                if message.images.is_some() {
                    last.images = message.images;
                }
                return LogChange::Merged(self.entries.len() - 1);
            }
        }

        self.entries.push(message);
        LogChange::Appended(self.entries.len() - 1)
    }

    /// Apply a streamed delta to the reply in progress.
    pub fn apply_chunk(&mut self, delta: ChatChunkFrame) -> LogChange {
        let thinking = delta.thinking_content.unwrap_or_default();

        if let Some(last) = self.trailing_assistant_mut() {
            last.content.push_str(&delta.content);
            if !thinking.is_empty() || last.thinking_content.is_some() {
                last.thinking_content
                    .get_or_insert_with(String::new)
                    .push_str(&thinking);
            }
            return LogChange::Extended(self.entries.len() - 1);
        }

        let mut placeholder = ChatMessage::assistant(delta.content);
        if !thinking.is_empty() {
            placeholder.thinking_content = Some(thinking);
        }
        self.entries.push(placeholder);
        LogChange::Appended(self.entries.len() - 1)
    }

    fn trailing_assistant_mut(&mut self) -> Option<&mut ChatMessage> {
        self.entries.last_mut().filter(|m| m.role == Role::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;

    fn chunk(content: &str) -> ChatChunkFrame {
        ChatChunkFrame {
            content: content.to_string(),
            thinking_content: None,
        }
    }

    fn thinking_chunk(content: &str, thinking: &str) -> ChatChunkFrame {
        ChatChunkFrame {
            content: content.to_string(),
            thinking_content: Some(thinking.to_string()),
        }
    }

    // ── apply_update ────────────────────────────────────────────────────

    #[test]
    fn test_update_is_idempotent_per_id() {
        let mut log = ConversationLog::new();
        log.apply_update(ChatMessage::user("first").with_id(1));
        log.apply_update(ChatMessage::assistant("draft").with_id("a1"));
        let change = log.apply_update(ChatMessage::assistant("final").with_id("a1"));

        assert_eq!(change, LogChange::Replaced(1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1].content, "final");
    }

    #[test]
    fn test_update_replaces_in_place_out_of_order() {
        let mut log = ConversationLog::new();
        log.apply_update(ChatMessage::user("q1").with_id(1));
        log.apply_update(ChatMessage::assistant("a1").with_id(2));
        log.apply_update(ChatMessage::user("q2").with_id(3));

        // Late correction of an earlier message keeps its position
        let change = log.apply_update(ChatMessage::assistant("a1 fixed").with_id(2));
        assert_eq!(change, LogChange::Replaced(1));
        let contents: Vec<_> = log.entries().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1 fixed", "q2"]);
    }

    #[test]
    fn test_update_appends_user_messages() {
        let mut log = ConversationLog::new();
        assert_eq!(log.apply_update(ChatMessage::user("a").with_id(1)), LogChange::Appended(0));
        assert_eq!(log.apply_update(ChatMessage::user("b").with_id(2)), LogChange::Appended(1));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_user_update_never_merges_into_assistant() {
        let mut log = ConversationLog::new();
        log.apply_chunk(chunk("thinking out loud"));
        let change = log.apply_update(ChatMessage::user("next").with_id(5));
        assert_eq!(change, LogChange::Appended(1));
        assert_eq!(log.entries()[0].content, "thinking out loud");
    }

    #[test]
    fn test_merge_then_finalize() {
        let mut log = ConversationLog::new();
        log.apply_chunk(chunk("Hel"));
        log.apply_chunk(chunk("lo"));
        assert_eq!(log.entries()[0].content, "Hello");

        let change = log.apply_update(ChatMessage::assistant("Hello world").with_id("m1"));

        assert_eq!(change, LogChange::Merged(0));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].id, Some(MessageId::from("m1")));
        assert_eq!(log.entries()[0].content, "Hello world");
    }

    #[test]
    fn test_merge_keeps_streamed_thinking() {
        let mut log = ConversationLog::new();
        log.apply_chunk(thinking_chunk("", "plan: add route"));
        log.apply_chunk(chunk("Added the route."));
        log.apply_update(ChatMessage::assistant("Added the route.").with_id(9));

        let entry = &log.entries()[0];
        assert_eq!(entry.thinking_content.as_deref(), Some("plan: add route"));
        assert_eq!(entry.id, Some(MessageId::Number(9)));
    }

    #[test]
    fn test_merge_after_user_echo() {
        // user echo (persisted), streamed reply, persisted reply
        let mut log = ConversationLog::new();
        log.apply_update(ChatMessage::user("build a todo app").with_id(10));
        log.apply_chunk(chunk("Sure"));
        log.apply_chunk(chunk(", building."));
        log.apply_update(ChatMessage::assistant("Sure, building.").with_id(11));
        // duplicate delivery of the final message
        log.apply_update(ChatMessage::assistant("Sure, building.").with_id(11));

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1].id, Some(MessageId::Number(11)));
    }

    // ── apply_chunk ─────────────────────────────────────────────────────

    #[test]
    fn test_chunk_accumulation() {
        let mut log = ConversationLog::new();
        assert_eq!(log.apply_chunk(chunk("a")), LogChange::Appended(0));
        assert_eq!(log.apply_chunk(chunk("b")), LogChange::Extended(0));
        assert_eq!(log.apply_chunk(chunk("c")), LogChange::Extended(0));

        assert_eq!(log.len(), 1);
        let entry = &log.entries()[0];
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.content, "abc");
        assert!(entry.id.is_none());
        assert!(entry.thinking_content.is_none());
    }

    #[test]
    fn test_chunk_accumulates_thinking() {
        let mut log = ConversationLog::new();
        log.apply_chunk(thinking_chunk("", "step 1. "));
        log.apply_chunk(thinking_chunk("", "step 2."));
        log.apply_chunk(thinking_chunk("Done", ""));

        let entry = &log.entries()[0];
        assert_eq!(entry.thinking_content.as_deref(), Some("step 1. step 2."));
        assert_eq!(entry.content, "Done");
    }

    #[test]
    fn test_chunk_after_user_starts_new_entry() {
        let mut log = ConversationLog::new();
        log.apply_update(ChatMessage::user("hi").with_id(1));
        assert_eq!(log.apply_chunk(chunk("Hey")), LogChange::Appended(1));
        assert_eq!(log.last().map(|m| m.role), Some(Role::Assistant));
    }

    #[test]
    fn test_chunk_extends_persisted_assistant_tail() {
        // The trailing assistant entry grows even when it already has an id.
        let mut log = ConversationLog::new();
        log.apply_update(ChatMessage::assistant("part one").with_id(3));
        log.apply_chunk(chunk(" and two"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].content, "part one and two");
    }

    // ── seeding ─────────────────────────────────────────────────────────

    #[test]
    fn test_seed_replaces_everything() {
        let mut log = ConversationLog::new();
        log.apply_chunk(chunk("stale"));
        log.seed(vec![
            ChatMessage::user("q").with_id(1),
            ChatMessage::assistant("a").with_id(2),
        ]);
        assert_eq!(log.len(), 2);
        // A fresh reply after seeding still collapses into the seeded tail
        log.apply_update(ChatMessage::assistant("a, revised").with_id(2));
        assert_eq!(log.len(), 2);
        log.clear();
        assert!(log.is_empty());
    }
}
