//! Incremental terminal rendering of a conversation.
//!
//! The renderer remembers what it already wrote for every log entry so that
//! streamed deltas print as a continuation of the current line instead of
//! repainting the whole transcript.

use session_sync::{ChatMessage, EnvironmentStatus, LogChange, PreviewProjection, Role};

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    printed: Vec<String>,
    line_open: bool,
}

impl TranscriptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render seeded history as complete lines.
    pub fn history(&mut self, messages: &[ChatMessage]) -> String {
        let mut out = String::new();
        for message in messages {
            self.close_line(&mut out);
            out.push_str(&format!("{}> {}", role_label(message.role), message.content));
            self.printed.push(message.content.clone());
            self.line_open = true;
        }
        out
    }

    /// Text to write for one log change.
    pub fn apply(&mut self, messages: &[ChatMessage], change: LogChange) -> String {
        let index = change.index();
        let Some(message) = messages.get(index) else {
            return String::new();
        };
        let mut out = String::new();

        if index >= self.printed.len() {
            self.close_line(&mut out);
            out.push_str(&format!("{}> {}", role_label(message.role), message.content));
            self.printed.resize(index, String::new());
            self.printed.push(message.content.clone());
            self.line_open = true;
            return out;
        }

        let before = &self.printed[index];
        let is_tail = index + 1 == messages.len();
        if is_tail && self.line_open && message.content.starts_with(before.as_str()) {
            out.push_str(&message.content[before.len()..]);
        } else if message.content != *before {
            self.close_line(&mut out);
            out.push_str(&format!(
                "~ {}> {}",
                role_label(message.role),
                message.content
            ));
            self.line_open = true;
        }
        self.printed[index] = message.content.clone();
        out
    }

    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        self.close_line(&mut out);
        out
    }

    fn close_line(&mut self, out: &mut String) {
        if self.line_open {
            out.push('\n');
            self.line_open = false;
        }
    }
}

/// Tracks the environment fields worth announcing on stderr.
#[derive(Debug, Default)]
pub struct EnvironmentReport {
    status: Option<EnvironmentStatus>,
    url: Option<String>,
    follow_ups: Vec<String>,
}

impl EnvironmentReport {
    /// Notices for everything that changed since the last call.
    pub fn changes(
        &mut self,
        status: EnvironmentStatus,
        preview: &PreviewProjection,
        follow_ups: &[String],
    ) -> Vec<String> {
        let mut notices = Vec::new();
        if self.status != Some(status) {
            notices.push(format!("status: {}", status));
            self.status = Some(status);
        }
        if self.url != preview.url {
            match &preview.url {
                Some(url) => notices.push(format!("preview: {}{}", url, preview.path)),
                None => notices.push("preview: unavailable".to_string()),
            }
            self.url = preview.url.clone();
        }
        if self.follow_ups != follow_ups {
            if !follow_ups.is_empty() {
                notices.push(format!("suggestions: {}", follow_ups.join(" | ")));
            }
            self.follow_ups = follow_ups.to_vec();
        }
        notices
    }
}
