use tracing::{debug, warn};

use crate::protocol::{ChatUpdateFrame, StatusFrame};
use crate::types::{EnvironmentStatus, FileTree, FileTrees, PreviewProjection};

/// Derived view of the remote environment: status, preview, file trees,
/// follow-up suggestions and the sandbox git log.
///
/// Mapping fields follow a first-key convention: when several services report
/// a status or a tunnel, the first one in wire order wins. The choice is
/// arbitrary but deterministic for a given server.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentProjector {
    status: EnvironmentStatus,
    preview: PreviewProjection,
    file_trees: FileTrees,
    follow_ups: Vec<String>,
    git_log: Option<String>,
}

impl EnvironmentProjector {
    pub fn new(initial: EnvironmentStatus) -> Self {
        Self {
            status: initial,
            preview: PreviewProjection::default(),
            file_trees: FileTrees::default(),
            follow_ups: Vec::new(),
            git_log: None,
        }
    }

    pub fn status(&self) -> EnvironmentStatus {
        self.status
    }

    pub fn preview(&self) -> &PreviewProjection {
        &self.preview
    }

    pub fn file_trees(&self) -> &FileTrees {
        &self.file_trees
    }

    pub fn follow_ups(&self) -> &[String] {
        &self.follow_ups
    }

    pub fn git_log(&self) -> Option<&str> {
        self.git_log.as_deref()
    }

    /// Lifecycle and optimistic transitions. Returns true if the status changed.
    pub fn set_status(&mut self, status: EnvironmentStatus) -> bool {
        if self.status == status {
            return false;
        }
        debug!(from = %self.status, to = %status, "environment status");
        self.status = status;
        true
    }

    pub fn apply_status(&mut self, frame: StatusFrame) {
        self.preview.url = select_preview_url(frame.frontend_tunnel, frame.tunnels);

        if let Some((service, raw)) = frame.sandbox_statuses.and_then(first_entry) {
            match raw.parse::<EnvironmentStatus>() {
                Ok(status) => {
                    self.set_status(status);
                }
                Err(e) => warn!(%service, error = %e, "ignoring sandbox status"),
            }
        }

        if let Some(paths) = frame.backend_file_paths {
            self.file_trees.backend = FileTree::from_paths(paths);
        }
        if let Some(paths) = frame.frontend_file_paths {
            self.file_trees.frontend = FileTree::from_paths(paths);
        }
        if let Some(log) = frame.git_log {
            self.git_log = Some(log);
        }
    }

    pub fn apply_chat_update(&mut self, frame: &ChatUpdateFrame) {
        if let Some(follow_ups) = &frame.follow_ups {
            self.follow_ups = follow_ups.clone();
        }
        if let Some(path) = &frame.navigate_to {
            self.preview.path = path.clone();
        }
        self.preview.revision += 1;
    }
}

impl Default for EnvironmentProjector {
    fn default() -> Self {
        Self::new(EnvironmentStatus::NewChat)
    }
}

/// Dedicated tunnel first, then the first named tunnel, else nothing.
fn select_preview_url(
    frontend_tunnel: Option<String>,
    tunnels: Option<Vec<(String, String)>>,
) -> Option<String> {
    frontend_tunnel.or_else(|| tunnels.and_then(first_entry).map(|(_, url)| url))
}

fn first_entry<V>(pairs: Vec<(String, V)>) -> Option<(String, V)> {
    pairs.into_iter().next()
}
