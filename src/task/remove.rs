//! RemoveTask (§4.4): remove a stopped container instance.

use tracing::debug;

use crate::container::Container;
use crate::error::Result;
use crate::progress::OutputSink;

/// Remove a container, but only if it is not currently running.
pub struct RemoveTask<'a> {
    container: &'a Container,
    standalone: bool,
}

impl<'a> RemoveTask<'a> {
    /// Build a standalone RemoveTask (reports through `sink` as a
    /// top-level operation).
    #[must_use]
    pub fn new(container: &'a Container) -> Self {
        Self {
            container,
            standalone: true,
        }
    }

    /// Build a RemoveTask invoked as a step of another task (e.g.
    /// StartTask clearing a stale instance) — same semantics, quieter
    /// reporting.
    #[must_use]
    pub fn as_step(container: &'a Container) -> Self {
        Self {
            container,
            standalone: false,
        }
    }

    /// Run the task: absent -> report `absent`; running -> report
    /// `skipped` (never force-removed); else remove with volumes.
    pub async fn run(&self, sink: &dyn OutputSink) -> Result<RemoveOutcome> {
        if self.standalone {
            sink.reset();
        }

        let status = self.container.refresh_status().await?;
        match status {
            None => {
                sink.commit("absent");
                Ok(RemoveOutcome::Absent)
            }
            Some(status) if status.state.running => {
                sink.commit("skipped (running)");
                Ok(RemoveOutcome::Skipped)
            }
            Some(_status) => {
                debug!(container = self.container.name(), "removing container");
                self.container
                    .ship()
                    .remove_container(self.container.name(), true)
                    .await?;
                sink.commit("removed");
                Ok(RemoveOutcome::Removed)
            }
        }
    }
}

/// Outcome of a `RemoveTask` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// No container with this name existed.
    Absent,
    /// The container is running and was left alone.
    Skipped,
    /// The stopped container was removed.
    Removed,
}
