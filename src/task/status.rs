//! StatusTask (§4.4): a single inspection, reported as one of
//! `"running"`, `"down"`, or `"host down"`.

use tracing::warn;

use crate::container::Container;
use crate::progress::OutputSink;

/// Outcome of a `StatusTask` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// Container is running; carries its short image ID and age since start.
    Running {
        /// First 12 characters of the running container's image ID.
        short_id: String,
        /// Seconds elapsed since `State.StartedAt`, if parseable.
        age_secs: Option<i64>,
    },
    /// Container exists but is not running.
    Down {
        /// First 12 characters of the container's image ID.
        short_id: String,
        /// Seconds elapsed since `State.FinishedAt`, if parseable.
        age_secs: Option<i64>,
    },
    /// The engine call itself raised — host unreachable.
    HostDown,
}

/// Inspect a container once and classify its status.
pub struct StatusTask<'a> {
    container: &'a Container,
}

impl<'a> StatusTask<'a> {
    /// Build a StatusTask for `container`.
    #[must_use]
    pub fn new(container: &'a Container) -> Self {
        Self { container }
    }

    /// Run the task, reporting through `sink`.
    pub async fn run(&self, sink: &dyn OutputSink) -> StatusReport {
        sink.reset();
        match self.container.refresh_status().await {
            Ok(Some(status)) => {
                let short_id = short_id(&status.image);
                if status.state.running {
                    let age = age_since(&status.state.started_at);
                    sink.commit(&format!("running ({short_id}, {})", render_age(age)));
                    StatusReport::Running {
                        short_id,
                        age_secs: age,
                    }
                } else {
                    let age = age_since(&status.state.finished_at);
                    sink.commit(&format!("down ({short_id}, {})", render_age(age)));
                    StatusReport::Down {
                        short_id,
                        age_secs: age,
                    }
                }
            }
            Ok(None) => {
                sink.commit("down (no such container)");
                StatusReport::Down {
                    short_id: String::new(),
                    age_secs: None,
                }
            }
            Err(e) => {
                warn!(container = self.container.name(), "host down: {e}");
                sink.commit("host down");
                StatusReport::HostDown
            }
        }
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

fn age_since(timestamp: &str) -> Option<i64> {
    // Docker's zero-value "never happened" timestamp.
    if timestamp.starts_with("0001-01-01") {
        return None;
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(timestamp).ok()?;
    let elapsed = chrono::Utc::now().signed_duration_since(parsed);
    Some(elapsed.num_seconds().max(0))
}

fn render_age(age: Option<i64>) -> String {
    match age {
        Some(secs) => format!("{secs}s ago"),
        None => "unknown age".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates_to_twelve_chars() {
        assert_eq!(short_id("sha256:abcdef0123456789"), "sha256:abcde");
    }

    #[test]
    fn test_age_since_zero_value_is_none() {
        assert_eq!(age_since("0001-01-01T00:00:00Z"), None);
    }

    #[test]
    fn test_age_since_past_timestamp_is_positive() {
        assert!(age_since("2020-01-01T00:00:00Z").unwrap() > 0);
    }
}
