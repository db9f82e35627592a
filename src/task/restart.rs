//! RestartTask (§4.4): conditional pull, change detection, paced stop+start.

use std::collections::HashMap;
use std::time::Duration;

use crate::container::Container;
use crate::error::Result;
use crate::progress::OutputSink;
use crate::task::login::RegistryCredentials;
use crate::task::pull::PullTask;
use crate::task::start::StartTask;
use crate::task::stop::StopTask;

/// Restart a container, optionally skipping the cycle entirely when the
/// image hasn't changed.
pub struct RestartTask<'a> {
    container: &'a Container,
    registries: &'a HashMap<String, RegistryCredentials>,
    refresh: bool,
    step_delay: Duration,
    stop_start_delay: Duration,
    reuse: bool,
    only_if_changed: bool,
}

impl<'a> RestartTask<'a> {
    /// Build a RestartTask.
    #[must_use]
    pub fn new(
        container: &'a Container,
        registries: &'a HashMap<String, RegistryCredentials>,
        refresh: bool,
        step_delay: Duration,
        stop_start_delay: Duration,
        reuse: bool,
        only_if_changed: bool,
    ) -> Self {
        Self {
            container,
            registries,
            refresh,
            step_delay,
            stop_start_delay,
            reuse,
            only_if_changed,
        }
    }

    /// Run the task.
    pub async fn run(&self, sink: &dyn OutputSink) -> Result<()> {
        sink.reset();

        if self.refresh {
            let (image, tag) = split_image_tag(self.container.image());
            PullTask::new(self.container.ship(), self.registries)
                .run(&image, &tag, sink)
                .await?;
        }

        if self.only_if_changed {
            let status = self.container.refresh_status().await?;
            if let Some(status) = &status {
                if status.state.running {
                    let catalog_key = format!("{}:{}", split_image_tag(self.container.image()).0, split_image_tag(self.container.image()).1);
                    let local_id = self.container.ship().image_ids().await?.get(&catalog_key).cloned();
                    if local_id.as_deref() == Some(status.image.as_str()) {
                        sink.commit("up to date");
                        return Ok(());
                    }
                }
            }
        }

        tokio::time::sleep(self.step_delay).await;
        StopTask::new(self.container).run(sink).await?;

        tokio::time::sleep(self.stop_start_delay).await;
        StartTask::new(self.container, self.registries, false, self.reuse)
            .run(sink)
            .await
    }
}

fn split_image_tag(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_tag() {
        assert_eq!(
            split_image_tag("web:2.0"),
            ("web".to_string(), "2.0".to_string())
        );
    }
}
