//! StartTask (§4.4): the idempotent 9-step container start sequence.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::container::Container;
use crate::error::{Error, Result};
use crate::progress::OutputSink;
use crate::ship::{CreateContainerSpec, RestartPolicyWire, StartSpec};
use crate::task::login::RegistryCredentials;
use crate::task::pull::PullTask;
use crate::task::remove::RemoveTask;
use crate::task::{check_for_state, wait_for_status};

const LOG_EXCERPT_TAIL: usize = 200;

/// Bring a container up, pulling and (re)creating it as needed.
pub struct StartTask<'a> {
    container: &'a Container,
    registries: &'a HashMap<String, RegistryCredentials>,
    refresh: bool,
    reuse: bool,
}

impl<'a> StartTask<'a> {
    /// Build a StartTask.
    ///
    /// `refresh` forces a pull even if the image is already cataloged;
    /// `reuse` allows keeping an existing stopped container of the same
    /// name instead of removing it first.
    #[must_use]
    pub fn new(
        container: &'a Container,
        registries: &'a HashMap<String, RegistryCredentials>,
        refresh: bool,
        reuse: bool,
    ) -> Self {
        Self {
            container,
            registries,
            refresh,
            reuse,
        }
    }

    /// Run the 9-step sequence. Returns `Ok(())` once the container is
    /// running and its `"running"` probes confirm it; attaches a log
    /// excerpt to the error on probe-gating failure (S7).
    pub async fn run(&self, sink: &dyn OutputSink) -> Result<()> {
        sink.reset();

        // Step 1: fast path.
        let existing = self.container.refresh_status().await?;
        if existing.as_ref().is_some_and(|s| s.state.running) {
            sink.commit("up");
            return Ok(());
        }

        // Steps 2-5: clear a stale instance, pull, and (re)create, all
        // skipped together when reusing an existing instance (only
        // wait-for-status and start run unconditionally below).
        if !self.reuse || existing.is_none() {
            // Step 2: clear a stale instance.
            RemoveTask::as_step(self.container).run(sink).await?;

            // Step 3: pull if required or the image is not locally cataloged.
            let (image, tag) = split_image_tag(self.container.image());
            let catalog_key = format!("{image}:{tag}");
            let already_cataloged = self
                .container
                .ship()
                .image_ids()
                .await?
                .contains_key(&catalog_key);

            if self.refresh || !already_cataloged {
                PullTask::new(self.container.ship(), self.registries)
                    .run(&image, &tag, sink)
                    .await?;
            }

            // Step 4: named ports as (number, proto) tuples — exposed side.
            let exposed_ports: HashMap<String, serde_json::Value> = self
                .container
                .ports()
                .values()
                .map(|p| (p.exposed.to_string(), serde_json::json!({})))
                .collect();

            // Step 5: create.
            sink.pending("creating");
            let volumes: HashMap<String, serde_json::Value> = self
                .container
                .container_volumes()
                .iter()
                .map(|target| (target.clone(), serde_json::json!({})))
                .collect();

            let spec = CreateContainerSpec {
                image: self.container.image().to_string(),
                hostname: self.container.name().to_string(),
                env: self
                    .container
                    .env()
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect(),
                command: self.container.command().map(<[String]>::to_vec),
                workdir: self.container.workdir().map(str::to_string),
                exposed_ports,
                volumes,
                memory: self.container.mem_limit(),
                memswap: self.container.memswap_limit().map(|v| v as i64),
                cpu_shares: self.container.cpu_shares(),
            };

            let id = self
                .container
                .ship()
                .create_container(self.container.name(), &spec)
                .await?;
            debug!(container = self.container.name(), %id, "container created");
        }

        // Step 6: poll until inspectable.
        let inspectable = wait_for_status(self.container, |status| status.is_some(), 10).await;
        if !inspectable {
            return Err(Error::orchestration(format!(
                "container '{}' did not become inspectable after create",
                self.container.name()
            )));
        }
        if let Some(status) = self.container.cached_status().await {
            sink.pending(&format!("created ({})", short_id(&status.id)));
        }

        // Step 7: binds, port bindings, + start.
        let binds: Vec<String> = self
            .container
            .volumes()
            .iter()
            .map(|(host, spec)| format!("{host}:{}:{}", spec.target, spec.mode))
            .collect();
        let mut port_bindings: HashMap<String, Vec<HashMap<String, String>>> = HashMap::new();
        for port in self.container.ports().values() {
            let binding = HashMap::from([
                ("HostIp".to_string(), port.external.0.clone()),
                ("HostPort".to_string(), port.external.1.number.to_string()),
            ]);
            port_bindings
                .entry(port.exposed.to_string())
                .or_default()
                .push(binding);
        }

        let start_spec = StartSpec {
            binds,
            port_bindings,
            privileged: self.container.privileged(),
            network_mode: self.container.network_mode().map(str::to_string),
            pid_mode: self.container.pid_mode().map(str::to_string),
            restart_policy: RestartPolicyWire {
                name: self.container.restart_policy().name.clone(),
                max_retries: self.container.restart_policy().max_retries,
            },
            dns: self.container.dns().to_vec(),
            links: self
                .container
                .links()
                .iter()
                .map(|(name, alias)| format!("{name}:{alias}"))
                .collect(),
            volumes_from: self.container.volumes_from().iter().cloned().collect(),
        };

        self.container
            .ship()
            .start(self.container.name(), &start_spec)
            .await?;

        // Step 8: poll until running.
        let running = wait_for_status(
            self.container,
            |status| status.is_some_and(|s| s.state.running),
            10,
        )
        .await;
        if !running {
            return Err(self.failure_with_logs("container did not reach Running after start").await);
        }

        // Step 9: probe gate.
        let confirmed = check_for_state(self.container, "running", |status| {
            status.is_some_and(|s| s.state.running)
        })
        .await;

        if !confirmed {
            return Err(self
                .failure_with_logs("service did not start: running probes failed")
                .await);
        }

        info!(container = self.container.name(), "container up");
        sink.commit("up");
        Ok(())
    }

    async fn failure_with_logs(&self, message: &str) -> Error {
        match self.container.ship().logs(self.container.name(), LOG_EXCERPT_TAIL).await {
            Ok(bytes) => {
                Error::orchestration_with_logs(message, String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(_) => Error::orchestration(message),
        }
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
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
    fn test_split_image_tag_matches_container_module() {
        assert_eq!(
            split_image_tag("web:1.2"),
            ("web".to_string(), "1.2".to_string())
        );
        assert_eq!(
            split_image_tag("web"),
            ("web".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn test_short_id_truncates() {
        assert_eq!(short_id("sha256:abcdef0123456789"), "sha256:abcde");
    }
}
