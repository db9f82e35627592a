//! StopTask (§4.4): stop a running container, gated on a "stopped" probe.

use tracing::warn;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::progress::OutputSink;
use crate::task::check_for_state;

/// Stop a container if it is running; non-fatal on probe failure.
pub struct StopTask<'a> {
    container: &'a Container,
}

impl<'a> StopTask<'a> {
    /// Build a StopTask for `container`.
    #[must_use]
    pub fn new(container: &'a Container) -> Self {
        Self { container }
    }

    /// Run the task. Returns `true` if the container ends up stopped
    /// (including if it was already down); a stop-probe failure is
    /// reported as a warning and does not make this `Err`.
    pub async fn run(&self, sink: &dyn OutputSink) -> Result<bool> {
        sink.reset();

        let status = self.container.refresh_status().await?;
        let running = status.as_ref().is_some_and(|s| s.state.running);
        if !running {
            sink.commit("down");
            return Ok(true);
        }

        sink.pending("stopping");
        self.container
            .ship()
            .stop(self.container.name(), self.container.stop_timeout())
            .await?;

        let stopped = check_for_state(self.container, "stopped", |status| {
            status.is_none_or(|s| !s.state.running)
        })
        .await;

        if stopped {
            sink.commit("down");
        } else {
            let err = Error::stop_failure(self.container.name(), "stopped-state probes failed");
            warn!("{err}");
            sink.commit("down (unconfirmed)");
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;
    use crate::ship::{Ship, ShipConfig, TlsConfig};
    use std::collections::HashMap;
    use std::time::Duration;

    async fn unit_test_ship() -> Ship {
        Ship::connect(ShipConfig {
            name: "s1".to_string(),
            ip: "127.0.0.1".parse().unwrap(),
            endpoint: None,
            docker_port: Some(1),
            socket_path: None,
            timeout: Some(Duration::from_millis(200)),
            ssh_tunnel: None,
            tls: TlsConfig::default(),
        })
        .await
        .unwrap()
    }

    fn bare_container_config(name: &str) -> ContainerConfig {
        ContainerConfig {
            name: name.to_string(),
            service_name: "svc".to_string(),
            image: None,
            command: None,
            ports: HashMap::new(),
            env: HashMap::new(),
            volumes: HashMap::new(),
            container_volumes: Default::default(),
            volumes_from: Default::default(),
            links: HashMap::new(),
            privileged: false,
            network_mode: None,
            pid_mode: None,
            restart_policy: crate::types::RestartPolicy::none(),
            dns: Vec::new(),
            stop_timeout: None,
            cpu_shares: None,
            mem_limit: None,
            memswap_limit: None,
            workdir: None,
            lifecycle: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_stop_task_already_down_reports_down() {
        let ship = unit_test_ship().await;
        let container =
            Container::new(bare_container_config("c1"), ship, "img:latest", "env").unwrap();

        let sink = crate::progress::RecordingSink::default();
        let ok = StopTask::new(&container).run(&sink).await.unwrap();
        assert!(ok);
        assert!(sink.events().iter().any(|e| e.contains("down")));
    }
}
