//! Task engine (§4.4): per-container lifecycle tasks sharing two
//! polling primitives, `wait_for_status` and `check_for_state`.

mod login;
mod pull;
mod remove;
mod restart;
mod start;
mod status;
mod stop;

pub use login::{LoginTask, RegistryCredentials};
pub use pull::{PullProgress, PullTask};
pub use remove::{RemoveOutcome, RemoveTask};
pub use restart::RestartTask;
pub use start::StartTask;
pub use status::{StatusReport, StatusTask};
pub use stop::StopTask;

use std::time::Duration;

use crate::container::Container;
use crate::ship::ContainerStatus;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_STATUS_RETRIES: u32 = 10;

/// Poll `inspect_container` every 500ms up to `retries` times; return
/// `true` on the first poll where `cond(status)` holds. A "not found"
/// status (`None`) is a valid input to `cond`.
pub async fn wait_for_status<F>(container: &Container, cond: F, retries: u32) -> bool
where
    F: Fn(Option<&ContainerStatus>) -> bool,
{
    for attempt in 0..retries.max(1) {
        let status = container.refresh_status().await.unwrap_or(None);
        if cond(status.as_ref()) {
            return true;
        }
        if attempt + 1 < retries.max(1) {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
    false
}

/// If the Container declares no probes for `state`, delegate to
/// `wait_for_status(cond, 10)`. Otherwise launch all of that state's
/// probes concurrently, polling status every second
/// (`wait_for_status(cond, 1)`) while they run; abort with `false` if a
/// status poll says the gating condition is no longer satisfiable. When
/// every probe completes, return `true` iff all of them did.
pub async fn check_for_state<F>(container: &Container, state: &str, cond: F) -> bool
where
    F: Fn(Option<&ContainerStatus>) -> bool,
{
    let probes = container.probes_for(state);
    if probes.is_empty() {
        return wait_for_status(container, cond, DEFAULT_STATUS_RETRIES).await;
    }

    let probe_futures = probes.iter().map(|probe| probe.test());
    let joined = futures_util::future::join_all(probe_futures);
    tokio::pin!(joined);

    loop {
        tokio::select! {
            results = &mut joined => {
                return results.into_iter().all(|ok| ok);
            }
            () = tokio::time::sleep(Duration::from_secs(1)) => {
                if !wait_for_status(container, &cond, 1).await {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;
    use crate::lifecycle::ProbeConfig;
    use crate::ship::{Ship, ShipConfig, TlsConfig};
    use std::collections::HashMap;

    async fn unit_test_ship() -> Ship {
        Ship::connect(ShipConfig {
            name: "s1".to_string(),
            ip: "127.0.0.1".parse().unwrap(),
            endpoint: None,
            docker_port: Some(1), // refused locally: status polls always see "not found"
            socket_path: None,
            timeout: Some(Duration::from_millis(200)),
            ssh_tunnel: None,
            tls: TlsConfig::default(),
        })
        .await
        .unwrap()
    }

    fn bare_container_config(name: &str, lifecycle: HashMap<String, Vec<ProbeConfig>>) -> ContainerConfig {
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
            lifecycle,
        }
    }

    #[tokio::test]
    async fn test_check_for_state_delegates_when_no_probes() {
        let ship = unit_test_ship().await;
        let container = Container::new(
            bare_container_config("c1", HashMap::new()),
            ship,
            "img:latest",
            "env",
        )
        .unwrap();

        // No probes declared and status never matches -> must exhaust
        // wait_for_status's retries and return false quickly in test time.
        let ok = check_for_state(&container, "running", |_| false).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_check_for_state_all_probes_true() {
        let ship = unit_test_ship().await;
        let mut lifecycle = HashMap::new();
        lifecycle.insert(
            "running".to_string(),
            vec![
                ProbeConfig::Sleep { duration_ms: 10 },
                ProbeConfig::Sleep { duration_ms: 20 },
            ],
        );
        let container = Container::new(
            bare_container_config("c1", lifecycle),
            ship,
            "img:latest",
            "env",
        )
        .unwrap();

        let ok = check_for_state(&container, "running", |_| true).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_check_for_state_one_probe_false_fails_scenario_s7() {
        let ship = unit_test_ship().await;
        let mut lifecycle = HashMap::new();
        lifecycle.insert(
            "running".to_string(),
            vec![ProbeConfig::Sleep { duration_ms: 1 }],
        );
        let container = Container::new(
            bare_container_config("c1", lifecycle),
            ship,
            "img:latest",
            "env",
        )
        .unwrap();

        // A TCP probe against a refused port returns false; combined
        // with the always-true sleep probe the overall result must be
        // false (mirrors S7's "one true, one false" gating).
        let probes = vec![
            ProbeConfig::Sleep { duration_ms: 1 },
            ProbeConfig::Tcp {
                port: 1,
                host: Some("127.0.0.1".parse().unwrap()),
            },
        ];
        let mut lifecycle = HashMap::new();
        lifecycle.insert("running".to_string(), probes);
        let container = Container::new(
            bare_container_config("c2", lifecycle),
            container.ship().clone(),
            "img:latest",
            "env",
        )
        .unwrap();

        let ok = check_for_state(&container, "running", |_| true).await;
        assert!(!ok);
    }
}
