//! Service: a named group of container instances sharing an image
//! (§3, §4.2 — dependency sets, transitive closures, link variables).

use std::collections::{BTreeMap, HashSet};

use crate::container::Container;
use crate::error::{Error, Result};

/// A logical group of container instances sharing an image (§3 `Service`).
pub struct Service {
    name: String,
    image: String,
    omit: bool,
    env: std::collections::HashMap<String, String>,
    requires: HashSet<String>,
    wants_info: HashSet<String>,
    needed_for: HashSet<String>,
    containers: BTreeMap<String, Container>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("requires", &self.requires)
            .field("instances", &self.containers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service {
    /// Construct an empty Service (no containers, no dependency
    /// relations yet — those are populated by the graph builder).
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>, omit: bool) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            omit,
            env: std::collections::HashMap::new(),
            requires: HashSet::new(),
            wants_info: HashSet::new(),
            needed_for: HashSet::new(),
            containers: BTreeMap::new(),
        }
    }

    /// Unique service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default image for this service's containers.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Whether this service is excluded from no-argument bulk commands.
    #[must_use]
    pub fn omit(&self) -> bool {
        self.omit
    }

    /// Base env, overlaid per-instance at Container construction.
    #[must_use]
    pub fn env(&self) -> &std::collections::HashMap<String, String> {
        &self.env
    }

    /// Set the base env map.
    pub fn set_env(&mut self, env: std::collections::HashMap<String, String>) {
        self.env = env;
    }

    /// Direct hard dependencies.
    #[must_use]
    pub fn requires(&self) -> &HashSet<String> {
        &self.requires
    }

    /// Direct soft dependencies (link variables only, no ordering weight).
    #[must_use]
    pub fn wants_info(&self) -> &HashSet<String> {
        &self.wants_info
    }

    /// Direct dependents (reverse of `requires`).
    #[must_use]
    pub fn needed_for(&self) -> &HashSet<String> {
        &self.needed_for
    }

    /// Record a hard dependency on `other`. Callers must pair this with
    /// `other.add_dependent(self)` — the graph builder is responsible
    /// for that consistency (§4.2).
    pub fn add_dependency(&mut self, other: &str) -> Result<()> {
        if other == self.name {
            return Err(Error::configuration(format!(
                "service '{}' cannot require itself",
                self.name
            )));
        }
        self.requires.insert(other.to_string());
        Ok(())
    }

    /// Record a reverse dependency edge from `other`.
    pub fn add_dependent(&mut self, other: &str) -> Result<()> {
        if other == self.name {
            return Err(Error::configuration(format!(
                "service '{}' cannot depend on itself",
                self.name
            )));
        }
        self.needed_for.insert(other.to_string());
        Ok(())
    }

    /// Record a soft "wants info" dependency on `other`.
    pub fn add_wants_info(&mut self, other: &str) -> Result<()> {
        if other == self.name {
            return Err(Error::configuration(format!(
                "service '{}' cannot want info about itself",
                self.name
            )));
        }
        self.wants_info.insert(other.to_string());
        Ok(())
    }

    /// Register a container instance. Invariant 1: `register_container`
    /// must only be called by the builder for containers whose
    /// `service_name` equals this service's name; duplicate names
    /// overwrite, which the builder must prevent by checking uniqueness
    /// up front (§4.2).
    pub fn register_container(&mut self, container: Container) -> Result<()> {
        if container.service_name() != self.name {
            return Err(Error::configuration(format!(
                "container '{}' belongs to service '{}', not '{}'",
                container.name(),
                container.service_name(),
                self.name
            )));
        }
        self.containers.insert(container.name().to_string(), container);
        Ok(())
    }

    /// Containers in deterministic lexicographic order of instance name.
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    /// Look up one container instance by name.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.get(name)
    }

    /// Transitive closure of `requires`, computed against the full
    /// service map by name (the builder guarantees acyclicity; a cycle
    /// found at closure time is a configuration bug, not a user error,
    /// and is reported the same way).
    pub fn requires_closure(&self, all: &std::collections::HashMap<String, Service>) -> Result<HashSet<String>> {
        closure(&self.name, &self.requires, all, |s| &s.requires)
    }

    /// Transitive closure of `needed_for`.
    pub fn needed_for_closure(&self, all: &std::collections::HashMap<String, Service>) -> Result<HashSet<String>> {
        closure(&self.name, &self.needed_for, all, |s| &s.needed_for)
    }

    /// Link variables describing where to find this service's
    /// instances, for injection into consumers that `requires` or
    /// `wants_info` this service (§4.2).
    ///
    /// `SVC = upper(name)` with non-word characters mapped to `_`.
    #[must_use]
    pub fn link_variables(&self, add_internal: bool) -> BTreeMap<String, String> {
        let svc = screaming_snake(&self.name);
        let mut vars = BTreeMap::new();
        let mut instance_names = Vec::new();

        for container in self.containers.values() {
            let cn = screaming_snake(container.name());
            instance_names.push(container.name().to_string());
            vars.insert(format!("{svc}_{cn}_HOST"), container.ship().ip().to_string());

            for (port_name, port) in container.ports() {
                let pn = screaming_snake(port_name);
                vars.insert(
                    format!("{svc}_{cn}_{pn}_PORT"),
                    port.external.1.number.to_string(),
                );
                if add_internal {
                    vars.insert(
                        format!("{svc}_{cn}_{pn}_INTERNAL_PORT"),
                        port.exposed.number.to_string(),
                    );
                }
            }
        }

        vars.insert(format!("{svc}_INSTANCES"), instance_names.join(","));
        vars
    }
}

fn closure<'a, F>(
    start: &str,
    direct: &HashSet<String>,
    all: &'a std::collections::HashMap<String, Service>,
    edges: F,
) -> Result<HashSet<String>>
where
    F: Fn(&'a Service) -> &'a HashSet<String>,
{
    let mut seen = HashSet::new();
    let mut stack: Vec<String> = direct.iter().cloned().collect();
    while let Some(name) = stack.pop() {
        if name == start {
            return Err(Error::configuration(format!(
                "cycle detected in service dependency graph starting at '{start}'"
            )));
        }
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(service) = all.get(&name) {
            for next in edges(service) {
                if !seen.contains(next) {
                    stack.push(next.clone());
                }
            }
        }
    }
    Ok(seen)
}

/// `SVC`-style uppercasing: non-word characters become `_`.
fn screaming_snake(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;
    use crate::ship::{Ship, ShipConfig, TlsConfig};
    use crate::types::{PortNumber, PortSpec, Protocol, RestartPolicy};

    async fn test_ship(ip: &str) -> Ship {
        Ship::connect(ShipConfig {
            name: "s1".to_string(),
            ip: ip.parse().unwrap(),
            endpoint: None,
            docker_port: None,
            socket_path: None,
            timeout: None,
            ssh_tunnel: None,
            tls: TlsConfig::default(),
        })
        .await
        .unwrap()
    }

    fn container_config(name: &str, service_name: &str, ports: std::collections::HashMap<String, PortSpec>) -> ContainerConfig {
        ContainerConfig {
            name: name.to_string(),
            service_name: service_name.to_string(),
            image: None,
            command: None,
            ports,
            env: std::collections::HashMap::new(),
            volumes: std::collections::HashMap::new(),
            container_volumes: HashSet::new(),
            volumes_from: HashSet::new(),
            links: std::collections::HashMap::new(),
            privileged: false,
            network_mode: None,
            pid_mode: None,
            restart_policy: RestartPolicy::none(),
            dns: Vec::new(),
            stop_timeout: None,
            cpu_shares: None,
            mem_limit: None,
            memswap_limit: None,
            workdir: None,
            lifecycle: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn test_add_dependency_rejects_self_reference() {
        let mut svc = Service::new("web", "web:latest", false);
        assert!(svc.add_dependency("web").is_err());
    }

    #[test]
    fn test_screaming_snake() {
        assert_eq!(screaming_snake("web-1"), "WEB_1");
        assert_eq!(screaming_snake("web"), "WEB");
    }

    #[tokio::test]
    async fn test_link_variables_scenario_s4() {
        let mut svc = Service::new("web", "web:latest", false);
        let ship = test_ship("10.0.0.5").await;

        let mut ports = std::collections::HashMap::new();
        ports.insert(
            "http".to_string(),
            PortSpec {
                exposed: PortNumber {
                    number: 80,
                    protocol: Protocol::Tcp,
                },
                external: (
                    "0.0.0.0".to_string(),
                    PortNumber {
                        number: 8080,
                        protocol: Protocol::Tcp,
                    },
                ),
            },
        );

        let container = Container::new(
            container_config("web1", "web", ports),
            ship,
            "web:latest",
            "test-env",
        )
        .unwrap();
        svc.register_container(container).unwrap();

        let vars = svc.link_variables(true);
        assert_eq!(vars.get("WEB_WEB1_HOST"), Some(&"10.0.0.5".to_string()));
        assert_eq!(vars.get("WEB_WEB1_HTTP_PORT"), Some(&"8080".to_string()));
        assert_eq!(
            vars.get("WEB_WEB1_HTTP_INTERNAL_PORT"),
            Some(&"80".to_string())
        );
        assert_eq!(vars.get("WEB_INSTANCES"), Some(&"web1".to_string()));
    }

    #[tokio::test]
    async fn test_link_variables_internal_flag_is_superset() {
        let mut svc = Service::new("web", "web:latest", false);
        let ship = test_ship("10.0.0.5").await;
        let mut ports = std::collections::HashMap::new();
        ports.insert(
            "http".to_string(),
            PortSpec {
                exposed: PortNumber {
                    number: 80,
                    protocol: Protocol::Tcp,
                },
                external: (
                    "0.0.0.0".to_string(),
                    PortNumber {
                        number: 8080,
                        protocol: Protocol::Tcp,
                    },
                ),
            },
        );
        let container = Container::new(
            container_config("web1", "web", ports),
            ship,
            "web:latest",
            "test-env",
        )
        .unwrap();
        svc.register_container(container).unwrap();

        let without_internal = svc.link_variables(false);
        let with_internal = svc.link_variables(true);
        assert_eq!(with_internal.len(), without_internal.len() + 1);
        for key in without_internal.keys() {
            assert!(with_internal.contains_key(key));
        }
    }
}
