//! Configuration intake (§6): parse the post-parse configuration shape
//! into ships, registries, and a validated entity graph.
//!
//! The loader that turns YAML/TOML/etc into this shape is out of scope
//! (§1); this module only covers what comes after parsing: schema
//! validation against the invariants in §3/§4.2, and construction of
//! `Ship`/`Service`/`Container` instances.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::container::{Container, ContainerConfig, VolumeSpec};
use crate::error::{Error, Result};
use crate::lifecycle::ProbeConfig;
use crate::service::Service;
use crate::ship::{Ship, ShipConfig, SshTunnelConfig, TlsConfig};
use crate::task::RegistryCredentials;
use crate::types::RestartPolicy;
use crate::utils::validate_container_name;

/// Raw `ships.<name>` block, as parsed from configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawShip {
    /// Reachable address or hostname.
    pub ip: IpAddr,
    /// Address used to contact the engine; defaults to `ip`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Engine port.
    #[serde(default)]
    pub docker_port: Option<u16>,
    /// Unix socket path.
    #[serde(default)]
    pub socket_path: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// SSH tunnel block.
    #[serde(default)]
    pub ssh_tunnel: Option<SshTunnelConfig>,
    /// Enable TLS.
    #[serde(default)]
    pub tls: bool,
    /// Verify the server certificate.
    #[serde(default)]
    pub tls_verify: bool,
    /// PEM-encoded CA certificate.
    #[serde(default)]
    pub tls_ca_cert: Option<String>,
    /// PEM-encoded client certificate.
    #[serde(default)]
    pub tls_cert: Option<String>,
    /// PEM-encoded client key.
    #[serde(default)]
    pub tls_key: Option<String>,
}

/// Raw `registries.<name>` block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRegistry {
    /// Registry URL.
    pub registry: String,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
}

/// Raw `services.<name>` block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawService {
    /// Image reference.
    pub image: String,
    /// Exclude from no-argument bulk commands.
    #[serde(default)]
    pub omit: bool,
    /// Base env, values may be scalars or nested arrays (flattened).
    #[serde(default)]
    pub env: HashMap<String, serde_json::Value>,
    /// Hard dependency service names.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Soft dependency service names (link variables only).
    #[serde(default)]
    pub wants_info: Vec<String>,
    /// Instance name -> instance config.
    pub instances: HashMap<String, RawInstance>,
}

/// Raw `services.<name>.instances.<name>` block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawInstance {
    /// Ship this instance runs on.
    pub ship: String,
    /// Image override.
    #[serde(default)]
    pub image: Option<String>,
    /// Command override.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Named ports, heterogeneous shape (see `container::parse_port_value`).
    #[serde(default)]
    pub ports: HashMap<String, serde_json::Value>,
    /// Instance env overrides.
    #[serde(default)]
    pub env: HashMap<String, serde_json::Value>,
    /// Host path -> bind spec (or, under legacy `schema == 1`, inverted).
    #[serde(default)]
    pub volumes: HashMap<String, serde_json::Value>,
    /// Container-internal paths with no host binding.
    #[serde(default)]
    pub container_volumes: Vec<String>,
    /// Other instance names whose volumes are mounted.
    #[serde(default)]
    pub volumes_from: Vec<String>,
    /// Container name -> alias.
    #[serde(default)]
    pub links: HashMap<String, String>,
    /// Run privileged.
    #[serde(default)]
    pub privileged: bool,
    /// Network mode override.
    #[serde(default)]
    pub net: Option<String>,
    /// PID namespace mode override.
    #[serde(default)]
    pub pid: Option<String>,
    /// Restart policy, heterogeneous shape.
    #[serde(default)]
    pub restart: Option<serde_json::Value>,
    /// DNS servers.
    #[serde(default)]
    pub dns: Vec<String>,
    /// Stop timeout in seconds.
    #[serde(default)]
    pub stop_timeout: Option<u64>,
    /// Resource limits.
    #[serde(default)]
    pub limits: RawLimits,
    /// Working directory override.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Lifecycle probe configs per state.
    #[serde(default)]
    pub lifecycle: HashMap<String, Vec<ProbeConfig>>,
}

/// `instances.<name>.limits` block.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLimits {
    /// CPU shares.
    #[serde(default)]
    pub cpu: Option<u64>,
    /// Memory limit, `<int>[kmg]`.
    #[serde(default)]
    pub memory: Option<String>,
    /// Memory+swap limit, `<int>[kmg]`.
    #[serde(default)]
    pub swap: Option<String>,
}

/// Schema descriptor; only the legacy volume-mapping direction (`schema
/// == 1`) affects parsing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSchema {
    /// Schema version.
    #[serde(default)]
    pub schema: u32,
}

/// The full post-parse configuration (§6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Ship name -> config.
    pub ships: HashMap<String, RawShip>,
    /// Registry name -> config.
    #[serde(default)]
    pub registries: HashMap<String, RawRegistry>,
    /// Service name -> config.
    pub services: HashMap<String, RawService>,
    /// Schema descriptor.
    #[serde(default)]
    pub schema: RawSchema,
}

/// Fully validated, constructed deployment.
pub struct Deployment {
    /// All connected ships, by name.
    pub ships: HashMap<String, Ship>,
    /// All services, by name (each owning its containers).
    pub services: HashMap<String, Service>,
    /// Registry credentials, by configured name.
    pub registries: HashMap<String, RegistryCredentials>,
}

/// Validates a [`RawConfig`] and constructs the entity graph (§6).
///
/// Surfaces a `ConfigurationError` on the first violated invariant:
/// duplicate instance names, dangling `ship`/`requires`/`wants_info`
/// references, a `requires` cycle, or any per-container invariant
/// enforced by `Container::new`.
pub struct GraphBuilder {
    environment_name: String,
    add_internal_link_vars: bool,
}

impl GraphBuilder {
    /// Build a `GraphBuilder` tagging constructed containers with
    /// `environment_name` (`MAESTRO_ENVIRONMENT_NAME`) and controlling
    /// whether link-variable synthesis includes `_INTERNAL_PORT` keys.
    #[must_use]
    pub fn new(environment_name: impl Into<String>, add_internal_link_vars: bool) -> Self {
        Self {
            environment_name: environment_name.into(),
            add_internal_link_vars,
        }
    }

    /// Whether this builder's deployment should synthesize
    /// `_INTERNAL_PORT` link variables (§4.2's opt-in flag); callers
    /// pass this through to `Service::link_variables`.
    #[must_use]
    pub fn add_internal_link_vars(&self) -> bool {
        self.add_internal_link_vars
    }

    /// Validate `raw` and construct the full deployment, connecting
    /// every configured ship.
    pub async fn build(&self, raw: RawConfig) -> Result<Deployment> {
        validate_referential_integrity(&raw)?;
        validate_requires_acyclic(&raw)?;
        validate_instance_name_uniqueness(&raw)?;

        let mut ships = HashMap::new();
        for (name, raw_ship) in &raw.ships {
            let ship = connect_ship(name, raw_ship).await?;
            ships.insert(name.clone(), ship);
        }

        let registries = raw
            .registries
            .iter()
            .map(|(name, r)| {
                (
                    name.clone(),
                    RegistryCredentials {
                        registry: r.registry.clone(),
                        username: r.username.clone(),
                        password: r.password.clone(),
                        email: r.email.clone(),
                    },
                )
            })
            .collect();

        let mut services = HashMap::new();
        for (name, raw_service) in &raw.services {
            let mut service = Service::new(name.clone(), raw_service.image.clone(), raw_service.omit);
            let env = flatten_env_map(&raw_service.env);
            service.set_env(env);
            services.insert(name.clone(), service);
        }

        for (name, raw_service) in &raw.services {
            for dep in &raw_service.requires {
                services.get_mut(name).unwrap().add_dependency(dep)?;
                services.get_mut(dep).unwrap().add_dependent(name)?;
            }
            for dep in &raw_service.wants_info {
                services.get_mut(name).unwrap().add_wants_info(dep)?;
            }
        }

        for (service_name, raw_service) in &raw.services {
            for (instance_name, raw_instance) in &raw_service.instances {
                let ship = ships
                    .get(&raw_instance.ship)
                    .ok_or_else(|| {
                        Error::configuration(format!(
                            "instance '{instance_name}': ship '{}' is not configured",
                            raw_instance.ship
                        ))
                    })?
                    .clone();

                let config = build_container_config(
                    instance_name,
                    service_name,
                    raw_instance,
                    raw.schema.schema,
                )?;
                let container = Container::new(
                    config,
                    ship,
                    &raw_service.image,
                    &self.environment_name,
                )?;
                services
                    .get_mut(service_name)
                    .unwrap()
                    .register_container(container)?;
            }
        }

        Ok(Deployment {
            ships,
            services,
            registries,
        })
    }
}

fn flatten_env_map(raw: &HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    raw.iter()
        .map(|(k, v)| (k.clone(), crate::container::flatten_env_value(v)))
        .collect()
}

async fn connect_ship(name: &str, raw: &RawShip) -> Result<Ship> {
    let config = ShipConfig {
        name: name.to_string(),
        ip: raw.ip,
        endpoint: raw.endpoint.clone(),
        docker_port: raw.docker_port,
        socket_path: raw.socket_path.clone(),
        timeout: raw.timeout.map(Duration::from_secs),
        ssh_tunnel: raw.ssh_tunnel.clone(),
        tls: TlsConfig {
            enabled: raw.tls,
            verify: raw.tls_verify,
            ca_cert: raw.tls_ca_cert.as_ref().map(|s| s.clone().into_bytes()),
            cert: raw.tls_cert.as_ref().map(|s| s.clone().into_bytes()),
            key: raw.tls_key.as_ref().map(|s| s.clone().into_bytes()),
        },
    };
    Ship::connect(config).await
}

fn build_container_config(
    instance_name: &str,
    service_name: &str,
    raw: &RawInstance,
    schema: u32,
) -> Result<ContainerConfig> {
    validate_container_name(instance_name)?;

    let mut ports = HashMap::new();
    for (name, value) in &raw.ports {
        ports.insert(name.clone(), crate::container::parse_port_value(value)?);
    }

    let volumes = parse_volumes(&raw.volumes, schema)?;

    let restart_policy = crate::container::parse_restart_policy_value(raw.restart.as_ref())?;

    Ok(ContainerConfig {
        name: instance_name.to_string(),
        service_name: service_name.to_string(),
        image: raw.image.clone(),
        command: raw.command.clone(),
        ports,
        env: flatten_env_map(&raw.env),
        volumes,
        container_volumes: raw.container_volumes.iter().cloned().collect(),
        volumes_from: raw.volumes_from.iter().cloned().collect(),
        links: raw.links.clone(),
        privileged: raw.privileged,
        network_mode: raw.net.clone(),
        pid_mode: raw.pid.clone(),
        restart_policy,
        dns: raw.dns.clone(),
        stop_timeout: raw.stop_timeout.map(Duration::from_secs),
        cpu_shares: raw.limits.cpu,
        mem_limit: raw
            .limits
            .memory
            .as_deref()
            .map(crate::utils::parse_memory)
            .transpose()?,
        memswap_limit: raw
            .limits
            .swap
            .as_deref()
            .map(crate::utils::parse_memory)
            .transpose()?,
        workdir: raw.workdir.clone(),
        lifecycle: raw.lifecycle.clone(),
    })
}

/// Parse the `volumes` map, accounting for the legacy `schema == 1`
/// inversion: the host path is stored under the container-target key.
fn parse_volumes(
    raw: &HashMap<String, serde_json::Value>,
    schema: u32,
) -> Result<HashMap<String, VolumeSpec>> {
    let mut volumes = HashMap::new();
    if schema == 1 {
        for (target, host_value) in raw {
            let host_path = host_value
                .as_str()
                .ok_or_else(|| {
                    Error::configuration(format!(
                        "schema 1 volume entry for target '{target}' must be a host path string"
                    ))
                })?
                .to_string();
            volumes.insert(
                host_path,
                VolumeSpec {
                    target: target.clone(),
                    mode: crate::container::VolumeMode::Rw,
                },
            );
        }
    } else {
        for (host_path, spec_value) in raw {
            volumes.insert(host_path.clone(), crate::container::parse_volume_value(spec_value)?);
        }
    }
    Ok(volumes)
}

fn validate_referential_integrity(raw: &RawConfig) -> Result<()> {
    for (service_name, service) in &raw.services {
        for dep in service.requires.iter().chain(service.wants_info.iter()) {
            if !raw.services.contains_key(dep) {
                return Err(Error::configuration(format!(
                    "service '{service_name}': references unknown service '{dep}'"
                )));
            }
        }
        for instance in service.instances.values() {
            if !raw.ships.contains_key(&instance.ship) {
                return Err(Error::configuration(format!(
                    "service '{service_name}': instance references unknown ship '{}'",
                    instance.ship
                )));
            }
        }
    }
    Ok(())
}

fn validate_requires_acyclic(raw: &RawConfig) -> Result<()> {
    for start in raw.services.keys() {
        let mut visited = HashSet::new();
        let mut stack = vec![start.clone()];
        while let Some(node) = stack.pop() {
            if node != *start && !visited.insert(node.clone()) {
                continue;
            }
            let Some(service) = raw.services.get(&node) else {
                continue;
            };
            for dep in &service.requires {
                if dep == start {
                    return Err(Error::configuration(format!(
                        "service '{start}': 'requires' graph contains a cycle through '{dep}'"
                    )));
                }
                stack.push(dep.clone());
            }
        }
    }
    Ok(())
}

fn validate_instance_name_uniqueness(raw: &RawConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for service in raw.services.values() {
        for instance_name in service.instances.keys() {
            if !seen.insert(instance_name.clone()) {
                return Err(Error::configuration(format!(
                    "instance name '{instance_name}' is used by more than one service"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw_config() -> RawConfig {
        let mut ships = HashMap::new();
        ships.insert(
            "host1".to_string(),
            RawShip {
                ip: "127.0.0.1".parse().unwrap(),
                endpoint: None,
                docker_port: Some(1),
                socket_path: None,
                timeout: Some(1),
                ssh_tunnel: None,
                tls: false,
                tls_verify: false,
                tls_ca_cert: None,
                tls_cert: None,
                tls_key: None,
            },
        );

        let mut instances = HashMap::new();
        instances.insert(
            "web1".to_string(),
            RawInstance {
                ship: "host1".to_string(),
                image: None,
                command: None,
                ports: HashMap::new(),
                env: HashMap::new(),
                volumes: HashMap::new(),
                container_volumes: Vec::new(),
                volumes_from: Vec::new(),
                links: HashMap::new(),
                privileged: false,
                net: None,
                pid: None,
                restart: None,
                dns: Vec::new(),
                stop_timeout: None,
                limits: RawLimits::default(),
                workdir: None,
                lifecycle: HashMap::new(),
            },
        );

        let mut services = HashMap::new();
        services.insert(
            "web".to_string(),
            RawService {
                image: "web:latest".to_string(),
                omit: false,
                env: HashMap::new(),
                requires: Vec::new(),
                wants_info: Vec::new(),
                instances,
            },
        );

        RawConfig {
            ships,
            registries: HashMap::new(),
            services,
            schema: RawSchema::default(),
        }
    }

    #[test]
    fn test_validate_referential_integrity_rejects_unknown_ship() {
        let mut raw = sample_raw_config();
        raw.services
            .get_mut("web")
            .unwrap()
            .instances
            .get_mut("web1")
            .unwrap()
            .ship = "ghost".to_string();
        assert!(validate_referential_integrity(&raw).is_err());
    }

    #[test]
    fn test_validate_requires_acyclic_detects_self_cycle() {
        let mut raw = sample_raw_config();
        raw.services.get_mut("web").unwrap().requires = vec!["web".to_string()];
        assert!(validate_requires_acyclic(&raw).is_err());
    }

    #[test]
    fn test_validate_instance_name_uniqueness_rejects_duplicates() {
        let mut raw = sample_raw_config();
        let mut second_instances = HashMap::new();
        second_instances.insert(
            "web1".to_string(),
            raw.services["web"].instances["web1"].clone(),
        );
        raw.services.insert(
            "web2".to_string(),
            RawService {
                image: "web:latest".to_string(),
                omit: false,
                env: HashMap::new(),
                requires: Vec::new(),
                wants_info: Vec::new(),
                instances: second_instances,
            },
        );
        assert!(validate_instance_name_uniqueness(&raw).is_err());
    }

    #[test]
    fn test_parse_volumes_legacy_schema_inverts_mapping() {
        let mut raw = HashMap::new();
        raw.insert("/data".to_string(), serde_json::json!("/host/data"));
        let volumes = parse_volumes(&raw, 1).unwrap();
        assert_eq!(
            volumes.get("/host/data").map(|v| v.target.as_str()),
            Some("/data")
        );
    }

    #[tokio::test]
    async fn test_graph_builder_builds_sample_config() {
        let raw = sample_raw_config();
        let deployment = GraphBuilder::new("test-env", true).build(raw).await.unwrap();
        assert!(deployment.ships.contains_key("host1"));
        let web = &deployment.services["web"];
        assert!(web.container("web1").is_some());
    }
}
