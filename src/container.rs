//! Container: one running (or intended-running) instance of a Service
//! on a Ship (§3, §4.2 configuration normalization).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::lifecycle::{build_probes, Probe, ProbeConfig};
use crate::ship::{ContainerStatus, Ship};
use crate::types::{PortNumber, PortSpec, Protocol, RestartPolicy};
use crate::utils::{parse_memory, parse_restart_policy_str};

const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// A host-bind mount's target and mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Path inside the container.
    pub target: String,
    /// Read-write or read-only.
    pub mode: VolumeMode,
}

/// Mount mode for a bind volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    /// Read-write.
    Rw,
    /// Read-only.
    Ro,
}

impl std::fmt::Display for VolumeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rw => write!(f, "rw"),
            Self::Ro => write!(f, "ro"),
        }
    }
}

/// Normalized construction parameters for a [`Container`], already
/// past the heterogeneous-JSON parsing stage (that lives in
/// `config::GraphBuilder`).
pub struct ContainerConfig {
    /// Unique instance name across the whole deployment.
    pub name: String,
    /// Owning service's name.
    pub service_name: String,
    /// Image reference; falls back to the service's image when `None`.
    pub image: Option<String>,
    /// Command override.
    pub command: Option<Vec<String>>,
    /// Named ports.
    pub ports: HashMap<String, PortSpec>,
    /// Base env from the service, overlaid with instance env (already
    /// merged by the caller — synthetic keys are added by `Container::new`).
    pub env: HashMap<String, String>,
    /// Host path -> bind spec.
    pub volumes: HashMap<String, VolumeSpec>,
    /// Container-internal paths with no host binding.
    pub container_volumes: HashSet<String>,
    /// Other container instance names whose volumes are mounted.
    pub volumes_from: HashSet<String>,
    /// Container name -> alias.
    pub links: HashMap<String, String>,
    /// Run the container in privileged mode.
    pub privileged: bool,
    /// Network mode override.
    pub network_mode: Option<String>,
    /// PID namespace mode override.
    pub pid_mode: Option<String>,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
    /// DNS servers.
    pub dns: Vec<String>,
    /// Stop timeout; defaults to 10s.
    pub stop_timeout: Option<Duration>,
    /// CPU shares.
    pub cpu_shares: Option<u64>,
    /// Memory limit in bytes.
    pub mem_limit: Option<u64>,
    /// Memory+swap limit in bytes.
    pub memswap_limit: Option<u64>,
    /// Working directory override.
    pub workdir: Option<String>,
    /// Lifecycle probe configs, per state name (`"running"`, `"stopped"`).
    pub lifecycle: HashMap<String, Vec<ProbeConfig>>,
}

/// One running (or intended-running) container instance (§3 `Container`).
pub struct Container {
    name: String,
    service_name: String,
    ship: Ship,
    image: String,
    command: Option<Vec<String>>,
    ports: HashMap<String, PortSpec>,
    env: HashMap<String, String>,
    volumes: HashMap<String, VolumeSpec>,
    container_volumes: HashSet<String>,
    volumes_from: HashSet<String>,
    links: HashMap<String, String>,
    privileged: bool,
    network_mode: Option<String>,
    pid_mode: Option<String>,
    restart_policy: RestartPolicy,
    dns: Vec<String>,
    stop_timeout: Duration,
    cpu_shares: Option<u64>,
    mem_limit: Option<u64>,
    memswap_limit: Option<u64>,
    workdir: Option<String>,
    lifecycle: HashMap<String, Vec<Box<dyn Probe>>>,
    cached_status: Arc<Mutex<Option<ContainerStatus>>>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("service_name", &self.service_name)
            .field("image", &self.image)
            .finish()
    }
}

/// The six synthetic env keys always present on a Container (invariant 6).
pub const SYNTHETIC_ENV_KEYS: [&str; 6] = [
    "MAESTRO_ENVIRONMENT_NAME",
    "SERVICE_NAME",
    "CONTAINER_NAME",
    "CONTAINER_HOST_ADDRESS",
    "DOCKER_IMAGE",
    "DOCKER_TAG",
];

impl Container {
    /// Build a Container, validating invariant 3 (container_volumes and
    /// volumes bind-targets are disjoint), invariant 4 (port protocol
    /// agreement, already enforced by `PortSpec::protocols_agree`), and
    /// injecting synthetic env.
    pub fn new(config: ContainerConfig, ship: Ship, service_image: &str, environment_name: &str) -> Result<Self> {
        for port in config.ports.values() {
            if !port.protocols_agree() {
                return Err(Error::configuration(format!(
                    "container '{}': port '{}' exposed/external protocol mismatch",
                    config.name, port.exposed
                )));
            }
        }

        for volume in config.volumes.values() {
            if config.container_volumes.contains(&volume.target) {
                return Err(Error::configuration(format!(
                    "container '{}': volume target '{}' conflicts with a container_volumes entry",
                    config.name, volume.target
                )));
            }
        }

        if !RestartPolicy::is_valid_name(&config.restart_policy.name) {
            return Err(Error::configuration(format!(
                "container '{}': invalid restart policy name '{}'",
                config.name, config.restart_policy.name
            )));
        }

        let image = config.image.unwrap_or_else(|| service_image.to_string());
        let (_, tag) = split_image_tag(&image);

        let mut env = config.env;
        env.insert(
            "MAESTRO_ENVIRONMENT_NAME".to_string(),
            environment_name.to_string(),
        );
        env.insert("SERVICE_NAME".to_string(), config.service_name.clone());
        env.insert("CONTAINER_NAME".to_string(), config.name.clone());
        env.insert("CONTAINER_HOST_ADDRESS".to_string(), ship.ip().to_string());
        env.insert("DOCKER_IMAGE".to_string(), image.clone());
        env.insert("DOCKER_TAG".to_string(), tag);

        let lifecycle = config
            .lifecycle
            .into_iter()
            .map(|(state, probes)| {
                let built = build_probes(&probes, &ship, Some(config.name.clone()));
                (state, built)
            })
            .collect();

        Ok(Self {
            name: config.name,
            service_name: config.service_name,
            ship,
            image,
            command: config.command,
            ports: config.ports,
            env,
            volumes: config.volumes,
            container_volumes: config.container_volumes,
            volumes_from: config.volumes_from,
            links: config.links,
            privileged: config.privileged,
            network_mode: config.network_mode,
            pid_mode: config.pid_mode,
            restart_policy: config.restart_policy,
            dns: config.dns,
            stop_timeout: config
                .stop_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS)),
            cpu_shares: config.cpu_shares,
            mem_limit: config.mem_limit,
            memswap_limit: config.memswap_limit,
            workdir: config.workdir,
            lifecycle,
            cached_status: Arc::new(Mutex::new(None)),
        })
    }

    /// Instance name, unique across the whole deployment.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning service.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The Ship this instance runs on.
    #[must_use]
    pub fn ship(&self) -> &Ship {
        &self.ship
    }

    /// Resolved image reference (instance override or service default).
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Command override, if any.
    #[must_use]
    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    /// Named ports.
    #[must_use]
    pub fn ports(&self) -> &HashMap<String, PortSpec> {
        &self.ports
    }

    /// Full env (service env, instance overrides, synthetic keys).
    #[must_use]
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Host-bind volumes.
    #[must_use]
    pub fn volumes(&self) -> &HashMap<String, VolumeSpec> {
        &self.volumes
    }

    /// Container-internal paths with no host binding.
    #[must_use]
    pub fn container_volumes(&self) -> &HashSet<String> {
        &self.container_volumes
    }

    /// Other container instance names whose volumes are mounted.
    #[must_use]
    pub fn volumes_from(&self) -> &HashSet<String> {
        &self.volumes_from
    }

    /// Container name -> alias link map.
    #[must_use]
    pub fn links(&self) -> &HashMap<String, String> {
        &self.links
    }

    /// Whether the container runs privileged.
    #[must_use]
    pub fn privileged(&self) -> bool {
        self.privileged
    }

    /// Network mode override.
    #[must_use]
    pub fn network_mode(&self) -> Option<&str> {
        self.network_mode.as_deref()
    }

    /// PID namespace mode override.
    #[must_use]
    pub fn pid_mode(&self) -> Option<&str> {
        self.pid_mode.as_deref()
    }

    /// Restart policy.
    #[must_use]
    pub fn restart_policy(&self) -> &RestartPolicy {
        &self.restart_policy
    }

    /// DNS servers.
    #[must_use]
    pub fn dns(&self) -> &[String] {
        &self.dns
    }

    /// Stop timeout.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// CPU shares.
    #[must_use]
    pub fn cpu_shares(&self) -> Option<u64> {
        self.cpu_shares
    }

    /// Memory limit in bytes.
    #[must_use]
    pub fn mem_limit(&self) -> Option<u64> {
        self.mem_limit
    }

    /// Memory+swap limit in bytes.
    #[must_use]
    pub fn memswap_limit(&self) -> Option<u64> {
        self.memswap_limit
    }

    /// Working directory override.
    #[must_use]
    pub fn workdir(&self) -> Option<&str> {
        self.workdir.as_deref()
    }

    /// Lifecycle probes declared for a state (`"running"` or `"stopped"`).
    #[must_use]
    pub fn probes_for(&self, state: &str) -> &[Box<dyn Probe>] {
        self.lifecycle
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Most recent cached inspect result, if any has been fetched.
    pub async fn cached_status(&self) -> Option<ContainerStatus> {
        self.cached_status.lock().await.clone()
    }

    /// Re-fetch the container's status from the engine and cache it.
    pub async fn refresh_status(&self) -> Result<Option<ContainerStatus>> {
        let status = self.ship.inspect_container(&self.name).await?;
        let mut cached = self.cached_status.lock().await;
        *cached = status.clone();
        Ok(status)
    }
}

impl Clone for ContainerStatus {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            image: self.image.clone(),
            state: self.state.clone(),
        }
    }
}

/// Parse a port value in any of the three shapes documented in §4.2
/// (S2): plain int, `"<ext>[/proto][:<exp>[/proto]]"` string, or
/// `{exposed, external}` object.
pub fn parse_port_value(value: &serde_json::Value) -> Result<PortSpec> {
    match value {
        serde_json::Value::Number(n) => {
            let port = n
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| Error::configuration(format!("invalid port number '{n}'")))?;
            let number = PortNumber {
                number: port,
                protocol: Protocol::Tcp,
            };
            Ok(PortSpec {
                exposed: number.clone(),
                external: ("0.0.0.0".to_string(), number),
            })
        }
        serde_json::Value::String(s) => parse_port_string(s),
        serde_json::Value::Object(map) => {
            let external_value = map
                .get("external")
                .ok_or_else(|| Error::configuration("port object missing 'external'"))?;
            let exposed_value = map.get("exposed");

            let external = parse_external_value(external_value)?;
            let exposed = match exposed_value {
                Some(v) => parse_port_number_value(v)?,
                None => external.1.clone(),
            };
            Ok(PortSpec { exposed, external })
        }
        other => Err(Error::configuration(format!(
            "invalid port spec shape: {other}"
        ))),
    }
}

fn parse_port_string(s: &str) -> Result<PortSpec> {
    let (ext_part, exp_part) = match s.split_once(':') {
        Some((e, x)) => (e, Some(x)),
        None => (s, None),
    };
    let external = PortNumber::parse(ext_part)?;
    let exposed = match exp_part {
        Some(x) => PortNumber::parse(x)?,
        None => external.clone(),
    };
    let spec = PortSpec {
        exposed,
        external: ("0.0.0.0".to_string(), external),
    };
    if !spec.protocols_agree() {
        return Err(Error::configuration(format!(
            "port spec '{s}': exposed/external protocol mismatch"
        )));
    }
    Ok(spec)
}

fn parse_port_number_value(value: &serde_json::Value) -> Result<PortNumber> {
    match value {
        serde_json::Value::Number(n) => {
            let port = n
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| Error::configuration(format!("invalid port number '{n}'")))?;
            Ok(PortNumber {
                number: port,
                protocol: Protocol::Tcp,
            })
        }
        serde_json::Value::String(s) => PortNumber::parse(s),
        other => Err(Error::configuration(format!(
            "invalid port number shape: {other}"
        ))),
    }
}

fn parse_external_value(value: &serde_json::Value) -> Result<(String, PortNumber)> {
    match value {
        serde_json::Value::Array(pair) if pair.len() == 2 => {
            let ip = pair[0]
                .as_str()
                .ok_or_else(|| Error::configuration("external (ip, port) pair: ip must be a string"))?
                .to_string();
            let port = parse_port_number_value(&pair[1])?;
            Ok((ip, port))
        }
        other => {
            let port = parse_port_number_value(other)?;
            Ok(("0.0.0.0".to_string(), port))
        }
    }
}

/// Parse a volume value: a bare string (container target, read-write)
/// or `{target, mode}`.
pub fn parse_volume_value(value: &serde_json::Value) -> Result<VolumeSpec> {
    match value {
        serde_json::Value::String(target) => Ok(VolumeSpec {
            target: target.clone(),
            mode: VolumeMode::Rw,
        }),
        serde_json::Value::Object(map) => {
            let target = map
                .get("target")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::configuration("volume object missing 'target'"))?
                .to_string();
            let mode = match map.get("mode").and_then(|v| v.as_str()) {
                Some("rw") | None => VolumeMode::Rw,
                Some("ro") => VolumeMode::Ro,
                Some(other) => {
                    return Err(Error::configuration(format!(
                        "invalid volume mode '{other}' (expected rw or ro)"
                    )))
                }
            };
            Ok(VolumeSpec { target, mode })
        }
        other => Err(Error::configuration(format!(
            "invalid volume spec shape: {other}"
        ))),
    }
}

/// Parse a restart policy value: `"name[:retries]"` string or
/// `{name, retries}` object (S1).
pub fn parse_restart_policy_value(value: Option<&serde_json::Value>) -> Result<RestartPolicy> {
    match value {
        None => Ok(RestartPolicy::none()),
        Some(serde_json::Value::String(s)) => parse_restart_policy_str(s),
        Some(serde_json::Value::Object(map)) => {
            let name = map
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::configuration("restart policy object missing 'name'"))?;
            if !RestartPolicy::is_valid_name(name) {
                return Err(Error::configuration(format!(
                    "unknown restart policy '{name}'"
                )));
            }
            let max_retries = map
                .get("retries")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32;
            Ok(RestartPolicy {
                name: name.to_string(),
                max_retries,
            })
        }
        Some(other) => Err(Error::configuration(format!(
            "invalid restart policy shape: {other}"
        ))),
    }
}

/// Parse a memory-limit value (string, with validation delegated to
/// `utils::parse_memory`).
pub fn parse_memory_value(value: Option<&serde_json::Value>) -> Result<Option<u64>> {
    match value {
        None => Ok(None),
        Some(serde_json::Value::String(s)) => parse_memory(s).map(Some),
        Some(serde_json::Value::Number(n)) => Ok(n.as_u64()),
        Some(other) => Err(Error::configuration(format!(
            "invalid memory limit shape: {other}"
        ))),
    }
}

/// Recursively flatten a JSON env value to a string: scalars render via
/// their natural string form, arrays are joined with a single space
/// (recursively, so nested arrays flatten too).
pub fn flatten_env_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(flatten_env_value)
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Object(_) => value.to_string(),
    }
}

fn split_image_tag(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        // A ':' before the last '/' is a registry port, not a tag (e.g. "host:5000/repo").
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_port_int() {
        let spec = parse_port_value(&json!(80)).unwrap();
        assert_eq!(spec.exposed.to_string(), "80/tcp");
        assert_eq!(spec.external.0, "0.0.0.0");
        assert_eq!(spec.external.1.to_string(), "80/tcp");
    }

    #[test]
    fn test_parse_port_string_with_mapping() {
        let spec = parse_port_value(&json!("80:8080/tcp")).unwrap();
        assert_eq!(spec.exposed.to_string(), "80/tcp");
        assert_eq!(spec.external.1.to_string(), "8080/tcp");
    }

    #[test]
    fn test_parse_port_string_protocol_mismatch() {
        assert!(parse_port_value(&json!("80/tcp:8080/udp")).is_err());
    }

    #[test]
    fn test_parse_volume_string() {
        let spec = parse_volume_value(&json!("/data")).unwrap();
        assert_eq!(spec.target, "/data");
        assert_eq!(spec.mode, VolumeMode::Rw);
    }

    #[test]
    fn test_parse_volume_object_ro() {
        let spec = parse_volume_value(&json!({"target": "/data", "mode": "ro"})).unwrap();
        assert_eq!(spec.mode, VolumeMode::Ro);
    }

    #[test]
    fn test_parse_restart_policy_string_and_object() {
        let p = parse_restart_policy_value(Some(&json!("on-failure:3"))).unwrap();
        assert_eq!(p.name, "on-failure");
        assert_eq!(p.max_retries, 3);

        let p = parse_restart_policy_value(Some(&json!({"name": "always"}))).unwrap();
        assert_eq!(p.name, "always");
        assert_eq!(p.max_retries, 0);

        assert!(parse_restart_policy_value(Some(&json!("bogus"))).is_err());

        let p = parse_restart_policy_value(None).unwrap();
        assert_eq!(p, RestartPolicy::none());
    }

    #[test]
    fn test_flatten_env_value_nested_arrays() {
        let value = json!(["a", ["b", "c"], "d"]);
        assert_eq!(flatten_env_value(&value), "a b c d");
    }

    #[test]
    fn test_split_image_tag() {
        assert_eq!(split_image_tag("web:1.2"), ("web".to_string(), "1.2".to_string()));
        assert_eq!(
            split_image_tag("registry.internal:5000/web"),
            ("registry.internal:5000/web".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image_tag("web"),
            ("web".to_string(), "latest".to_string())
        );
    }
}
