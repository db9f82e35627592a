//! Ship: a single normalized engine client per host (§4.1).
//!
//! Hides transport variation (plain TCP, mutual-TLS TCP, Unix socket,
//! SSH-tunneled TCP) behind one set of typed operations. Cheap to
//! clone — the underlying `EngineTransport` wraps a pooled hyper
//! client, and the image-list cache is shared via an `Arc<Mutex<_>>`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ssh_tunnel::SshTunnel;
use crate::transport::{EngineTransport, TlsMaterial};
use futures_util::Stream;
use http::Method;

const DEFAULT_PLAIN_PORT: u16 = 2375;
const DEFAULT_TLS_PORT: u16 = 2376;
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const ENGINE_API_VERSION: &str = "1.10";

/// SSH tunnel configuration for a Ship (§6 `ssh_tunnel` config block).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshTunnelConfig {
    /// SSH username.
    pub user: String,
    /// PEM-encoded private key.
    pub key: String,
    /// SSH port on the remote host; defaults to 22 if unset (the tunnel
    /// itself always dials port 22 — this field is reserved for future
    /// non-standard SSH ports and currently only validated, not used).
    pub port: Option<u16>,
}

/// TLS configuration for a Ship's engine connection.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable mutual TLS.
    pub enabled: bool,
    /// Verify the server certificate.
    pub verify: bool,
    /// PEM-encoded CA certificate.
    pub ca_cert: Option<Vec<u8>>,
    /// PEM-encoded client certificate.
    pub cert: Option<Vec<u8>>,
    /// PEM-encoded client key.
    pub key: Option<Vec<u8>>,
}

/// Construction parameters for a [`Ship`] (§6 `ships.<name>` config block).
#[derive(Debug, Clone)]
pub struct ShipConfig {
    /// Unique ship name.
    pub name: String,
    /// Reachable address/hostname.
    pub ip: IpAddr,
    /// Address used to contact the engine; defaults to `ip`.
    pub endpoint: Option<String>,
    /// Engine port; defaults to 2375 (plain) / 2376 (TLS).
    pub docker_port: Option<u16>,
    /// Unix socket path, if using a local/mounted socket.
    pub socket_path: Option<String>,
    /// Request timeout; defaults to 5s.
    pub timeout: Option<Duration>,
    /// SSH tunnel configuration, if the engine is reached via tunnel.
    pub ssh_tunnel: Option<SshTunnelConfig>,
    /// TLS configuration.
    pub tls: TlsConfig,
}

/// A container-engine host (§3 `Ship` entity).
#[derive(Clone)]
pub struct Ship {
    name: String,
    ip: IpAddr,
    transport: EngineTransport,
    timeout: Duration,
    tunnel: Option<Arc<Mutex<Option<SshTunnel>>>>,
    image_cache: Arc<Mutex<Option<HashMap<String, String>>>>,
}

impl std::fmt::Debug for Ship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ship")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("transport", &self.transport)
            .finish()
    }
}

/// One entry of `GET /images/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Vec<String>,
}

/// The subset of `GET /containers/<id>/json` this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerStatus {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "State")]
    pub state: ContainerState,
}

/// `State` object nested in a container inspect response.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Running")]
    pub running: bool,
    #[serde(rename = "StartedAt")]
    pub started_at: String,
    #[serde(rename = "FinishedAt")]
    pub finished_at: String,
}

/// Parameters for `POST /containers/create`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateContainerSpec {
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Env")]
    pub env: Vec<String>,
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(rename = "ExposedPorts")]
    pub exposed_ports: HashMap<String, serde_json::Value>,
    #[serde(rename = "Volumes")]
    pub volumes: HashMap<String, serde_json::Value>,
    #[serde(rename = "Memory", skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(rename = "MemorySwap", skip_serializing_if = "Option::is_none")]
    pub memswap: Option<i64>,
    #[serde(rename = "CpuShares", skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,
}

/// Parameters for `POST /containers/<id>/start`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartSpec {
    #[serde(rename = "Binds")]
    pub binds: Vec<String>,
    #[serde(rename = "PortBindings")]
    pub port_bindings: HashMap<String, Vec<HashMap<String, String>>>,
    #[serde(rename = "Privileged")]
    pub privileged: bool,
    #[serde(rename = "NetworkMode", skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(rename = "PidMode", skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(rename = "RestartPolicy")]
    pub restart_policy: RestartPolicyWire,
    #[serde(rename = "Dns")]
    pub dns: Vec<String>,
    #[serde(rename = "Links")]
    pub links: Vec<String>,
    #[serde(rename = "VolumesFrom")]
    pub volumes_from: Vec<String>,
}

/// Wire shape of a restart policy in `start`'s body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestartPolicyWire {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MaximumRetryCount")]
    pub max_retries: u32,
}

#[derive(Debug, Serialize)]
struct AuthPayload<'a> {
    #[serde(rename = "username")]
    username: &'a str,
    #[serde(rename = "password")]
    password: &'a str,
    #[serde(rename = "email", skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(rename = "serveraddress")]
    serveraddress: &'a str,
}

impl Ship {
    /// Build a Ship from config, resolving its endpoint per §4.1's
    /// priority rules (SSH tunnel > Unix socket > plain/TLS TCP) and
    /// opening the tunnel eagerly if configured.
    pub async fn connect(config: ShipConfig) -> Result<Self> {
        let timeout = config
            .timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.ip.to_string());

        let (transport, tunnel) = if let Some(ssh) = &config.ssh_tunnel {
            if ssh.user.is_empty() || ssh.key.is_empty() {
                return Err(Error::configuration(format!(
                    "ship '{}': ssh_tunnel requires both 'user' and 'key'",
                    config.name
                )));
            }
            let docker_port = config.docker_port.unwrap_or(if config.tls.enabled {
                DEFAULT_TLS_PORT
            } else {
                DEFAULT_PLAIN_PORT
            });

            info!(ship = %config.name, "opening ssh tunnel to {endpoint}:{docker_port}");
            let tunnel = SshTunnel::open(&endpoint, &ssh.user, &ssh.key, &endpoint, docker_port)
                .await
                .map_err(|e| {
                    Error::configuration(format!("ship '{}': {e}", config.name))
                })?;
            let local_port = tunnel.local_port();
            let base = tunneled_base(config.tls.enabled, local_port);
            let transport = build_tcp_transport(&base, &config.tls)?;
            (transport, Some(Arc::new(Mutex::new(Some(tunnel)))))
        } else if let Some(path) = &config.socket_path {
            let resolved = std::fs::canonicalize(Path::new(path))
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| path.clone());
            (EngineTransport::unix(resolved), None)
        } else {
            let docker_port = config.docker_port.unwrap_or(if config.tls.enabled {
                DEFAULT_TLS_PORT
            } else {
                DEFAULT_PLAIN_PORT
            });
            let scheme = if config.tls.enabled { "https" } else { "http" };
            let base = format!("{scheme}://{endpoint}:{docker_port}");
            (build_tcp_transport(&base, &config.tls)?, None)
        };

        debug!(ship = %config.name, transport = ?transport, "ship transport resolved");

        Ok(Self {
            name: config.name,
            ip: config.ip,
            transport,
            timeout,
            tunnel,
            image_cache: Arc::new(Mutex::new(None)),
        })
    }

    /// Unique ship name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reachable address (not necessarily the engine endpoint).
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    fn endpoint(&self, path: &str) -> String {
        format!("/v{ENGINE_API_VERSION}{path}")
    }

    /// Issue a request, mapping a transport-level failure (connection
    /// refused, DNS failure, timeout) to `TransientHostError` — the
    /// per-task, non-fatal-to-peers failure mode from §4.1.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<(http::StatusCode, Vec<u8>)> {
        self.transport
            .request(method, path, body, timeout)
            .await
            .map_err(|e| Error::transient_host(&self.name, e.to_string()))
    }

    /// `GET /images/json`, optionally filtered by repository.
    pub async fn images(&self, repo: Option<&str>) -> Result<Vec<ImageRecord>> {
        let path = match repo {
            Some(r) => {
                let filters = serde_json::json!({ "reference": [r] }).to_string();
                format!(
                    "/images/json?filters={}",
                    urlencoding_encode(&filters)
                )
            }
            None => "/images/json".to_string(),
        };
        self.get_json(&path).await
    }

    /// Normalized `repo:tag -> image ID` catalog. Skips the placeholder
    /// `<none>:<none>` repo-tag entry (resolved Open Question, see
    /// DESIGN.md).
    pub async fn image_ids(&self) -> Result<HashMap<String, String>> {
        {
            let cached = self.image_cache.lock().await;
            if let Some(map) = cached.as_ref() {
                return Ok(map.clone());
            }
        }

        let images = self.images(None).await?;
        let mut map = HashMap::new();
        for image in images {
            for tag in image.repo_tags {
                if tag == "<none>:<none>" {
                    continue;
                }
                map.insert(tag, image.id.clone());
            }
        }

        let mut cached = self.image_cache.lock().await;
        *cached = Some(map.clone());
        Ok(map)
    }

    /// Drop the cached image catalog, forcing the next `image_ids` call
    /// to re-fetch.
    pub async fn invalidate_image_cache(&self) {
        let mut cached = self.image_cache.lock().await;
        *cached = None;
    }

    /// `GET /containers/<id>/json`. A 404 is treated as "not found",
    /// not an error (§4.1 failure mode).
    pub async fn inspect_container(&self, id: &str) -> Result<Option<ContainerStatus>> {
        let path = self.endpoint(&format!("/containers/{id}/json"));
        let (status, bytes) = self.call(Method::GET, &path, None, self.timeout).await?;
        if status == http::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::transient_host(
                &self.name,
                format!("inspect_container({id}) returned {status}"),
            ));
        }
        serde_json::from_slice(&bytes).map(Some).map_err(Error::from)
    }

    /// `POST /containers/create`, returning the new container's ID.
    pub async fn create_container(&self, name: &str, spec: &CreateContainerSpec) -> Result<String> {
        let path = self.endpoint(&format!("/containers/create?name={name}"));
        let body = serde_json::to_vec(spec)?;
        #[derive(Deserialize)]
        struct CreateResponse {
            #[serde(rename = "Id")]
            id: String,
        }
        let resp: CreateResponse = self
            .transport
            .request_json(Method::POST, &path, Some(body), self.timeout)
            .await?;
        Ok(resp.id)
    }

    /// `POST /containers/<id>/start`.
    pub async fn start(&self, id: &str, spec: &StartSpec) -> Result<()> {
        let path = self.endpoint(&format!("/containers/{id}/start"));
        let body = serde_json::to_vec(spec)?;
        let (status, bytes) = self
            .call(Method::POST, &path, Some(body), self.timeout)
            .await?;
        if !status.is_success() && status != http::StatusCode::NOT_MODIFIED {
            return Err(crate::transport::engine_error(status, &bytes));
        }
        Ok(())
    }

    /// `POST /containers/<id>/stop?t=<timeout>`.
    pub async fn stop(&self, id: &str, stop_timeout: Duration) -> Result<()> {
        let path = self.endpoint(&format!(
            "/containers/{id}/stop?t={}",
            stop_timeout.as_secs()
        ));
        let (status, bytes) = self
            .call(Method::POST, &path, None, self.timeout + stop_timeout)
            .await?;
        if !status.is_success() && status != http::StatusCode::NOT_MODIFIED {
            return Err(crate::transport::engine_error(status, &bytes));
        }
        Ok(())
    }

    /// `DELETE /containers/<id>?v=<remove_volumes>`.
    pub async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let path = self.endpoint(&format!(
            "/containers/{id}?v={}",
            u8::from(remove_volumes)
        ));
        let (status, bytes) = self.call(Method::DELETE, &path, None, self.timeout).await?;
        if !status.is_success() {
            return Err(crate::transport::engine_error(status, &bytes));
        }
        self.invalidate_image_cache().await;
        Ok(())
    }

    /// `POST /images/create`, streaming NDJSON pull-progress events.
    pub fn pull(
        &self,
        image: &str,
        tag: &str,
        insecure: bool,
    ) -> impl Stream<Item = Result<serde_json::Value>> + Send + 'static {
        let scheme_note = if insecure { "http" } else { "https" };
        debug!(%image, %tag, registry_scheme = scheme_note, "pulling image");
        let path = self.endpoint(&format!(
            "/images/create?fromImage={}&tag={}",
            urlencoding_encode(image),
            urlencoding_encode(tag)
        ));
        self.transport.stream_ndjson(path, None)
    }

    /// `POST /auth`.
    pub async fn login(
        &self,
        registry: &str,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<()> {
        let path = self.endpoint("/auth");
        let payload = AuthPayload {
            username,
            password,
            email,
            serveraddress: registry,
        };
        let body = serde_json::to_vec(&payload)?;
        let (status, bytes) = self
            .transport
            .request(Method::POST, &path, Some(body), self.timeout)
            .await?;
        if !status.is_success() {
            return Err(Error::orchestration(format!(
                "login to {registry} failed: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(())
    }

    /// `GET /containers/<id>/logs?stdout=1&stderr=1&tail=<tail>`.
    pub async fn logs(&self, id: &str, tail: usize) -> Result<Vec<u8>> {
        let path = self.endpoint(&format!(
            "/containers/{id}/logs?stdout=1&stderr=1&tail={tail}"
        ));
        let (status, bytes) = self.call(Method::GET, &path, None, self.timeout).await?;
        if !status.is_success() {
            return Err(crate::transport::engine_error(status, &bytes));
        }
        Ok(bytes)
    }

    /// Exec a command inside a container and wait for its exit code.
    ///
    /// Used by the exec lifecycle probe (§4.3); not part of the core
    /// StartTask/StopTask sequence.
    pub async fn exec(&self, id: &str, command: &[String]) -> Result<i32> {
        #[derive(Serialize)]
        struct ExecCreate<'a> {
            #[serde(rename = "Cmd")]
            cmd: &'a [String],
            #[serde(rename = "AttachStdout")]
            attach_stdout: bool,
            #[serde(rename = "AttachStderr")]
            attach_stderr: bool,
        }
        #[derive(Deserialize)]
        struct ExecCreateResponse {
            #[serde(rename = "Id")]
            id: String,
        }

        let create_path = self.endpoint(&format!("/containers/{id}/exec"));
        let create_body = serde_json::to_vec(&ExecCreate {
            cmd: command,
            attach_stdout: true,
            attach_stderr: true,
        })?;
        let created: ExecCreateResponse = self
            .transport
            .request_json(Method::POST, &create_path, Some(create_body), self.timeout)
            .await?;

        let start_path = self.endpoint(&format!("/exec/{}/start", created.id));
        let start_body = serde_json::to_vec(&serde_json::json!({ "Detach": false, "Tty": false }))?;
        self.transport
            .request(Method::POST, &start_path, Some(start_body), self.timeout)
            .await?;

        #[derive(Deserialize)]
        struct ExecInspect {
            #[serde(rename = "ExitCode")]
            exit_code: Option<i32>,
        }
        let inspect_path = self.endpoint(&format!("/exec/{}/json", created.id));
        let inspect: ExecInspect = self
            .transport
            .request_json(Method::GET, &inspect_path, None, self.timeout)
            .await?;
        Ok(inspect.exit_code.unwrap_or(-1))
    }

    /// Tear down the Ship's SSH tunnel, if any. A no-op for the other
    /// transports.
    pub async fn shutdown(&self) {
        if let Some(tunnel) = &self.tunnel {
            let mut slot = tunnel.lock().await;
            if let Some(tunnel) = slot.take() {
                tunnel.shutdown().await;
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let full_path = self.endpoint(path);
        let (status, bytes) = self.call(Method::GET, &full_path, None, self.timeout).await?;
        if !status.is_success() {
            return Err(Error::transient_host(
                &self.name,
                crate::transport::engine_error(status, &bytes).to_string(),
            ));
        }
        serde_json::from_slice(&bytes).map_err(Error::from)
    }
}

fn tunneled_base(tls_enabled: bool, local_port: u16) -> String {
    let scheme = if tls_enabled { "https" } else { "http" };
    format!("{scheme}://localhost:{local_port}")
}

fn build_tcp_transport(base: &str, tls: &TlsConfig) -> Result<EngineTransport> {
    if !tls.enabled {
        return Ok(EngineTransport::tcp(base));
    }
    let material = TlsMaterial {
        ca_cert: tls.ca_cert.clone(),
        client_cert: tls
            .cert
            .clone()
            .ok_or_else(|| Error::configuration("tls enabled but tls_cert is missing"))?,
        client_key: tls
            .key
            .clone()
            .ok_or_else(|| Error::configuration("tls enabled but tls_key is missing"))?,
        verify: tls.verify,
    };
    EngineTransport::tls(base, &material)
}

fn urlencoding_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ids_skips_none_placeholder() {
        let images = vec![
            ImageRecord {
                id: "sha256:a".to_string(),
                repo_tags: vec!["<none>:<none>".to_string()],
            },
            ImageRecord {
                id: "sha256:b".to_string(),
                repo_tags: vec!["web:latest".to_string()],
            },
        ];
        let mut map = HashMap::new();
        for image in images {
            for tag in image.repo_tags {
                if tag == "<none>:<none>" {
                    continue;
                }
                map.insert(tag, image.id.clone());
            }
        }
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("web:latest"), Some(&"sha256:b".to_string()));
    }

    #[test]
    fn test_tunneled_base_scheme() {
        assert_eq!(tunneled_base(false, 12345), "http://localhost:12345");
        assert_eq!(tunneled_base(true, 12345), "https://localhost:12345");
    }

    #[test]
    fn test_urlencoding_encode_reserved_chars() {
        assert_eq!(urlencoding_encode("a/b c"), "a%2Fb%20c");
        assert_eq!(urlencoding_encode("web:latest"), "web%3Alatest");
    }
}
