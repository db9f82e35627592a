//! Lifecycle-check contract (§4.3) and the built-in probe kinds.
//!
//! A probe is an opaque value with one operation, `test()`, that runs
//! synchronously (from the orchestrator's point of view it may block)
//! and returns `false` on any failure. Probes are side-effect-free and
//! safe to invoke concurrently with other probes for the same state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::ship::Ship;

/// The lifecycle-check contract every probe kind satisfies.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Run the check. Returns `false` on any failure, never propagates
    /// an error to the caller — a probe that cannot complete is simply
    /// not satisfied.
    async fn test(&self) -> bool;

    /// Short label for logging.
    fn label(&self) -> String;
}

/// Config shape accepted by `Probe::from_config` (§4.2's
/// `Probe.from_config(container, spec)` factory).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeConfig {
    /// TCP connect check.
    Tcp {
        /// Port to connect to.
        port: u16,
        /// Host to connect to; defaults to the container's ship IP.
        host: Option<IpAddr>,
    },
    /// HTTP GET with a status-class match.
    Http {
        /// URL to request.
        url: String,
        /// Expected status code; any 2xx if omitted.
        expected_status: Option<u16>,
    },
    /// Exec a command inside the container and check its exit code.
    Exec {
        /// Command and arguments to run.
        command: Vec<String>,
        /// Expected exit code; defaults to 0.
        expected_exit_code: Option<i32>,
    },
    /// Always succeeds after sleeping for the given duration.
    Sleep {
        /// Delay in milliseconds.
        duration_ms: u64,
    },
}

/// Build the probe list for one lifecycle state from its config entries.
pub fn build_probes(
    entries: &[ProbeConfig],
    ship: &Ship,
    container_id: Option<String>,
) -> Vec<Box<dyn Probe>> {
    entries
        .iter()
        .map(|cfg| from_config(cfg.clone(), ship, container_id.clone()))
        .collect()
}

/// Construct one probe from its config entry.
pub fn from_config(cfg: ProbeConfig, ship: &Ship, container_id: Option<String>) -> Box<dyn Probe> {
    match cfg {
        ProbeConfig::Tcp { port, host } => Box::new(TcpProbe {
            host: host.unwrap_or(ship.ip()),
            port,
            timeout: Duration::from_secs(1),
        }),
        ProbeConfig::Http {
            url,
            expected_status,
        } => Box::new(HttpProbe {
            url,
            expected_status,
            timeout: Duration::from_secs(5),
        }),
        ProbeConfig::Exec {
            command,
            expected_exit_code,
        } => Box::new(ExecProbe {
            ship: ship.clone(),
            container_id: container_id.unwrap_or_default(),
            command,
            expected_exit_code: expected_exit_code.unwrap_or(0),
        }),
        ProbeConfig::Sleep { duration_ms } => Box::new(SleepProbe {
            duration: Duration::from_millis(duration_ms),
        }),
    }
}

/// TCP connect probe: succeeds iff a connection can be established
/// within the probe's timeout (default 1s).
#[derive(Debug, Clone)]
pub struct TcpProbe {
    /// Host to connect to.
    pub host: IpAddr,
    /// Port to connect to.
    pub port: u16,
    /// Connect timeout.
    pub timeout: Duration,
}

#[async_trait]
impl Probe for TcpProbe {
    async fn test(&self) -> bool {
        let addr = SocketAddr::new(self.host, self.port);
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("tcp probe to {addr} failed: {e}");
                false
            }
            Err(_) => {
                debug!("tcp probe to {addr} timed out");
                false
            }
        }
    }

    fn label(&self) -> String {
        format!("tcp({}:{})", self.host, self.port)
    }
}

/// HTTP GET probe: succeeds iff the response status matches
/// `expected_status`, or falls in the 2xx class if unset.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    /// URL to GET.
    pub url: String,
    /// Expected status code.
    pub expected_status: Option<u16>,
    /// Request timeout.
    pub timeout: Duration,
}

#[async_trait]
impl Probe for HttpProbe {
    async fn test(&self) -> bool {
        let outcome = timeout(self.timeout, crate::transport::http_get_status(&self.url)).await;
        match outcome {
            Ok(Ok(status)) => match self.expected_status {
                Some(expected) => status == expected,
                None => (200..300).contains(&status),
            },
            Ok(Err(e)) => {
                debug!("http probe to {} failed: {e}", self.url);
                false
            }
            Err(_) => {
                debug!("http probe to {} timed out", self.url);
                false
            }
        }
    }

    fn label(&self) -> String {
        format!("http({})", self.url)
    }
}

/// Exec-in-container probe: succeeds iff the command's exit code
/// matches `expected_exit_code` (default 0).
#[derive(Clone)]
pub struct ExecProbe {
    /// Ship the container runs on.
    pub ship: Ship,
    /// Container ID to exec into.
    pub container_id: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Expected exit code.
    pub expected_exit_code: i32,
}

#[async_trait]
impl Probe for ExecProbe {
    async fn test(&self) -> bool {
        match self.ship.exec(&self.container_id, &self.command).await {
            Ok(exit_code) => exit_code == self.expected_exit_code,
            Err(e) => {
                warn!("exec probe on {} failed: {e}", self.container_id);
                false
            }
        }
    }

    fn label(&self) -> String {
        format!("exec({})", self.command.join(" "))
    }
}

/// Always-succeeds probe after a fixed delay. Used to pace fan-out in
/// tests and as a trivial placeholder in configs that only want a delay.
#[derive(Debug, Clone)]
pub struct SleepProbe {
    /// Delay before returning `true`.
    pub duration: Duration,
}

#[async_trait]
impl Probe for SleepProbe {
    async fn test(&self) -> bool {
        tokio::time::sleep(self.duration).await;
        true
    }

    fn label(&self) -> String {
        format!("sleep({:?})", self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_probe_always_succeeds() {
        let probe = SleepProbe {
            duration: Duration::from_millis(1),
        };
        assert!(probe.test().await);
    }

    #[tokio::test]
    async fn test_tcp_probe_connect_refused() {
        // Port 1 is reserved and should refuse connections in any sandbox.
        let probe = TcpProbe {
            host: "127.0.0.1".parse().unwrap(),
            port: 1,
            timeout: Duration::from_millis(200),
        };
        assert!(!probe.test().await);
    }

    #[test]
    fn test_probe_config_deserialize_tcp() {
        let json = r#"{"kind":"tcp","port":8080}"#;
        let cfg: ProbeConfig = serde_json::from_str(json).unwrap();
        match cfg {
            ProbeConfig::Tcp { port, host } => {
                assert_eq!(port, 8080);
                assert!(host.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }
}
