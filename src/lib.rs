//! # fleetship
//!
//! Orchestrates fleets of application containers across a set of remote
//! container-engine hosts: given a declarative deployment description
//! (services, their images and configuration, the hosts that run
//! instances of them, and dependency relations between services), it
//! drives the remote engines to bring the deployment into the desired
//! state — containers created, started, pulled, stopped, restarted, or
//! removed — with health gating at each step.
//!
//! ## Architecture
//!
//! - [`ship`] — one normalized engine client per host (TCP, mutual-TLS,
//!   Unix socket, SSH-tunneled TCP).
//! - [`service`] and [`container`] — the typed entity graph: services
//!   group container instances, derive dependency closures, and
//!   synthesize link variables for dependents.
//! - [`lifecycle`] — the probe contract (`Probe::test`) and built-in
//!   TCP/HTTP/exec/sleep probe kinds.
//! - [`task`] — the per-container lifecycle tasks (status, start, stop,
//!   restart, pull, login, remove) built on two shared polling
//!   primitives.
//! - [`config`] — configuration intake: schema validation against the
//!   entity graph's invariants, then construction.
//! - [`progress`] — the narrow output-sink interface tasks report through.
//!
//! Control flow (picking an execution order over services, dispatching
//! tasks, retrying) is external to this crate; it exposes the primitives.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub use config::{
    Deployment, GraphBuilder, RawConfig, RawInstance, RawLimits, RawRegistry, RawSchema,
    RawService, RawShip,
};
pub use container::{Container, ContainerConfig, VolumeMode, VolumeSpec};
pub use error::{Error, Result};
pub use lifecycle::{Probe, ProbeConfig};
pub use progress::{NullSink, OutputSink, RecordingSink};
pub use service::Service;
pub use ship::{Ship, ShipConfig, SshTunnelConfig, TlsConfig};
pub use task::{
    LoginTask, PullProgress, PullTask, RegistryCredentials, RemoveOutcome, RemoveTask,
    RestartTask, StartTask, StatusReport, StatusTask, StopTask,
};
pub use types::{PortNumber, PortSpec, Protocol, RestartPolicy};

pub mod config;
pub mod container;
pub mod error;
pub mod lifecycle;
pub mod progress;
pub mod service;
pub mod ship;
mod ssh_tunnel;
pub mod task;
mod transport;
pub mod types;
pub mod utils;

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine API version string this crate is pinned to (§9 design note:
/// do not silently bump without updating the status-field lookups in
/// [`ship::ContainerState`]).
pub const ENGINE_API_VERSION: &str = "1.10";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_engine_api_version_pinned() {
        assert_eq!(ENGINE_API_VERSION, "1.10");
    }
}
