//! SSH-tunneled TCP transport (§4.1, endpoint resolution priority 1).
//!
//! A single long-lived SSH session opens one direct-TCP/IP forwarding
//! channel per local connection accepted on an ephemeral local port,
//! relaying bytes to `<remote_host>:<remote_port>` on the far side. The
//! engine then talks plain TCP (or mutual-TLS TCP) to `localhost:<local
//! port>`, same as any other TCP-backed Ship.

use russh::client::{Config, Handle, Handler};
use russh_keys::key::PublicKey;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A background SSH tunnel forwarding a local ephemeral port to a
/// remote `host:port` over one SSH session.
///
/// Dropping (or calling [`SshTunnel::shutdown`]) closes the listener and
/// the SSH session. In-flight forwarded connections are not drained.
pub struct SshTunnel {
    local_port: u16,
    accept_task: JoinHandle<()>,
    session: Arc<tokio::sync::Mutex<Handle<TunnelHandler>>>,
}

impl SshTunnel {
    /// Open a tunnel: connect to `ssh_host:22` as `user` authenticating
    /// with the private key `key_pem` (PEM, no passphrase support),
    /// bind an OS-chosen local port, and forward accepted connections to
    /// `remote_host:remote_port` on the far side.
    pub async fn open(
        ssh_host: &str,
        user: &str,
        key_pem: &str,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self> {
        let config = Arc::new(Config::default());
        let addr = format!("{ssh_host}:22");
        let mut session =
            russh::client::connect(config, addr.clone(), TunnelHandler)
                .await
                .map_err(|e| Error::configuration(format!("ssh connect to {addr} failed: {e}")))?;

        let key_pair = russh_keys::decode_secret_key(key_pem, None)
            .map_err(|e| Error::configuration(format!("invalid ssh private key: {e}")))?;

        let authenticated = session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| Error::configuration(format!("ssh auth failed for {user}@{ssh_host}: {e}")))?;
        if !authenticated {
            return Err(Error::configuration(format!(
                "ssh key authentication rejected for {user}@{ssh_host}"
            )));
        }

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| Error::configuration(format!("failed to bind local tunnel port: {e}")))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| Error::configuration(format!("failed to read local tunnel port: {e}")))?
            .port();

        let session = Arc::new(tokio::sync::Mutex::new(session));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&session),
            remote_host.to_string(),
            remote_port,
        ));

        // Absorb the tunnel-establishment race (§4.1 endpoint resolution, rule 1).
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        Ok(Self {
            local_port,
            accept_task,
            session,
        })
    }

    /// The local port the engine base URL should target
    /// (`localhost:<local_port>`).
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Tear down the tunnel: stop accepting new connections and close
    /// the SSH session. In-flight forwarded connections are not
    /// drained.
    pub async fn shutdown(self) {
        self.accept_task.abort();
        let _ = self
            .session
            .lock()
            .await
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<tokio::sync::Mutex<Handle<TunnelHandler>>>,
    remote_host: String,
    remote_port: u16,
) {
    loop {
        let (local_stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("ssh tunnel accept failed: {e}");
                continue;
            }
        };
        let session = Arc::clone(&session);
        let remote_host = remote_host.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_one(local_stream, peer, &session, &remote_host, remote_port).await {
                debug!("ssh tunnel connection from {peer} ended: {e}");
            }
        });
    }
}

async fn forward_one(
    mut local_stream: TcpStream,
    peer: SocketAddr,
    session: &Arc<tokio::sync::Mutex<Handle<TunnelHandler>>>,
    remote_host: &str,
    remote_port: u16,
) -> Result<()> {
    let channel = session
        .lock()
        .await
        .channel_open_direct_tcpip(remote_host, u32::from(remote_port), &peer.ip().to_string(), u32::from(peer.port()))
        .await
        .map_err(|e| Error::transient_host("ssh-tunnel", format!("direct-tcpip open failed: {e}")))?;

    let mut channel_stream = channel.into_stream();
    tokio::io::copy_bidirectional(&mut local_stream, &mut channel_stream)
        .await
        .map_err(Error::from)?;
    Ok(())
}

/// Minimal SSH client handler: accepts any server host key.
///
/// Host-key verification is out of scope for this core; callers that
/// need it pin host keys at the ssh-config layer outside this crate.
struct TunnelHandler;

#[async_trait::async_trait]
impl Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(
        self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<(Self, bool), Self::Error> {
        Ok((self, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_fails_against_unreachable_host() {
        let result = SshTunnel::open(
            "192.0.2.1",
            "nobody",
            "not a real key",
            "127.0.0.1",
            2375,
        )
        .await;
        assert!(result.is_err());
    }
}
