//! The SSH jump server.
//!
//! Clients authenticate with a CA-signed user certificate (or a raw key
//! from the optional authorized-keys set). The only supported channel type
//! is `direct-tcpip`, and the grant check happens before the channel is
//! accepted: an accepted channel with no grant would be a bug, not a
//! hardening measure.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use russh::keys::ssh_key::{Certificate, PublicKey};
use russh::server::{Auth, Config, Handler, Msg, Session};
use russh::Channel;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use shield_types::{Grant, ShieldError};

use crate::ca::{load_or_create_key, CertificateAuthority};
use crate::grants::GrantStore;
use crate::logger::SessionLogger;

/// Bastion server configuration.
pub struct BastionConfig {
    pub host_key_path: PathBuf,
    pub ca_key_path: PathBuf,
    /// Optional authorized-keys file admitting raw (non-certificate) keys.
    pub authorized_keys_path: Option<PathBuf>,
    pub grants: Arc<GrantStore>,
    pub logger: Arc<SessionLogger>,
}

/// The SSH bastion.
pub struct BastionServer {
    ssh_config: Arc<Config>,
    ca: Arc<CertificateAuthority>,
    grants: Arc<GrantStore>,
    logger: Arc<SessionLogger>,
    authorized: Arc<HashSet<Vec<u8>>>,
}

impl BastionServer {
    /// Load (or create) the host and CA keys and build the server.
    pub fn new(config: BastionConfig) -> Result<Self, ShieldError> {
        let host_key = load_or_create_key(&config.host_key_path)?;
        let ca = CertificateAuthority::load_or_create(&config.ca_key_path)?;
        let authorized = load_authorized_keys(config.authorized_keys_path.as_deref())?;

        let ssh_config = Config {
            keys: vec![host_key],
            ..Default::default()
        };

        Ok(Self {
            ssh_config: Arc::new(ssh_config),
            ca: Arc::new(ca),
            grants: config.grants,
            logger: config.logger,
            authorized: Arc::new(authorized),
        })
    }

    /// The certificate authority backing this server.
    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    /// Accept loop; one task per connection until shutdown.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "ssh bastion listening"),
            Err(_) => info!("ssh bastion listening"),
        }
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer).await;
                        });
                    }
                    Err(e) => error!(error = %e, "bastion accept failed"),
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ssh bastion shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let handler = ClientHandler {
            server: Arc::clone(&self),
            peer,
            user: None,
        };
        match russh::server::run_stream(Arc::clone(&self.ssh_config), stream, handler).await {
            Ok(session) => {
                if let Err(e) = session.await {
                    debug!(peer = %peer, error = %e, "ssh session ended with error");
                }
            }
            Err(e) => debug!(peer = %peer, error = %e, "ssh handshake failed"),
        }
    }

    /// Dial the destination and splice until either side closes. Connect
    /// and disconnect events bracket the tunnel; a failed dial still
    /// produces the pair.
    async fn tunnel(&self, channel: Channel<Msg>, grant: Grant, principal: String, address: String) {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.logger
            .log_connect(&session_id, &grant.id, &principal, &address);

        match TcpStream::connect(&address).await {
            Ok(target) => {
                splice(channel.into_stream(), target).await;
            }
            Err(e) => {
                warn!(address = %address, error = %e, "bastion dial failed");
            }
        }

        self.logger
            .log_disconnect(&session_id, &grant.id, &principal, &address);
    }
}

struct ClientHandler {
    server: Arc<BastionServer>,
    peer: SocketAddr,
    user: Option<String>,
}

fn rejected() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

impl Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.server.authorized.is_empty() {
            debug!(peer = %self.peer, user, "raw key offered but no authorized keys configured");
            return Ok(rejected());
        }
        let encoded = public_key
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("encode offered key: {e}"))?;
        if self.server.authorized.contains(&encoded) {
            self.user = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            info!(peer = %self.peer, user, "unauthorized public key");
            Ok(rejected())
        }
    }

    async fn auth_openssh_certificate(
        &mut self,
        user: &str,
        certificate: &Certificate,
    ) -> Result<Auth, Self::Error> {
        match self.server.ca.validate_user_certificate(certificate, user) {
            Ok(()) => {
                self.user = Some(user.to_string());
                Ok(Auth::Accept)
            }
            Err(e) => {
                info!(peer = %self.peer, user, error = %e, "certificate rejected");
                Ok(rejected())
            }
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let principal = self.user.clone().unwrap_or_default();

        // Grant check before channel accept.
        let Some(grant) = self.server.grants.validate_access(&principal, host_to_connect) else {
            info!(
                peer = %self.peer,
                principal,
                target = host_to_connect,
                "direct-tcpip refused: no valid grant"
            );
            return Ok(false);
        };

        let address = format!("{host_to_connect}:{port_to_connect}");
        let server = Arc::clone(&self.server);
        tokio::spawn(async move {
            server.tunnel(channel, grant, principal, address).await;
        });
        Ok(true)
    }
}

/// Parse an OpenSSH authorized-keys file into wire-encoded key blobs.
fn load_authorized_keys(path: Option<&std::path::Path>) -> Result<HashSet<Vec<u8>>, ShieldError> {
    let mut keys = HashSet::new();
    let Some(path) = path else {
        return Ok(keys);
    };
    let contents = std::fs::read_to_string(path)?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let key = PublicKey::from_openssh(line).map_err(|e| {
            ShieldError::Config(format!("authorized keys {}: {e}", path.display()))
        })?;
        let encoded = key
            .to_bytes()
            .map_err(|e| ShieldError::Config(format!("encode authorized key: {e}")))?;
        keys.insert(encoded);
    }
    Ok(keys)
}

/// Copy bytes both ways until either direction finishes, then drop both
/// endpoints.
async fn splice<A, B>(channel: A, target: B)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut channel_read, mut channel_write) = tokio::io::split(channel);
    let (mut target_read, mut target_write) = tokio::io::split(target);
    tokio::select! {
        _ = tokio::io::copy(&mut channel_read, &mut target_write) => {}
        _ = tokio::io::copy(&mut target_read, &mut channel_write) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::ssh_key::rand_core::OsRng;
    use russh::keys::ssh_key::{Algorithm, PrivateKey};
    use std::io::Write;

    #[test]
    fn authorized_keys_parsing() {
        let key1 = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let key2 = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# operator keys").unwrap();
        writeln!(file, "{}", key1.public_key().to_openssh().unwrap()).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", key2.public_key().to_openssh().unwrap()).unwrap();
        file.flush().unwrap();

        let keys = load_authorized_keys(Some(file.path())).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&key1.public_key().to_bytes().unwrap()));

        let other = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        assert!(!keys.contains(&other.public_key().to_bytes().unwrap()));
    }

    #[test]
    fn no_authorized_keys_file_is_empty_set() {
        assert!(load_authorized_keys(None).unwrap().is_empty());
    }

    #[test]
    fn server_creates_keys_on_first_start() {
        let dir = tempfile::tempdir().unwrap();
        let grants = Arc::new(GrantStore::new(None));
        let store = Arc::new(crate::logger::SessionLogStore::new(16));
        let logger = Arc::new(SessionLogger::new(store));

        let server = BastionServer::new(BastionConfig {
            host_key_path: dir.path().join("bastion_host_key"),
            ca_key_path: dir.path().join("bastion_ca_key"),
            authorized_keys_path: None,
            grants,
            logger,
        })
        .unwrap();

        assert!(dir.path().join("bastion_host_key").exists());
        assert!(dir.path().join("bastion_ca_key").exists());
        assert!(dir.path().join("bastion_ca_key.pub").exists());
        drop(server);
    }
}
