//! Server lifecycle: listener, host key material, connection spawning,
//! coordinated shutdown.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use portcullis_core::{CancelCause, CancelToken};
use portcullis_users::{Authenticator, UserStore};
use russh_keys::key;
use tokio::fs;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatcher::SessionDispatcher;
use crate::fs::LocalFs;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::subsystem::{SftpSubsystem, SubsystemService};
use crate::{Error, Result};

/// The secure file-access server.
pub struct Server {
    config: Arc<Config>,
    ssh_config: Arc<russh::server::Config>,
    authenticator: Arc<Authenticator>,
    registry: Arc<ConnectionRegistry>,
    subsystem: Arc<dyn SubsystemService>,
    fs: Arc<LocalFs>,
    shutdown: CancelToken,
}

impl Server {
    /// Creates a server over the given user store.
    ///
    /// Loads the host key (generating a fresh one when the configured file
    /// is absent) and prepares the transport configuration; the listener is
    /// not bound until [`Server::run`].
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or unusable host key material.
    pub async fn new(config: Config, store: Arc<dyn UserStore>) -> Result<Self> {
        config.validate()?;

        let key_pair = load_host_key(&config.host_key_path).await?;

        let ssh_config = russh::server::Config {
            inactivity_timeout: Some(Duration::from_secs(config.inactivity_timeout_secs)),
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![key_pair],
            window_size: config.window_size,
            maximum_packet_size: config.max_packet_size,
            ..Default::default()
        };

        let authenticator = Arc::new(Authenticator::with_deadline(store, config.auth_timeout()));
        let fs = Arc::new(LocalFs::new(config.root_dir.clone()));

        Ok(Self {
            config: Arc::new(config),
            ssh_config: Arc::new(ssh_config),
            authenticator,
            registry: Arc::new(ConnectionRegistry::new()),
            subsystem: Arc::new(SftpSubsystem::new()),
            fs,
            shutdown: CancelToken::new(),
        })
    }

    /// Root cancellation token; cancel it to begin a graceful shutdown.
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// The connection registry, exposed for observability.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until the shutdown token fires, then drains
    /// every live connection before returning and releasing the listener.
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot be bound; accept failures are logged
    /// and the loop continues.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, root = ?self.config.root_dir, "listening for connections");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(err) => {
                        error!(error = %err, "failed to accept incoming connection");
                        continue;
                    }
                },
            }
        }

        info!(
            active = self.registry.active().await,
            cause = ?self.shutdown.cause(),
            "draining connections before releasing the listener"
        );
        self.registry.close_all(CancelCause::Shutdown).await;
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId::new();
        let token = self.shutdown.child();
        let dispatcher = SessionDispatcher::new(
            id,
            peer,
            token.clone(),
            Arc::clone(&self.authenticator),
            Arc::clone(&self.registry),
            Arc::clone(&self.subsystem),
            Arc::clone(&self.fs),
        );
        let ssh_config = Arc::clone(&self.ssh_config);
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            debug!(%peer, %id, "starting transport handshake");
            match russh::server::run_stream(ssh_config, stream, dispatcher).await {
                Ok(session) => {
                    if let Err(err) = session.await {
                        warn!(%peer, %id, error = %err, "connection ended with error");
                    } else {
                        debug!(%peer, %id, "connection closed");
                    }
                }
                Err(err) => warn!(%peer, %id, error = %err, "transport handshake failed"),
            }
            // The peer is gone; stop any channel task still in flight.
            token.cancel(CancelCause::Disconnected);
            // Idempotent: shutdown may have unregistered the record already.
            registry.unregister(id).await;
        });
    }
}

async fn load_host_key(path: &Path) -> Result<key::KeyPair> {
    if !path.exists() {
        warn!(?path, "host key not found, generating an ephemeral key");
        return key::KeyPair::generate_ed25519()
            .ok_or_else(|| Error::Config("failed to generate host key".to_string()));
    }

    let key_data = fs::read_to_string(path).await?;
    russh_keys::decode_secret_key(&key_data, None)
        .map_err(|e| Error::Config(format!("failed to load host key: {e}")))
}
