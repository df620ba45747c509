//! Per-connection channel and request dispatch.
//!
//! One dispatcher lives from transport handshake to connection close.
//! Authentication completes before any channel is serviced; each accepted
//! session channel is negotiated independently and handed to the subsystem
//! service on its own task, scoped by a child of the connection's cancel
//! token.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use portcullis_core::CancelToken;
use portcullis_users::Authenticator;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, Disconnect, MethodSet, Pty};
use tracing::{debug, error, info, warn};

use crate::fs::LocalFs;
use crate::registry::{ConnectionControl, ConnectionId, ConnectionRegistry};
use crate::subsystem::{BoxedByteStream, SubsystemService};
use crate::{Error, Result};

/// Close handle over the russh server connection.
struct TransportControl {
    handle: Handle,
}

#[async_trait]
impl ConnectionControl for TransportControl {
    async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(
                Disconnect::ByApplication,
                "server shutting down".to_string(),
                "en".to_string(),
            )
            .await
            .map_err(|_| Error::Connection("disconnect could not be sent".to_string()))
    }
}

/// Routes one connection's authentication, channels and requests.
pub struct SessionDispatcher {
    id: ConnectionId,
    peer: SocketAddr,
    token: CancelToken,
    authenticator: Arc<Authenticator>,
    registry: Arc<ConnectionRegistry>,
    subsystem: Arc<dyn SubsystemService>,
    fs: Arc<LocalFs>,
    username: Option<String>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl SessionDispatcher {
    /// Creates the dispatcher for one accepted connection.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        token: CancelToken,
        authenticator: Arc<Authenticator>,
        registry: Arc<ConnectionRegistry>,
        subsystem: Arc<dyn SubsystemService>,
        fs: Arc<LocalFs>,
    ) -> Self {
        Self {
            id,
            peer,
            token,
            authenticator,
            registry,
            subsystem,
            fs,
            username: None,
            channels: HashMap::new(),
        }
    }

    /// Identity of the connection this dispatcher serves.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn spawn_channel_service(&self, channel: Channel<Msg>) {
        let token = self.token.child();
        let service = Arc::clone(&self.subsystem);
        let fs = Arc::clone(&self.fs);
        let user = self.username.clone().unwrap_or_default();

        tokio::spawn(async move {
            let stream: BoxedByteStream = Box::new(channel.into_stream());
            tokio::select! {
                () = token.cancelled() => {
                    info!(user = %user, cause = ?token.cause(), "session channel cancelled");
                }
                outcome = service.serve(stream, fs) => match outcome {
                    Ok(()) => info!(user = %user, "client exited session"),
                    // One channel's failure does not close the connection.
                    Err(err) => error!(user = %user, error = %err, "subsystem completed with error"),
                },
            }
        });
    }
}

impl Handler for SessionDispatcher {
    type Error = Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        let origin = self.peer.to_string();
        match self
            .authenticator
            .authenticate(&self.token, user, password, &origin)
            .await
        {
            Ok(record) => {
                info!(peer = %self.peer, user, "password authentication succeeded");
                self.username = Some(record.username().to_string());
                Ok(Auth::Accept)
            }
            Err(kind) => {
                // The peer sees one uniform rejection; the kind stays here.
                debug!(peer = %self.peer, user, %kind, "password authentication failed");
                Ok(Auth::Reject {
                    proceed_with_methods: Some(MethodSet::PASSWORD),
                })
            }
        }
    }

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<()> {
        let control = Arc::new(TransportControl {
            handle: session.handle(),
        });
        self.registry
            .register(self.id, self.token.clone(), control)
            .await?;
        debug!(id = %self.id, peer = %self.peer, "connection registered");
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        debug!(id = %self.id, channel = ?channel.id(), "session channel opened");
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        warn!(id = %self.id, "rejecting direct-tcpip channel: unknown channel type");
        Ok(false)
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        warn!(id = %self.id, "rejecting forwarded-tcpip channel: unknown channel type");
        Ok(false)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        warn!(id = %self.id, "rejecting x11 channel: unknown channel type");
        Ok(false)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<()> {
        if name == self.subsystem.name() {
            let Some(channel) = self.channels.remove(&channel_id) else {
                warn!(id = %self.id, ?channel_id, "subsystem request for unknown channel");
                session.channel_failure(channel_id)?;
                return Ok(());
            };
            // The success reply must land before the service sees the stream.
            session.channel_success(channel_id)?;
            info!(id = %self.id, subsystem = name, "subsystem negotiated");
            self.spawn_channel_service(channel);
        } else {
            warn!(id = %self.id, subsystem = name, "rejecting unsupported subsystem");
            session.channel_failure(channel_id)?;
        }
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<()> {
        debug!(id = %self.id, "refusing pty request");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        debug!(id = %self.id, "refusing shell request");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        debug!(id = %self.id, "refusing exec request");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<()> {
        debug!(id = %self.id, "refusing env request");
        session.channel_failure(channel)?;
        Ok(())
    }
}
