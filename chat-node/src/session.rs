//! Session establishment: run as a listener (accept chat streams) or as a
//! dialer (resolve an operator-supplied address and open one chat stream).
//!
//! Per-process states: `Idle -> {Listening | Dialing} -> SessionActive -> Terminated`.
//! A listener stays `Listening` while inbound sessions come and go; a dialer
//! moves to `SessionActive` once, or to `Terminated` when the dial fails.
//! Nothing reconnects.

use std::sync::Arc;

use chat_core::{compose_full_address, Keypair, PeerAddress, ProtocolId, TransportAddress};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use chat_core::resolve_target;

use crate::error::{ConnectionError, Result};
use crate::host::{Host, HostConfig};
use crate::peerstore::PERMANENT_ADDR_TTL;
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Dialing,
    SessionActive,
    Terminated,
}

/// One process's host plus its session state.
pub struct Node {
    host: Host,
    state: watch::Sender<SessionState>,
}

impl Node {
    /// Bind the host at `listen`. The node starts `Idle`.
    pub async fn start(
        keypair: Arc<Keypair>,
        listen: &TransportAddress,
        config: HostConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let host = Host::listen(keypair, listen, config, cancel).await?;
        let (state, _) = watch::channel(SessionState::Idle);
        Ok(Self { host, state })
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The address to hand to the remote operator.
    pub fn address(&self) -> PeerAddress {
        compose_full_address(&self.host.addrs()[0], self.host.peer_id())
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Listener mode: `on_stream` runs once per inbound chat stream, each on
    /// the task that accepted it.
    pub async fn listen<F>(&self, on_stream: F)
    where
        F: Fn(Stream) + Send + Sync + 'static,
    {
        self.host
            .set_stream_handler(ProtocolId::Chat, move |stream: Stream| {
                info!(peer = %stream.remote_peer(), "session active");
                on_stream(stream)
            })
            .await;
        self.set_state(SessionState::Listening);
    }

    /// Dialer mode: parse `target`, connect and open the chat stream.
    pub async fn dial(&self, target: &str) -> Result<Stream> {
        self.set_state(SessionState::Dialing);
        match self.resolve_and_connect(target).await {
            Ok(stream) => {
                self.set_state(SessionState::SessionActive);
                info!(peer = %stream.remote_peer(), "session active");
                Ok(stream)
            }
            Err(e) => {
                self.set_state(SessionState::Terminated);
                warn!(%target, error = %e, "dial abandoned");
                Err(e)
            }
        }
    }

    async fn resolve_and_connect(&self, target: &str) -> Result<Stream> {
        let target = resolve_target(target)?;
        Ok(connect(&self.host, &target, ProtocolId::Chat).await?)
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(?prev, ?next, "session state");
        }
    }
}

/// Register the target's address permanently, then open a stream to it.
pub async fn connect(
    host: &Host,
    target: &PeerAddress,
    protocol: ProtocolId,
) -> Result<Stream, ConnectionError> {
    host.add_known_peer(
        target.peer_id(),
        [target.transport().clone()],
        PERMANENT_ADDR_TTL,
    )
    .await;
    host.new_stream(target.peer_id(), protocol).await
}
