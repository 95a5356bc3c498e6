//! Networking host: listens for inbound connections, dials known peers and
//! hands negotiated streams to the handler registered for their protocol.
//!
//! One TCP connection carries exactly one stream. Every inbound connection is
//! handled on its own task, so a slow handshake never blocks the next accept.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_core::{AddressError, HostAddr, Keypair, PeerId, ProtocolId, TransportAddress};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, NodeError};
use crate::peerstore::{PeerStore, Ttl};
use crate::stream::Stream;
use crate::transport::{
    answer_proposal, bridge, handshake_accept, handshake_connect, negotiate_outbound,
    read_proposal,
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Callback invoked once per inbound stream.
pub type StreamHandler = Arc<dyn Fn(Stream) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Bound on connect + handshake + negotiation for one outbound address.
    pub dial_timeout: Duration,
    /// Bound on handshake + negotiation for one inbound connection.
    pub handshake_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct Host {
    keypair: Arc<Keypair>,
    listen_addr: TransportAddress,
    peer_store: Arc<Mutex<PeerStore>>,
    handlers: Arc<RwLock<HashMap<ProtocolId, StreamHandler>>>,
    config: HostConfig,
}

impl Host {
    /// Bind `addr` and start accepting until `cancel` fires.
    pub async fn listen(
        keypair: Arc<Keypair>,
        addr: &TransportAddress,
        config: HostConfig,
        cancel: CancellationToken,
    ) -> Result<Self, NodeError> {
        let bind = addr.socket_addr().ok_or_else(|| {
            AddressError::Resolution(format!("{addr}: listen address must be an IP address"))
        })?;
        let listen_err = |source| NodeError::Listen {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(bind).await.map_err(listen_err)?;
        let local = listener.local_addr().map_err(listen_err)?;

        let host = Self::new(keypair, TransportAddress::from(local), config);
        info!(addr = %host.listen_addr, peer = %host.peer_id(), "listening");
        tokio::spawn(host.clone().accept_loop(listener, cancel));
        Ok(host)
    }

    fn new(keypair: Arc<Keypair>, listen_addr: TransportAddress, config: HostConfig) -> Self {
        Self {
            keypair,
            listen_addr,
            peer_store: Arc::new(Mutex::new(PeerStore::new())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// Addresses we are reachable at, with the port actually bound.
    pub fn addrs(&self) -> &[TransportAddress] {
        std::slice::from_ref(&self.listen_addr)
    }

    /// Install (or replace) the handler for `protocol`.
    pub async fn set_stream_handler<F>(&self, protocol: ProtocolId, handler: F)
    where
        F: Fn(Stream) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .await
            .insert(protocol, Arc::new(handler));
        debug!(%protocol, "stream handler registered");
    }

    /// Record where `peer` can be reached.
    pub async fn add_known_peer<I>(&self, peer: PeerId, addrs: I, ttl: Ttl)
    where
        I: IntoIterator<Item = TransportAddress>,
    {
        self.peer_store.lock().await.add_addrs(peer, addrs, ttl);
    }

    pub async fn known_addrs(&self, peer: &PeerId) -> Vec<TransportAddress> {
        self.peer_store.lock().await.addrs(peer)
    }

    /// Open a stream to `peer` under `protocol`. Each known address is tried
    /// once, in order; the last failure is returned.
    pub async fn new_stream(
        &self,
        peer: PeerId,
        protocol: ProtocolId,
    ) -> Result<Stream, ConnectionError> {
        let addrs = self.known_addrs(&peer).await;
        let mut last_err = ConnectionError::NoAddresses(peer);
        for addr in addrs {
            let attempt = self.dial_addr(&addr, peer, protocol);
            match tokio::time::timeout(self.config.dial_timeout, attempt).await {
                Ok(Ok(stream)) => {
                    info!(%peer, %addr, %protocol, "stream opened");
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!(%peer, %addr, error = %e, "dial failed");
                    last_err = e;
                }
                Err(_) => {
                    debug!(%peer, %addr, "dial timed out");
                    last_err = ConnectionError::Timeout(self.config.dial_timeout);
                }
            }
        }
        Err(last_err)
    }

    async fn dial_addr(
        &self,
        addr: &TransportAddress,
        peer: PeerId,
        protocol: ProtocolId,
    ) -> Result<Stream, ConnectionError> {
        let mut tcp = connect_tcp(addr).await?;
        let mut channel = handshake_connect(&mut tcp, &self.keypair, peer).await?;
        negotiate_outbound(&mut tcp, &mut channel, protocol).await?;
        Ok(bridge(tcp, channel, protocol))
    }

    async fn accept_loop(self, listener: TcpListener, cancel: CancellationToken) {
        let listener = Arc::new(listener);
        self.serve(
            move || {
                let listener = Arc::clone(&listener);
                async move { listener.accept().await }
            },
            cancel,
        )
        .await;
    }

    /// Take connections from `accept` until `cancel` fires. Accept errors
    /// never end the loop.
    async fn serve<A, Fut>(self, mut accept: A, cancel: CancellationToken)
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
    {
        loop {
            let (tcp, remote_addr) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = accept() => match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        let pause = accept_backoff(&e);
                        if !pause.is_zero() {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(pause) => {}
                            }
                        }
                        continue;
                    }
                },
            };
            let host = self.clone();
            tokio::spawn(async move {
                let limit = host.config.handshake_timeout;
                match tokio::time::timeout(limit, host.accept_stream(tcp)).await {
                    Ok(Ok((stream, handler))) => {
                        info!(
                            peer = %stream.remote_peer(),
                            protocol = %stream.protocol(),
                            %remote_addr,
                            "inbound stream"
                        );
                        handler(stream);
                    }
                    Ok(Err(e)) => debug!(%remote_addr, error = %e, "inbound connection dropped"),
                    Err(_) => debug!(%remote_addr, "inbound handshake timed out"),
                }
            });
        }
        debug!(addr = %self.listen_addr, "accept loop stopped");
    }

    async fn accept_stream(
        &self,
        mut tcp: TcpStream,
    ) -> Result<(Stream, StreamHandler), ConnectionError> {
        let mut channel = handshake_accept(&mut tcp, &self.keypair).await?;
        let name = read_proposal(&mut tcp, &mut channel).await?;
        let handler = match name.parse::<ProtocolId>() {
            Ok(protocol) => self
                .handlers
                .read()
                .await
                .get(&protocol)
                .cloned()
                .map(|h| (protocol, h)),
            Err(_) => None,
        };
        match handler {
            Some((protocol, handler)) => {
                answer_proposal(&mut tcp, &mut channel, name, true).await?;
                Ok((bridge(tcp, channel, protocol), handler))
            }
            None => {
                answer_proposal(&mut tcp, &mut channel, name.clone(), false).await?;
                Err(ConnectionError::ProtocolRejected(name))
            }
        }
    }
}

/// Pause after a failed accept. Errors about the one connection being
/// accepted retry at once; anything else (descriptor exhaustion and the like)
/// waits so the loop does not spin.
fn accept_backoff(e: &io::Error) -> Duration {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

/// Resolve `addr` and connect to the first socket address that answers.
async fn connect_tcp(addr: &TransportAddress) -> Result<TcpStream, ConnectionError> {
    let dial_err = |source| ConnectionError::Dial {
        addr: addr.to_string(),
        source,
    };
    let candidates: Vec<SocketAddr> = match addr.host() {
        HostAddr::Ip4(_) | HostAddr::Ip6(_) => addr.socket_addr().into_iter().collect(),
        HostAddr::Dns(name) => lookup(name, addr.port(), true, true).await.map_err(dial_err)?,
        HostAddr::Dns4(name) => lookup(name, addr.port(), true, false).await.map_err(dial_err)?,
        HostAddr::Dns6(name) => lookup(name, addr.port(), false, true).await.map_err(dial_err)?,
    };

    let mut last_err = io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        "name resolved to no usable address",
    );
    for sa in candidates {
        match TcpStream::connect(sa).await {
            Ok(tcp) => return Ok(tcp),
            Err(e) => last_err = e,
        }
    }
    Err(dial_err(last_err))
}

async fn lookup(
    name: &str,
    port: u16,
    want_v4: bool,
    want_v6: bool,
) -> io::Result<Vec<SocketAddr>> {
    Ok(tokio::net::lookup_host((name, port))
        .await?
        .filter(|sa| (sa.is_ipv4() && want_v4) || (sa.is_ipv6() && want_v6))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::build_listen_address;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn per_connection_accept_errors_retry_at_once() {
        for kind in [io::ErrorKind::ConnectionAborted, io::ErrorKind::ConnectionReset] {
            assert_eq!(accept_backoff(&io::Error::from(kind)), Duration::ZERO);
        }
        assert_eq!(
            accept_backoff(&io::Error::from(io::ErrorKind::Other)),
            ACCEPT_BACKOFF
        );
    }

    #[tokio::test]
    async fn accept_errors_do_not_stop_listening() {
        let cancel = CancellationToken::new();
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let server = Host::new(
            Arc::new(Keypair::generate().unwrap()),
            TransportAddress::from(listener.local_addr().unwrap()),
            HostConfig::default(),
        );
        let (tx, mut inbound) = mpsc::unbounded_channel();
        server
            .set_stream_handler(ProtocolId::Chat, move |stream| {
                let _ = tx.send(stream);
            })
            .await;

        // Two failed accepts (one retried at once, one after a pause) before
        // the real listener is polled.
        let mut failures = vec![io::ErrorKind::Other, io::ErrorKind::ConnectionAborted];
        let accept = {
            let listener = Arc::clone(&listener);
            move || {
                let failure = failures.pop();
                let listener = Arc::clone(&listener);
                async move {
                    match failure {
                        Some(kind) => Err(io::Error::from(kind)),
                        None => listener.accept().await,
                    }
                }
            }
        };
        let serving = tokio::spawn(server.clone().serve(accept, cancel.clone()));

        let client = Host::listen(
            Arc::new(Keypair::generate().unwrap()),
            &build_listen_address(0).unwrap(),
            HostConfig::default(),
            cancel.clone(),
        )
        .await
        .unwrap();
        client
            .add_known_peer(server.peer_id(), server.addrs().to_vec(), Ttl::Permanent)
            .await;
        let stream = client
            .new_stream(server.peer_id(), ProtocolId::Chat)
            .await
            .unwrap();
        assert_eq!(stream.remote_peer(), server.peer_id());

        let accepted = tokio::time::timeout(WAIT, inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accepted.remote_peer(), client.peer_id());

        cancel.cancel();
        tokio::time::timeout(WAIT, serving).await.unwrap().unwrap();
    }
}
