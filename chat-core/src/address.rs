//! Self-describing peer addresses.
//!
//! A transport address is a path of `/<protocol>/<value>` components naming a
//! host and a TCP port, e.g. `/ip4/127.0.0.1/tcp/10000`. A peer address
//! encapsulates a transport address with the peer ID expected at that
//! location: `/ip4/127.0.0.1/tcp/10000/p2p/<peer-id>`. This is the string an
//! operator hands to the remote side.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::identity::PeerId;

/// Host part of a transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostAddr {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    /// Name resolved to any address family.
    Dns(String),
    /// Name resolved to IPv4 only.
    Dns4(String),
    /// Name resolved to IPv6 only.
    Dns6(String),
}

impl HostAddr {
    /// Protocol family label used in the text form.
    pub fn family(&self) -> &'static str {
        match self {
            HostAddr::Ip4(_) => "ip4",
            HostAddr::Ip6(_) => "ip6",
            HostAddr::Dns(_) => "dns",
            HostAddr::Dns4(_) => "dns4",
            HostAddr::Dns6(_) => "dns6",
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAddr::Ip4(ip) => write!(f, "/ip4/{ip}"),
            HostAddr::Ip6(ip) => write!(f, "/ip6/{ip}"),
            HostAddr::Dns(name) => write!(f, "/dns/{name}"),
            HostAddr::Dns4(name) => write!(f, "/dns4/{name}"),
            HostAddr::Dns6(name) => write!(f, "/dns6/{name}"),
        }
    }
}

/// Where to reach a process at the transport layer (TCP only).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    host: HostAddr,
    port: u16,
}

impl TransportAddress {
    pub fn new(host: HostAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> &HostAddr {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Socket address for IP hosts; `None` for names that still need a lookup.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match &self.host {
            HostAddr::Ip4(ip) => Some(SocketAddr::new(IpAddr::V4(*ip), self.port)),
            HostAddr::Ip6(ip) => Some(SocketAddr::new(IpAddr::V6(*ip), self.port)),
            HostAddr::Dns(_) | HostAddr::Dns4(_) | HostAddr::Dns6(_) => None,
        }
    }
}

impl From<SocketAddr> for TransportAddress {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(ip) => HostAddr::Ip4(ip),
            IpAddr::V6(ip) => HostAddr::Ip6(ip),
        };
        Self::new(host, addr.port())
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/tcp/{}", self.host, self.port)
    }
}

impl FromStr for TransportAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_components(s)?.as_slice() {
            [Component::Host(host), Component::Tcp(port)] => Ok(Self::new(host.clone(), *port)),
            _ => Err(AddressError::Resolution(format!(
                "{s}: expected exactly one host followed by /tcp/<port>"
            ))),
        }
    }
}

/// A transport address encapsulated with the peer ID expected there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    transport: TransportAddress,
    peer_id: PeerId,
}

impl PeerAddress {
    pub fn transport(&self) -> &TransportAddress {
        &self.transport
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/p2p/{}", self.transport, self.peer_id)
    }
}

impl FromStr for PeerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components = parse_components(s)?;
        match components.as_slice() {
            [Component::Host(host), Component::Tcp(port), Component::P2p(peer_id)] => {
                Ok(compose_full_address(
                    &TransportAddress::new(host.clone(), *port),
                    *peer_id,
                ))
            }
            [.., Component::P2p(_)] => Err(AddressError::Resolution(format!(
                "{s}: expected exactly one host and one /tcp/<port> before /p2p"
            ))),
            _ => Err(AddressError::Resolution(format!(
                "{s}: missing trailing /p2p/<peer-id>"
            ))),
        }
    }
}

/// Loopback transport address at `port`. Port 0 asks the OS to pick one.
pub fn build_listen_address(port: u32) -> Result<TransportAddress, AddressError> {
    let port = u16::try_from(port).map_err(|_| AddressError::InvalidPort(port))?;
    Ok(TransportAddress::new(HostAddr::Ip4(Ipv4Addr::LOCALHOST), port))
}

/// Encapsulate `peer_id` into `transport`. Pure; `to_string()` gives the printable form.
pub fn compose_full_address(transport: &TransportAddress, peer_id: PeerId) -> PeerAddress {
    PeerAddress {
        transport: transport.clone(),
        peer_id,
    }
}

/// Parse an operator-supplied peer address.
pub fn resolve_target(address: &str) -> Result<PeerAddress, AddressError> {
    address.trim().parse()
}

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid listen port {0}")]
    InvalidPort(u32),
    #[error("failed to parse address: {0}")]
    Parse(String),
    #[error("failed to resolve peer address: {0}")]
    Resolution(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Host(HostAddr),
    Tcp(u16),
    P2p(PeerId),
}

/// Split `/proto/value/...` into typed components. Shape is checked by the callers.
fn parse_components(s: &str) -> Result<Vec<Component>, AddressError> {
    let rest = s
        .strip_prefix('/')
        .ok_or_else(|| AddressError::Parse(format!("{s}: must start with '/'")))?;
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(AddressError::Parse(format!("{s}: empty address")));
    }

    let mut parts = rest.split('/');
    let mut out = Vec::new();
    while let Some(proto) = parts.next() {
        let value = parts
            .next()
            .ok_or_else(|| AddressError::Parse(format!("{s}: /{proto} has no value")))?;
        if value.is_empty() {
            return Err(AddressError::Parse(format!("{s}: /{proto} has an empty value")));
        }
        let component = match proto {
            "ip4" => Component::Host(HostAddr::Ip4(value.parse::<Ipv4Addr>().map_err(|e| {
                AddressError::Parse(format!("{s}: bad ip4 {value:?}: {e}"))
            })?)),
            "ip6" => Component::Host(HostAddr::Ip6(value.parse::<Ipv6Addr>().map_err(|e| {
                AddressError::Parse(format!("{s}: bad ip6 {value:?}: {e}"))
            })?)),
            "dns" => Component::Host(HostAddr::Dns(value.to_string())),
            "dns4" => Component::Host(HostAddr::Dns4(value.to_string())),
            "dns6" => Component::Host(HostAddr::Dns6(value.to_string())),
            "tcp" => Component::Tcp(value.parse::<u16>().map_err(|e| {
                AddressError::Parse(format!("{s}: bad tcp port {value:?}: {e}"))
            })?),
            "p2p" => Component::P2p(value.parse::<PeerId>().map_err(|e| {
                AddressError::Parse(format!("{s}: bad peer id {value:?}: {e}"))
            })?),
            other => {
                return Err(AddressError::Parse(format!(
                    "{s}: unknown protocol {other:?}"
                )))
            }
        };
        out.push(component);
    }
    Ok(out)
}
