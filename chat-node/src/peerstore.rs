//! Address book: which transport addresses a peer can be reached at, and for how long.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chat_core::{PeerId, TransportAddress};

/// How long an address entry stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Never expires for the life of the process.
    Permanent,
    For(Duration),
}

/// TTL used for addresses the operator supplied explicitly.
pub const PERMANENT_ADDR_TTL: Ttl = Ttl::Permanent;

struct Entry {
    addr: TransportAddress,
    expires: Option<Instant>,
}

impl Entry {
    fn live_at(&self, now: Instant) -> bool {
        self.expires.map_or(true, |t| now < t)
    }
}

#[derive(Default)]
pub struct PeerStore {
    peers: HashMap<PeerId, Vec<Entry>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record addresses for `peer`. Re-adding an address keeps the later expiry.
    pub fn add_addrs<I>(&mut self, peer: PeerId, addrs: I, ttl: Ttl)
    where
        I: IntoIterator<Item = TransportAddress>,
    {
        let now = Instant::now();
        let expires = match ttl {
            Ttl::Permanent => None,
            Ttl::For(d) => Some(now + d),
        };
        let entries = self.peers.entry(peer).or_default();
        entries.retain(|e| e.live_at(now));
        for addr in addrs {
            match entries.iter_mut().find(|e| e.addr == addr) {
                Some(existing) => {
                    existing.expires = match (existing.expires, expires) {
                        (None, _) | (_, None) => None,
                        (Some(a), Some(b)) => Some(a.max(b)),
                    };
                }
                None => entries.push(Entry { addr, expires }),
            }
        }
    }

    /// Live addresses for `peer`, in insertion order.
    pub fn addrs(&self, peer: &PeerId) -> Vec<TransportAddress> {
        let now = Instant::now();
        self.peers
            .get(peer)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.live_at(now))
                    .map(|e| e.addr.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{build_listen_address, Keypair};

    #[test]
    fn permanent_entries_are_returned() {
        let mut store = PeerStore::new();
        let peer = Keypair::generate().unwrap().peer_id();
        let a = build_listen_address(10000).unwrap();
        let b = build_listen_address(10001).unwrap();
        store.add_addrs(peer, [a.clone(), b.clone()], PERMANENT_ADDR_TTL);
        store.add_addrs(peer, [a.clone()], PERMANENT_ADDR_TTL);
        assert_eq!(store.addrs(&peer), vec![a, b]);
    }

    #[test]
    fn unknown_peer_has_no_addresses() {
        let store = PeerStore::new();
        let peer = Keypair::generate().unwrap().peer_id();
        assert!(store.addrs(&peer).is_empty());
    }

    #[test]
    fn expired_entries_are_hidden() {
        let mut store = PeerStore::new();
        let peer = Keypair::generate().unwrap().peer_id();
        let addr = build_listen_address(10000).unwrap();
        store.add_addrs(peer, [addr], Ttl::For(Duration::ZERO));
        assert!(store.addrs(&peer).is_empty());
    }

    #[test]
    fn permanent_wins_over_timed() {
        let mut store = PeerStore::new();
        let peer = Keypair::generate().unwrap().peer_id();
        let addr = build_listen_address(10000).unwrap();
        store.add_addrs(peer, [addr.clone()], PERMANENT_ADDR_TTL);
        store.add_addrs(peer, [addr.clone()], Ttl::For(Duration::ZERO));
        assert_eq!(store.addrs(&peer), vec![addr]);
    }
}
