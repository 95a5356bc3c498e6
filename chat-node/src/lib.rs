//! Peer chat node: TCP host, session establishment and the duplex line pump.

pub mod config;
pub mod error;
pub mod host;
pub mod peerstore;
pub mod pump;
pub mod session;
pub mod stream;
mod transport;

pub use error::{ConnectionError, NodeError};
pub use host::{Host, HostConfig};
pub use pump::{read_loop, write_loop, Pump, PumpExit};
pub use session::{connect, resolve_target, Node, SessionState};
pub use stream::Stream;
