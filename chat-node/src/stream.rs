//! A negotiated, encrypted byte stream to one remote peer.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use chat_core::{PeerId, ProtocolId};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Ordered, reliable, bidirectional bytes bound to a protocol and a remote peer.
///
/// Reads return 0 once the remote side has closed its write direction.
/// Writes fail with `BrokenPipe` once the underlying connection is gone.
#[derive(Debug)]
pub struct Stream {
    remote: PeerId,
    protocol: ProtocolId,
    io: DuplexStream,
}

impl Stream {
    pub(crate) fn new(remote: PeerId, protocol: ProtocolId, io: DuplexStream) -> Self {
        Self {
            remote,
            protocol,
            io,
        }
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}
