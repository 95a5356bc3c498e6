//! Connection plumbing: hello exchange, protocol negotiation, encrypted frame pumps.

use chat_core::handshake::{decode_hello, derive_session_keys, encode_hello, Hello, HELLO_SIZE};
use chat_core::wire::{frame_len, LEN_SIZE, MAX_FRAME_LEN};
use chat_core::{FrameError, FrameOpener, FrameSealer, Keypair, Message, PeerId, ProtocolId, Side};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ConnectionError;
use crate::stream::Stream;

/// In-process buffer between a `Stream` and its socket pumps.
const STREAM_BUFFER: usize = 64 * 1024;
/// Largest chunk of stream bytes sent in one frame.
const READ_CHUNK: usize = 8 * 1024;
/// Bound on `Propose`/`Accept`/`Reject` frames, read before the peer has
/// proven it holds the session keys.
const NEGOTIATION_FRAME_LIMIT: usize = 1024;
/// Bound on frames of an open stream.
const STREAM_FRAME_LIMIT: usize = MAX_FRAME_LEN as usize;

/// Authenticated peer plus the frame ciphers for both directions.
pub(crate) struct SecureChannel {
    pub(crate) remote: PeerId,
    sealer: FrameSealer,
    opener: FrameOpener,
}

impl SecureChannel {
    fn new(hello: Hello, keypair: &Keypair, side: Side) -> Result<Self, ConnectionError> {
        let keys = derive_session_keys(keypair, &hello.public_key, side)?;
        Ok(Self {
            remote: hello.peer_id,
            sealer: FrameSealer::new(keys.send),
            opener: FrameOpener::new(keys.recv),
        })
    }
}

/// Dialer side: send our hello, then require the listener to be `expected`.
pub(crate) async fn handshake_connect(
    tcp: &mut TcpStream,
    keypair: &Keypair,
    expected: PeerId,
) -> Result<SecureChannel, ConnectionError> {
    tcp.write_all(&encode_hello(keypair)).await?;
    tcp.flush().await?;
    let hello = read_hello(tcp).await?;
    if hello.peer_id != expected {
        return Err(ConnectionError::PeerIdMismatch {
            expected,
            actual: hello.peer_id,
        });
    }
    SecureChannel::new(hello, keypair, Side::Dialer)
}

/// Listener side: read the dialer's hello, answer with ours.
pub(crate) async fn handshake_accept(
    tcp: &mut TcpStream,
    keypair: &Keypair,
) -> Result<SecureChannel, ConnectionError> {
    let hello = read_hello(tcp).await?;
    tcp.write_all(&encode_hello(keypair)).await?;
    tcp.flush().await?;
    SecureChannel::new(hello, keypair, Side::Listener)
}

async fn read_hello(tcp: &mut TcpStream) -> Result<Hello, ConnectionError> {
    let mut buf = [0u8; HELLO_SIZE];
    tcp.read_exact(&mut buf).await?;
    Ok(decode_hello(&buf)?)
}

/// Dialer side: propose `protocol` and wait for the verdict.
pub(crate) async fn negotiate_outbound(
    tcp: &mut TcpStream,
    channel: &mut SecureChannel,
    protocol: ProtocolId,
) -> Result<(), ConnectionError> {
    let proposal = Message::Propose {
        protocol: protocol.as_str().to_string(),
    };
    write_frame(tcp, &mut channel.sealer, &proposal).await?;
    match read_frame(tcp, &mut channel.opener, NEGOTIATION_FRAME_LIMIT).await? {
        Message::Accept { protocol: name } if name == protocol.as_str() => Ok(()),
        Message::Reject { protocol: name } => Err(ConnectionError::ProtocolRejected(name)),
        _ => Err(ConnectionError::UnexpectedMessage),
    }
}

/// Listener side: the protocol name the dialer asked for.
pub(crate) async fn read_proposal(
    tcp: &mut TcpStream,
    channel: &mut SecureChannel,
) -> Result<String, ConnectionError> {
    match read_frame(tcp, &mut channel.opener, NEGOTIATION_FRAME_LIMIT).await? {
        Message::Propose { protocol } => Ok(protocol),
        _ => Err(ConnectionError::UnexpectedMessage),
    }
}

/// Listener side: answer a proposal.
pub(crate) async fn answer_proposal(
    tcp: &mut TcpStream,
    channel: &mut SecureChannel,
    protocol: String,
    accept: bool,
) -> Result<(), ConnectionError> {
    let reply = if accept {
        Message::Accept { protocol }
    } else {
        Message::Reject { protocol }
    };
    write_frame(tcp, &mut channel.sealer, &reply).await
}

async fn write_frame<W>(
    w: &mut W,
    sealer: &mut FrameSealer,
    msg: &Message,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let frame = sealer.seal(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Read one frame of at most `limit` body bytes. The body buffer grows with
/// the bytes that actually arrive, not with the announced length.
async fn read_frame<R>(
    r: &mut R,
    opener: &mut FrameOpener,
    limit: usize,
) -> Result<Message, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_SIZE];
    r.read_exact(&mut header).await?;
    let len = frame_len(header)?;
    if len > limit {
        return Err(FrameError::TooLarge.into());
    }
    let mut body = Vec::with_capacity(len.min(READ_CHUNK));
    let read = r.take(len as u64).read_to_end(&mut body).await?;
    if read < len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(opener.open(&body)?)
}

/// Hand the socket to two pump tasks and return the application side.
///
/// Inbound: frames -> decrypt -> stream reader; `Close`, EOF or any error
/// ends it and the reader sees end of stream. Outbound: stream writer ->
/// encrypt -> frames; when the writer side is shut down or dropped a `Close`
/// frame is sent. Once both tasks are gone, writes to the stream fail.
pub(crate) fn bridge(tcp: TcpStream, channel: SecureChannel, protocol: ProtocolId) -> Stream {
    let SecureChannel {
        remote,
        mut sealer,
        mut opener,
    } = channel;
    let (app, net) = tokio::io::duplex(STREAM_BUFFER);
    let (mut net_read, mut net_write) = tokio::io::split(net);
    let (mut tcp_read, mut tcp_write) = tcp.into_split();

    tokio::spawn(async move {
        loop {
            match read_frame(&mut tcp_read, &mut opener, STREAM_FRAME_LIMIT).await {
                Ok(Message::Data(bytes)) => {
                    if net_write.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close) => break,
                Ok(other) => {
                    debug!(peer = %remote, ?other, "unexpected frame on open stream");
                    break;
                }
                Err(e) => {
                    debug!(peer = %remote, error = %e, "inbound frames ended");
                    break;
                }
            }
        }
        let _ = net_write.shutdown().await;
    });

    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match net_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let data = Message::Data(buf[..n].to_vec());
            if let Err(e) = write_frame(&mut tcp_write, &mut sealer, &data).await {
                debug!(peer = %remote, error = %e, "outbound frames ended");
                return;
            }
        }
        let _ = write_frame(&mut tcp_write, &mut sealer, &Message::Close).await;
        let _ = tcp_write.shutdown().await;
    });

    Stream::new(remote, protocol, app)
}
