//! Duplex line pump.
//!
//! Two tasks per stream: the read loop moves remote lines to the display, the
//! write loop moves local input lines to the stream. Each loop owns one half
//! of the stream. A loop that ends (end of stream, I/O failure, local input
//! closed) does not signal the other one; the only shared stop path is the
//! process cancellation token.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::stream::Stream;

const REMOTE_COLOR: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";
const PROMPT: &str = "> ";

/// Why a pump loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Remote side closed its write direction.
    EndOfStream,
    /// Local input reached end of file.
    InputClosed,
    /// Read or write error on the stream or local I/O.
    Failed,
    /// Process cancellation.
    Cancelled,
}

/// Read loop: every line from `reader` except a bare `"\n"` is rendered on
/// `display` in green, followed by a fresh prompt.
pub async fn read_loop<R, D>(
    mut reader: R,
    mut display: D,
    cancel: CancellationToken,
) -> PumpExit
where
    R: AsyncBufRead + Unpin,
    D: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            read = reader.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => return PumpExit::EndOfStream,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "stream read failed");
                return PumpExit::Failed;
            }
        }
        if line == b"\n" {
            continue;
        }
        let rendered = format!(
            "{REMOTE_COLOR}{}{RESET}{PROMPT}",
            String::from_utf8_lossy(&line)
        );
        if let Err(e) = write_flush(&mut display, rendered.as_bytes()).await {
            debug!(error = %e, "display write failed");
            return PumpExit::Failed;
        }
    }
}

/// Write loop: prompt on `prompt`, read one line of `input`, send it with an
/// extra `"\n"` appended, flush.
pub async fn write_loop<I, W, P>(
    mut input: I,
    mut writer: W,
    mut prompt: P,
    cancel: CancellationToken,
) -> PumpExit
where
    I: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    P: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    loop {
        if let Err(e) = write_flush(&mut prompt, PROMPT.as_bytes()).await {
            debug!(error = %e, "prompt write failed");
            return PumpExit::Failed;
        }
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            read = input.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => return PumpExit::InputClosed,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "local input failed");
                return PumpExit::Failed;
            }
        }
        line.push(b'\n');
        let sent = tokio::select! {
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            sent = write_flush(&mut writer, &line) => sent,
        };
        if let Err(e) = sent {
            debug!(error = %e, "stream write failed");
            return PumpExit::Failed;
        }
    }
}

async fn write_flush<W>(w: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(bytes).await?;
    w.flush().await
}

/// Handles to the two loops of one session.
pub struct Pump {
    pub read: JoinHandle<PumpExit>,
    pub write: JoinHandle<PumpExit>,
}

/// Start both loops for `stream` over stdin/stdout.
pub fn spawn(stream: Stream, cancel: CancellationToken) -> Pump {
    let span = info_span!("session", peer = %stream.remote_peer());
    let (reader, writer) = tokio::io::split(stream);

    let read_cancel = cancel.clone();
    let read = tokio::spawn(
        async move {
            let exit = read_loop(BufReader::new(reader), tokio::io::stdout(), read_cancel).await;
            debug!(?exit, "read loop ended");
            exit
        }
        .instrument(span.clone()),
    );

    let write = tokio::spawn(
        async move {
            let input = BufReader::new(tokio::io::stdin());
            let exit = write_loop(input, writer, tokio::io::stdout(), cancel).await;
            debug!(?exit, "write loop ended");
            exit
        }
        .instrument(span),
    );

    Pump { read, write }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn read_loop_renders_lines_in_order() {
        let mut out = Vec::new();
        let exit = read_loop(&b"hello\nworld\n"[..], &mut out, CancellationToken::new()).await;
        assert_eq!(exit, PumpExit::EndOfStream);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\x1b[32mhello\n\x1b[0m> \x1b[32mworld\n\x1b[0m> "
        );
    }

    #[tokio::test]
    async fn read_loop_swallows_bare_newlines() {
        let mut out = Vec::new();
        let exit = read_loop(&b"\nhi\n\n\n"[..], &mut out, CancellationToken::new()).await;
        assert_eq!(exit, PumpExit::EndOfStream);
        assert_eq!(String::from_utf8(out).unwrap(), "\x1b[32mhi\n\x1b[0m> ");
    }

    #[tokio::test]
    async fn read_loop_keeps_whitespace_lines() {
        let mut out = Vec::new();
        read_loop(&b" \n\r\n"[..], &mut out, CancellationToken::new()).await;
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\x1b[32m \n\x1b[0m> \x1b[32m\r\n\x1b[0m> "
        );
    }

    #[tokio::test]
    async fn read_loop_shows_unterminated_tail() {
        let mut out = Vec::new();
        read_loop(&b"partial"[..], &mut out, CancellationToken::new()).await;
        assert_eq!(String::from_utf8(out).unwrap(), "\x1b[32mpartial\x1b[0m> ");
    }

    #[tokio::test]
    async fn read_loop_stops_on_cancel() {
        let (_remote, local) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_loop(
            BufReader::new(local),
            tokio::io::sink(),
            cancel.clone(),
        ));
        cancel.cancel();
        assert_eq!(task.await.unwrap(), PumpExit::Cancelled);
    }

    #[tokio::test]
    async fn write_loop_appends_newline_and_prompts() {
        let mut sent = Vec::new();
        let mut prompts = Vec::new();
        let exit = write_loop(
            &b"hello\nbye\n"[..],
            &mut sent,
            &mut prompts,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(exit, PumpExit::InputClosed);
        assert_eq!(sent, b"hello\n\nbye\n\n");
        assert_eq!(prompts, b"> > > ");
    }

    #[tokio::test]
    async fn write_then_read_shows_each_line_once() {
        let mut wire = Vec::new();
        write_loop(
            &b"one\ntwo\n"[..],
            &mut wire,
            tokio::io::sink(),
            CancellationToken::new(),
        )
        .await;
        let mut out = Vec::new();
        read_loop(&wire[..], &mut out, CancellationToken::new()).await;
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\x1b[32mone\n\x1b[0m> \x1b[32mtwo\n\x1b[0m> "
        );
    }

    #[tokio::test]
    async fn write_loop_fails_when_stream_is_gone() {
        let (remote, local) = tokio::io::duplex(64);
        drop(remote);
        let exit = write_loop(
            &b"hello\n"[..],
            local,
            tokio::io::sink(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(exit, PumpExit::Failed);
    }

    #[tokio::test]
    async fn write_loop_fails_when_prompt_is_gone() {
        let (terminal, _) = tokio::io::duplex(8);
        let mut sent = Vec::new();
        let exit = write_loop(
            &b"hello\n"[..],
            &mut sent,
            terminal,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(exit, PumpExit::Failed);
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn write_loop_waits_on_input_until_cancelled() {
        let (mut remote, local) = tokio::io::duplex(64);
        let (_keyboard, input) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(write_loop(
            BufReader::new(input),
            local,
            tokio::io::sink(),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        assert_eq!(task.await.unwrap(), PumpExit::Cancelled);
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
