//! Process-level shutdown: the built binary must exit cleanly on SIGINT even
//! while a session's write loop is blocked reading stdin.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_core::{build_listen_address, Keypair};
use chat_node::{HostConfig, Node, SessionState};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// Kills the child if the test bails out before it exits.
struct Running(Child);

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_listener() -> (Running, BufReader<ChildStdout>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_chat-node"))
        .args(["-p", "0"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let stdout = BufReader::new(child.stdout.take().unwrap());
    (Running(child), stdout)
}

fn read_address(mut stdout: BufReader<ChildStdout>) -> (String, BufReader<ChildStdout>) {
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    let address = line
        .trim()
        .strip_prefix("I am ")
        .unwrap_or_else(|| panic!("unexpected first line {line:?}"))
        .to_string();
    (address, stdout)
}

#[tokio::test]
async fn interrupt_exits_with_an_open_session_and_open_stdin() {
    let (mut node, stdout) = spawn_listener();
    let (address, mut stdout) = tokio::task::spawn_blocking(move || read_address(stdout))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let dialer = Node::start(
        Arc::new(Keypair::generate().unwrap()),
        &build_listen_address(0).unwrap(),
        HostConfig::default(),
        cancel.clone(),
    )
    .await
    .unwrap();
    let _stream = dialer.dial(&address).await.unwrap();
    assert_eq!(dialer.state(), SessionState::SessionActive);

    // Let the listener's write loop park on stdin, which the test holds open.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(node.0.try_wait().unwrap().is_none());

    let sent = Command::new("kill")
        .args(["-INT", &node.0.id().to_string()])
        .status()
        .unwrap();
    assert!(sent.success());

    let deadline = Instant::now() + WAIT;
    let status = loop {
        if let Some(status) = node.0.try_wait().unwrap() {
            break status;
        }
        assert!(
            Instant::now() < deadline,
            "node still running {WAIT:?} after SIGINT"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert!(status.success(), "exit status {status}");

    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert!(rest.ends_with("end\n"), "stdout tail {rest:?}");
    cancel.cancel();
}
