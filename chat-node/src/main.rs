// Peer chat node: print our address, then listen or dial and pump lines until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_core::{build_listen_address, Keypair};
use chat_node::config::{Cli, Config, Role};
use chat_node::{pump, Node};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// How long in-flight tasks get to finish once the process is told to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    let config = Config::from(Cli::parse());
    init_tracing(config.verbosity);

    let rt = tokio::runtime::Runtime::new().context("starting runtime")?;
    let result = rt.block_on(run(config));
    // A pending stdin read sits on a blocking-pool thread and never returns on
    // its own; dropping the runtime would wait for it.
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let keypair = Arc::new(Keypair::generate().context("generating identity")?);
    let listen = build_listen_address(config.listen_port).context("building listen address")?;
    let node = Node::start(keypair, &listen, config.host_config(), cancel.clone())
        .await
        .context("starting host")?;

    println!("I am {}", node.address());

    match &config.role {
        Role::Dial(target) => match node.dial(target).await {
            Ok(stream) => {
                pump::spawn(stream, cancel.clone());
            }
            // The node stays up with no session until interrupted.
            Err(e) => println!("{e}"),
        },
        Role::Listen => {
            let sessions = cancel.clone();
            node.listen(move |stream| {
                pump::spawn(stream, sessions.clone());
            })
            .await;
        }
    }

    shutdown_signal().await?;
    cancel.cancel();
    println!("end");
    Ok(())
}

/// Logs go to stderr; stdout is the chat transcript.
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("waiting for Ctrl+C")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    }
    Ok(())
}
