//! Command-line configuration. There is no config file and no environment
//! override; everything comes from flags.

use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::host::HostConfig;

#[derive(Debug, Parser)]
#[command(name = "chat-node", version, about = "Peer-to-peer line chat")]
pub struct Cli {
    /// Peer address to dial, e.g. /ip4/127.0.0.1/tcp/10000/p2p/<peer-id>.
    /// Without it the node listens for inbound chats.
    #[arg(short = 'd', long = "dial", value_name = "ADDRESS")]
    pub dial: Option<String>,

    /// Listen port (10000 when listening, 10001 when dialing).
    #[arg(short, long)]
    pub port: Option<u32>,

    /// Seconds allowed for connect, handshake and protocol negotiation.
    #[arg(long, value_name = "SECS", default_value_t = default_dial_timeout_secs())]
    pub dial_timeout: u64,

    /// More log output on stderr (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Listen,
    Dial(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    /// Checked against the valid port range when the listen address is built.
    pub listen_port: u32,
    pub dial_timeout: Duration,
    pub verbosity: u8,
}

fn default_listen_port() -> u32 {
    10000
}

fn default_dial_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Listen,
            listen_port: default_listen_port(),
            dial_timeout: Duration::from_secs(default_dial_timeout_secs()),
            verbosity: 0,
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let role = match cli.dial {
            Some(target) if !target.trim().is_empty() => Role::Dial(target),
            _ => Role::Listen,
        };
        // Dialer sits one port above the listener so both run on one machine.
        let listen_port = cli.port.unwrap_or(match role {
            Role::Listen => default_listen_port(),
            Role::Dial(_) => default_listen_port() + 1,
        });
        Self {
            role,
            listen_port,
            dial_timeout: Duration::from_secs(cli.dial_timeout),
            verbosity: cli.verbose,
        }
    }
}

impl Config {
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            dial_timeout: self.dial_timeout,
            handshake_timeout: self.dial_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let argv = std::iter::once("chat-node").chain(args.iter().copied());
        Config::from(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn no_flags_means_listener_on_default_port() {
        let c = parse(&[]);
        assert_eq!(c.role, Role::Listen);
        assert_eq!(c.listen_port, 10000);
        assert_eq!(c.dial_timeout, Duration::from_secs(10));
        assert_eq!(c.verbosity, 0);
    }

    #[test]
    fn dial_flag_selects_dialer_one_port_up() {
        let c = parse(&["-d", "/ip4/127.0.0.1/tcp/10000/p2p/00"]);
        assert_eq!(c.role, Role::Dial("/ip4/127.0.0.1/tcp/10000/p2p/00".into()));
        assert_eq!(c.listen_port, 10001);
    }

    #[test]
    fn empty_dial_target_listens() {
        assert_eq!(parse(&["-d", ""]).role, Role::Listen);
    }

    #[test]
    fn explicit_port_and_verbosity() {
        let c = parse(&["-p", "12000", "-vv", "--dial-timeout", "3"]);
        assert_eq!(c.listen_port, 12000);
        assert_eq!(c.verbosity, 2);
        assert_eq!(c.host_config().dial_timeout, Duration::from_secs(3));
    }

    #[test]
    fn out_of_range_port_is_passed_through() {
        assert_eq!(parse(&["-p", "70000"]).listen_port, 70000);
    }

    #[test]
    fn default_matches_listener_flags() {
        let d = Config::default();
        let c = parse(&[]);
        assert_eq!(d.role, c.role);
        assert_eq!(d.listen_port, c.listen_port);
    }
}
