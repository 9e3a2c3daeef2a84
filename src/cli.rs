//! Command line interface for the `wiremux` demo binary.
//!
//! The binary opens one connection and issues concurrent correlated requests
//! over it, against a loopback echo peer unless `--connect` names a real one.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `wiremux` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wiremux",
    version,
    about = "Issue concurrent correlated requests over one connection"
)]
pub struct Cli {
    /// Number of concurrent requests to issue.
    #[arg(short, long, default_value_t = 8)]
    pub requests: u32,

    /// Size of each request body in bytes.
    #[arg(long, default_value_t = 32)]
    pub payload_size: usize,

    /// Peer to connect to instead of the built-in loopback echo peer.
    #[arg(long)]
    pub connect: Option<SocketAddr>,

    /// Close the connection after this many seconds.
    #[arg(long)]
    pub max_lifetime_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_to_eight_loopback_requests() {
        let cli = Cli::parse_from(["wiremux"]);
        assert_eq!(cli.requests, 8);
        assert!(cli.connect.is_none());
    }

    #[test]
    fn parses_request_count_and_peer() {
        let cli = Cli::parse_from(["wiremux", "--requests", "3", "--connect", "127.0.0.1:4000"]);
        assert_eq!(cli.requests, 3);
        assert_eq!(cli.connect.map(|addr| addr.port()), Some(4000));
    }
}
