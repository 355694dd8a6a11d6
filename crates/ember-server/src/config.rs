use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use ember::IDLE_TIMEOUT_MS;

/// In-memory key-value server speaking the framed binary protocol.
#[derive(Debug, Clone, Parser)]
#[command(name = "ember-server", version)]
pub struct Opts {
    /// Address to listen on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// TCP port. 0 picks an ephemeral port.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Seconds a connection may stay silent before it is evicted.
    #[arg(long, default_value_t = IDLE_TIMEOUT_MS / 1_000)]
    pub idle_timeout_secs: u64,

    /// Kernel SO_SNDBUF/SO_RCVBUF override for accepted sockets, in bytes.
    #[arg(long)]
    pub socket_buf_size: Option<usize>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 6379,
            idle_timeout_secs: IDLE_TIMEOUT_MS / 1_000,
            socket_buf_size: None,
        }
    }
}

impl Opts {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_secs.saturating_mul(1_000)
    }
}
