mod plain_tcp_client;
mod tls_tcp_client;

use crate::{ConnectParams, RedlineResult};
use plain_tcp_client::PlainTcpClient;
use std::time::Instant;
use tls_tcp_client::TlsTcpClient;

// The transport of a connection, with or without TLS.
#[derive(Debug)]
pub(crate) enum TcpClient {
    // A blocking tcp connection without TLS.
    Plain(PlainTcpClient),

    // A blocking tcp connection with TLS.
    Tls(TlsTcpClient),

    // Needed if communication issues made the stream unusable.
    Dead,
}

impl TcpClient {
    // Constructs a connected transport, with or without TLS, depending on
    // the given connect parameters. Resolves the host and tries each
    // address in order.
    pub fn try_new(params: &ConnectParams) -> RedlineResult<Self> {
        let start = Instant::now();
        trace!("TcpClient: Connecting to {:?}", params.addr());

        let tcp_conn = if params.is_tls() {
            Self::Tls(TlsTcpClient::try_new(params)?)
        } else {
            Self::Plain(PlainTcpClient::try_new(params)?)
        };

        trace!(
            "Connection of type {} is initialized ({} µs)",
            tcp_conn.s_type(),
            Instant::now().duration_since(start).as_micros(),
        );
        Ok(tcp_conn)
    }

    // Returns a descriptor of the chosen type
    pub fn s_type(&self) -> &'static str {
        match self {
            Self::Plain(_) => "Plain TCP",
            Self::Tls(_) => "TLS TCP",
            Self::Dead => "Physical connection lost",
        }
    }

    pub fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(client) => client.read_some(buf),
            Self::Tls(client) => client.read_some(buf),
            Self::Dead => Err(dead()),
        }
    }

    pub fn write_some(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(client) => client.write_some(buf),
            Self::Tls(client) => client.write_some(buf),
            Self::Dead => Err(dead()),
        }
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> std::io::Result<()> {
        match self {
            Self::Plain(client) => client.set_nonblocking(nonblocking),
            Self::Tls(client) => client.set_nonblocking(nonblocking),
            Self::Dead => Err(dead()),
        }
    }

    // Closes the socket, shutting down TLS cleanly if held.
    pub fn die(&mut self) {
        match self {
            Self::Plain(client) => client.shutdown(),
            Self::Tls(client) => client.shutdown(),
            Self::Dead => {}
        }
        *self = Self::Dead;
    }

    pub fn has_died(&self) -> bool {
        matches!(*self, Self::Dead)
    }
}

fn dead() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "connection lost")
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        trace!("Drop of TcpClient");
    }
}
