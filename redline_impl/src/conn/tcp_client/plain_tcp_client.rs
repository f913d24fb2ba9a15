use crate::{ConnectParams, RedlineError, RedlineResult};
use socket2::SockRef;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

// Kernel timeouts bounding any single send/recv syscall.
const SEND_TIMEOUT: Duration = Duration::from_secs(4);
const RECV_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug)]
pub(crate) struct PlainTcpClient {
    stream: TcpStream,
}

impl PlainTcpClient {
    // Resolves the host and returns a connected and configured tcp stream
    // for the first address that accepts the connection.
    pub fn try_new(params: &ConnectParams) -> RedlineResult<Self> {
        Ok(Self {
            stream: try_connect(params)?,
        })
    }

    pub fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }

    pub fn write_some(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> std::io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub(super) fn try_connect(params: &ConnectParams) -> RedlineResult<TcpStream> {
    let addrs: Vec<_> = params
        .addr()
        .to_socket_addrs()
        .map_err(|e| {
            error!("no valid server address, addr={}: {e}", params.addr());
            RedlineError::Io { source: e }
        })?
        .collect();
    if addrs.is_empty() {
        return Err(RedlineError::conn_params(
            format!("host {} did not resolve to any address", params.host()).into(),
        ));
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                stream.set_write_timeout(Some(SEND_TIMEOUT))?;
                stream.set_read_timeout(Some(RECV_TIMEOUT))?;
                stream.set_nodelay(true)?;
                SockRef::from(&stream).set_keepalive(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("connect to {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    let e = last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address connected")
    });
    error!("connect failed, host={} port={}: {e}", params.host(), params.port());
    Err(RedlineError::Io { source: e })
}
