use super::tcp_client::TcpClient;
use super::ConnectionCounters;
use crate::protocol::RecvBuffer;
use crate::{clock, Command, ConnectParams, RedlineError, RedlineResult, Reply};
use std::collections::BTreeMap;
use std::sync::Arc;

// Chunk size of a single socket read.
const READ_CHUNK: usize = 512;

// Client intent per subscribed channel or pattern.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SubscribeState {
    // subscribe sent, server ack outstanding
    SendPending,
    // server acked the subscription
    ServerAcked,
    // unsubscribe sent; evicted on ack or on reconnect
    UnsubscribePending,
}

/// The connection state machine: owns the transport, the receive buffer,
/// the connect parameters, and the per-connection counters.
///
/// Lifecycle: created idle, [`init`](Connection::init) performs the full
/// connect sequence. Any I/O failure during subsequent use transitions the
/// connection to disconnected; the next operation re-attempts the connect
/// sequence with the same parameters.
#[derive(Debug)]
pub(crate) struct Connection {
    params: Option<ConnectParams>,
    tcp: TcpClient,
    connected: bool,
    // subscription-mode connections only accept subscribe operations and
    // the message poll
    subscribe: bool,
    // async connections run the socket in non-blocking mode after handshake
    nonblocking: bool,
    recv: RecvBuffer,
    channels: BTreeMap<String, SubscribeState>,
    patterns: BTreeMap<String, SubscribeState>,
    counters: Arc<ConnectionCounters>,
}

impl Connection {
    pub fn new(subscribe: bool, nonblocking: bool) -> Self {
        let counters = Arc::new(ConnectionCounters::default());
        super::register(&counters);
        Self {
            params: None,
            tcp: TcpClient::Dead,
            connected: false,
            subscribe,
            nonblocking,
            recv: RecvBuffer::new(),
            channels: BTreeMap::new(),
            patterns: BTreeMap::new(),
            counters,
        }
    }

    pub fn is_subscribe(&self) -> bool {
        self.subscribe
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn params(&self) -> Option<&ConnectParams> {
        self.params.as_ref()
    }

    pub fn counters(&self) -> &Arc<ConnectionCounters> {
        &self.counters
    }

    /// Stores the parameters and performs the connect sequence.
    pub fn init(&mut self, params: ConnectParams) -> RedlineResult<()> {
        self.params = Some(params);
        if let Err(e) = self.connect() {
            self.params = None;
            return Err(e);
        }
        Ok(())
    }

    /// The connect sequence: resolve, connect, TLS handshake, AUTH or PING
    /// probe, SELECT, resubscribe.
    pub fn connect(&mut self) -> RedlineResult<()> {
        self.close();

        let params = self
            .params
            .clone()
            .ok_or(RedlineError::Usage("connection was never initialized"))?;

        self.tcp = TcpClient::try_new(&params)?;

        // secret set: AUTH; otherwise probe the server with PING
        let probe = if params.auth().unsecure().is_empty() {
            Command::new("PING")
        } else {
            Command::new("AUTH").arg(params.auth().unsecure())
        };
        let reply = self.handshake_roundtrip(&probe)?;
        if reply.is_null() || reply.is_error() {
            self.close();
            error!(
                "handshake refused, host={} port={}: {reply}",
                params.host(),
                params.port()
            );
            return Err(RedlineError::Auth(reply.to_string()));
        }

        if params.db() != 0 {
            let select = Command::new("SELECT").arg(params.db());
            let reply = self.handshake_roundtrip(&select)?;
            if reply.is_null() || reply.is_error() {
                self.close();
                error!("SELECT {} refused: {reply}", params.db());
                return Err(RedlineError::Auth(reply.to_string()));
            }
        }

        self.recv.clear();
        self.connected = true;
        info!(
            "connected, host={} port={} db={} tls={}",
            params.host(),
            params.port(),
            params.db(),
            params.is_tls()
        );

        if self.subscribe || self.nonblocking {
            self.tcp.set_nonblocking(true)?;
        }
        if self.subscribe {
            self.resubscribe()?;
        }
        Ok(())
    }

    // Re-issues every subscription whose last client intent was subscribe;
    // entries with a pending unsubscribe are evicted.
    fn resubscribe(&mut self) -> RedlineResult<()> {
        let channels: Vec<String> = evict_unsubscribed(&mut self.channels);
        let patterns: Vec<String> = evict_unsubscribed(&mut self.patterns);
        for channel in channels {
            info!("resubscribing channel={channel}");
            self.send_command(&Command::new("SUBSCRIBE").arg(&channel))?;
            self.channels.insert(channel, SubscribeState::SendPending);
        }
        for pattern in patterns {
            info!("resubscribing pattern={pattern}");
            self.send_command(&Command::new("PSUBSCRIBE").arg(&pattern))?;
            self.patterns.insert(pattern, SubscribeState::SendPending);
        }
        Ok(())
    }

    /// Connects lazily if the connection was lost and parameters are known.
    pub fn check_connect(&mut self) -> RedlineResult<()> {
        if !self.connected {
            if self.params.is_some() {
                self.connect()?;
            } else {
                return Err(RedlineError::Usage("connection was never initialized"));
            }
        }
        Ok(())
    }

    /// Closes the socket and marks the connection as disconnected.
    /// Subscription state survives so a reconnect can resubscribe.
    pub fn close(&mut self) {
        self.tcp.die();
        self.connected = false;
        self.recv.clear();
    }

    // one send + one reply, used before the connection counts as up
    fn handshake_roundtrip(&mut self, cmd: &Command) -> RedlineResult<Reply> {
        self.send_command(cmd)?;
        match self.read_reply() {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => {
                self.close();
                Err(RedlineError::Protocol(
                    "no reply to handshake command".to_string(),
                ))
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Encodes and sends one command.
    pub fn send_command(&mut self, cmd: &Command) -> RedlineResult<()> {
        let mut bytes = Vec::new();
        cmd.write_to(&mut bytes);
        self.send_encoded(&bytes, 1)
    }

    /// Encodes and sends a batch, concatenated without separators.
    pub fn send_batch(&mut self, cmds: &[Command]) -> RedlineResult<()> {
        let mut bytes = Vec::new();
        for cmd in cmds {
            cmd.write_to(&mut bytes);
        }
        self.send_encoded(&bytes, i64::try_from(cmds.len()).unwrap_or(i64::MAX))
    }

    // Writes the full buffer via repeated write_some until drained.
    fn send_encoded(&mut self, bytes: &[u8], ops: i64) -> RedlineResult<()> {
        self.counters.add_ops(ops);
        let begin = clock::tsc();
        let mut sent = 0_usize;
        while sent < bytes.len() {
            match self.tcp.write_some(&bytes[sent..]) {
                Ok(0) => {
                    return Err(RedlineError::Io {
                        source: std::io::Error::new(
                            std::io::ErrorKind::WriteZero,
                            "socket accepted no bytes",
                        ),
                    });
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // non-blocking socket, kernel buffer full
                    std::thread::yield_now();
                }
                Err(e) => {
                    error!("write error: {e}");
                    return Err(RedlineError::Io { source: e });
                }
            }
        }
        let cost = (clock::tsc() - begin) / clock::tsc_per_us();
        self.counters.add_send(i64::try_from(sent).unwrap_or(0), cost);
        Ok(())
    }

    /// Sends with one reconnect attempt on failure.
    pub fn send_command_with_retry(&mut self, cmd: &Command) -> RedlineResult<()> {
        self.check_connect()?;
        if self.send_command(cmd).is_ok() {
            return Ok(());
        }
        self.connect()?;
        self.send_command(cmd)
    }

    /// Sends a batch with one reconnect attempt on failure.
    pub fn send_batch_with_retry(&mut self, cmds: &[Command]) -> RedlineResult<()> {
        self.check_connect()?;
        if self.send_batch(cmds).is_ok() {
            return Ok(());
        }
        self.connect()?;
        self.send_batch(cmds)
    }

    /// Reads one reply starting at the first unread byte.
    ///
    /// `Ok(None)` means no complete reply is available without blocking
    /// (non-blocking connections, or a subscription poll that timed out).
    /// A framing or transport error leaves the connection to be closed by
    /// the caller.
    pub fn read_reply(&mut self) -> RedlineResult<Option<Reply>> {
        loop {
            if let Some(reply) = self.recv.try_decode()? {
                return Ok(Some(reply));
            }
            if !self.fill_recv_buffer()? {
                return Ok(None);
            }
        }
    }

    // Appends freshly read bytes to the receive buffer. Returns false when
    // no bytes are available without blocking.
    fn fill_recv_buffer(&mut self) -> RedlineResult<bool> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            let begin = clock::tsc();
            let read = self.tcp.read_some(&mut chunk);
            let cost = (clock::tsc() - begin) / clock::tsc_per_us();
            match read {
                Ok(0) => {
                    return Err(RedlineError::Io {
                        source: std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "server closed the connection",
                        ),
                    });
                }
                Ok(n) => {
                    self.counters.add_recv(i64::try_from(n).unwrap_or(0), cost);
                    self.recv.extend(&chunk[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // WouldBlock: non-blocking socket, nothing to read.
                    // TimedOut: a subscription poll in blocking mode may
                    // time out without tearing down the socket.
                    if self.subscribe || self.nonblocking {
                        return Ok(false);
                    }
                    error!("read timed out: {e}");
                    return Err(RedlineError::Io { source: e });
                }
                Err(e) => {
                    error!("read error: {e}");
                    return Err(RedlineError::Io { source: e });
                }
            }
        }
    }

    /// Drops already consumed receive-buffer bytes once it has grown.
    pub fn compact_recv_buffer(&mut self) {
        self.recv.compact_if_large();
    }

    pub fn clear_recv_buffer(&mut self) {
        self.recv.clear();
    }

    /// Temporarily switches the socket mode for one blocking subscription
    /// poll; the mode is restored by the caller on every code path.
    pub fn set_socket_blocking(&mut self, blocking: bool) -> RedlineResult<()> {
        Ok(self.tcp.set_nonblocking(!blocking)?)
    }

    // subscription state accessors, used by the message poll

    pub fn channel_state(&mut self, channel: &str) -> Option<SubscribeState> {
        self.channels.get(channel).copied()
    }

    pub fn set_channel_state(&mut self, channel: &str, state: SubscribeState) {
        self.channels.insert(channel.to_string(), state);
    }

    pub fn set_all_channels_state(&mut self, state: SubscribeState) {
        for s in self.channels.values_mut() {
            *s = state;
        }
    }

    pub fn remove_channel(&mut self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    pub fn pattern_state(&mut self, pattern: &str) -> Option<SubscribeState> {
        self.patterns.get(pattern).copied()
    }

    pub fn set_pattern_state(&mut self, pattern: &str, state: SubscribeState) {
        self.patterns.insert(pattern.to_string(), state);
    }

    pub fn set_all_patterns_state(&mut self, state: SubscribeState) {
        for s in self.patterns.values_mut() {
            *s = state;
        }
    }

    pub fn remove_pattern(&mut self, pattern: &str) -> bool {
        self.patterns.remove(pattern).is_some()
    }
}

// Drops entries with a pending unsubscribe, returns the names to re-send.
fn evict_unsubscribed(map: &mut BTreeMap<String, SubscribeState>) -> Vec<String> {
    map.retain(|_, state| {
        matches!(
            state,
            SubscribeState::SendPending | SubscribeState::ServerAcked
        )
    });
    map.keys().cloned().collect()
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
        super::deregister(&self.counters);
    }
}
