use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// Usage counters of one connection.
///
/// All counters are atomic so a metrics snapshot never has to stop the
/// connection. Every connection registers its counters with a process-global
/// set at construction and deregisters at destruction; see
/// [`connection_snapshot`](crate::connection_snapshot).
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    ops: AtomicI64,
    send_bytes: AtomicI64,
    recv_bytes: AtomicI64,
    send_us: AtomicI64,
    recv_us: AtomicI64,
}

impl ConnectionCounters {
    pub(crate) fn add_ops(&self, n: i64) {
        self.ops.fetch_add(n, Ordering::Relaxed);
    }
    pub(crate) fn add_send(&self, bytes: i64, us: i64) {
        self.send_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.send_us.fetch_add(us, Ordering::Relaxed);
    }
    pub(crate) fn add_recv(&self, bytes: i64, us: i64) {
        self.recv_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.recv_us.fetch_add(us, Ordering::Relaxed);
    }

    /// Number of commands sent through this connection.
    pub fn ops(&self) -> i64 {
        self.ops.load(Ordering::Relaxed)
    }
    /// Bytes written to the socket.
    pub fn send_bytes(&self) -> i64 {
        self.send_bytes.load(Ordering::Relaxed)
    }
    /// Bytes read from the socket.
    pub fn recv_bytes(&self) -> i64 {
        self.recv_bytes.load(Ordering::Relaxed)
    }
    /// Time spent in socket writes, in microseconds.
    pub fn send_cost(&self) -> i64 {
        self.send_us.load(Ordering::Relaxed)
    }
    /// Time spent in socket reads, in microseconds.
    pub fn recv_cost(&self) -> i64 {
        self.recv_us.load(Ordering::Relaxed)
    }
    /// Total time spent in socket I/O, in microseconds.
    pub fn net_io_cost(&self) -> i64 {
        self.send_cost() + self.recv_cost()
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.ops.store(0, Ordering::Relaxed);
        self.send_bytes.store(0, Ordering::Relaxed);
        self.recv_bytes.store(0, Ordering::Relaxed);
        self.send_us.store(0, Ordering::Relaxed);
        self.recv_us.store(0, Ordering::Relaxed);
    }
}

lazy_static! {
    static ref LIVE_CONNECTIONS: RwLock<Vec<Arc<ConnectionCounters>>> = RwLock::new(Vec::new());
}

pub(crate) fn register(counters: &Arc<ConnectionCounters>) {
    if let Ok(mut live) = LIVE_CONNECTIONS.write() {
        live.push(Arc::clone(counters));
    }
}

pub(crate) fn deregister(counters: &Arc<ConnectionCounters>) {
    if let Ok(mut live) = LIVE_CONNECTIONS.write() {
        live.retain(|c| !Arc::ptr_eq(c, counters));
    }
}

// Totals over all live connections: ops, sendbytes, recvbytes, sendcost,
// recvcost.
pub(crate) fn aggregate_connection_counters() -> [i64; 5] {
    let mut totals = [0_i64; 5];
    if let Ok(live) = LIVE_CONNECTIONS.read() {
        for c in live.iter() {
            totals[0] += c.ops();
            totals[1] += c.send_bytes();
            totals[2] += c.recv_bytes();
            totals[3] += c.send_cost();
            totals[4] += c.recv_cost();
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::ConnectionCounters;
    use std::sync::Arc;

    #[test]
    fn registry_aggregates_and_forgets() {
        let counters = Arc::new(ConnectionCounters::default());
        counters.add_ops(3);
        counters.add_send(100, 5);
        counters.add_recv(200, 7);

        super::register(&counters);
        let totals = super::aggregate_connection_counters();
        assert!(totals[0] >= 3 && totals[1] >= 100 && totals[2] >= 200);

        super::deregister(&counters);
        counters.reset();
        assert_eq!(counters.ops(), 0);
        assert_eq!(counters.net_io_cost(), 0);
    }
}
