use crate::conn::{Connection, ConnectionCounters};
use crate::lock::Script;
use crate::{Command, IntoConnectParams, RedlineResult, Reply};
use std::collections::VecDeque;
use std::sync::Arc;

type ReplyCallback = Box<dyn FnOnce(bool, &Reply)>;
type BatchCallback = Box<dyn FnOnce(bool, &[Reply])>;

// What to do once all replies of a queue entry arrived.
enum Continuation {
    Single(ReplyCallback),
    Multi(BatchCallback),
    // EVALSHA in flight; on a NOSCRIPT error reply the command is reissued
    // as EVAL with the source, which both loads and runs the script
    Script {
        script: &'static Script,
        keys: Vec<String>,
        args: Vec<String>,
        callback: ReplyCallback,
    },
}

// One submission: 1..n commands sent in one burst, replies filled in
// arrival order until the counts match.
struct QueueEntry {
    count: usize,
    replies: Vec<Reply>,
    continuation: Continuation,
}

/// A non-blocking connection: [`submit`](AsyncClient::submit) sends
/// immediately and enqueues a continuation, [`poll`](AsyncClient::poll)
/// drains arrived replies and invokes continuations in FIFO order.
///
/// Because the server preserves request order and the queue is FIFO, the
/// i-th reply always belongs to the i-th outstanding command; the
/// guarantee extends across batch submissions.
///
/// Closing the connection is the sole cancellation primitive: it fails
/// every pending continuation exactly once with `ok = false`.
///
/// Single-threaded like the synchronous client; the poll is meant to be
/// driven from an event loop.
pub struct AsyncClient {
    conn: Connection,
    queue: VecDeque<QueueEntry>,
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "AsyncClient {{ {} pending entries }}", self.queue.len())
    }
}

impl AsyncClient {
    /// Factory method for connected clients. The socket is switched to
    /// non-blocking after the handshake.
    pub fn try_new<P: IntoConnectParams>(params: P) -> RedlineResult<Self> {
        let mut conn = Connection::new(false, true);
        conn.init(params.into_connect_params()?)?;
        Ok(Self {
            conn,
            queue: VecDeque::new(),
        })
    }

    /// Whether all submitted commands have been answered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of outstanding submissions.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The usage counters of this connection.
    pub fn counters(&self) -> &Arc<ConnectionCounters> {
        self.conn.counters()
    }

    /// Submits one command; the continuation fires from a later
    /// [`poll`](AsyncClient::poll) with its reply.
    ///
    /// `ok = false` means the command outcome is unknown (the connection
    /// was lost); the reply passed along is empty then.
    pub fn submit<F>(&mut self, cmd: &Command, callback: F) -> RedlineResult<()>
    where
        F: FnOnce(bool, &Reply) + 'static,
    {
        self.submit_entry(cmd, Continuation::Single(Box::new(callback)))
    }

    /// Submits a batch as one write; the continuation fires once with all
    /// replies in submission order.
    pub fn submit_batch<F>(&mut self, cmds: &[Command], callback: F) -> RedlineResult<()>
    where
        F: FnOnce(bool, &[Reply]) + 'static,
    {
        if cmds.is_empty() {
            return Ok(());
        }
        self.conn.send_batch_with_retry(cmds)?;
        self.queue.push_back(QueueEntry {
            count: cmds.len(),
            replies: Vec::with_capacity(cmds.len()),
            continuation: Continuation::Multi(Box::new(callback)),
        });
        Ok(())
    }

    /// Submits a script execution. The first use runs EVAL with the
    /// source; later uses run EVALSHA and fall back to EVAL transparently
    /// when the server reports the script as unknown.
    pub fn script<F>(
        &mut self,
        script: &'static Script,
        keys: Vec<String>,
        args: Vec<String>,
        callback: F,
    ) -> RedlineResult<()>
    where
        F: FnOnce(bool, &Reply) + 'static,
    {
        match script.cached_sha()? {
            Some(sha) => {
                let cmd = evalsha_command(&sha, &keys, &args);
                self.submit_entry(
                    &cmd,
                    Continuation::Script {
                        script,
                        keys,
                        args,
                        callback: Box::new(callback),
                    },
                )
            }
            None => {
                let cmd = eval_command(script.source(), &keys, &args);
                self.submit_entry(&cmd, Continuation::Single(Box::new(callback)))
            }
        }
    }

    fn submit_entry(&mut self, cmd: &Command, continuation: Continuation) -> RedlineResult<()> {
        if self.conn.is_subscribe() {
            return Err(crate::RedlineError::Usage(
                "subscription-mode connections cannot execute commands",
            ));
        }
        self.conn.send_command_with_retry(cmd)?;
        self.queue.push_back(QueueEntry {
            count: 1,
            replies: Vec::with_capacity(1),
            continuation,
        });
        Ok(())
    }

    /// Drains every reply currently available and invokes the completed
    /// continuations, oldest first. Returns without blocking when the
    /// socket has nothing more to offer.
    ///
    /// On a transport or framing error the connection is closed and every
    /// queued continuation fires once with `ok = false`.
    pub fn poll(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        if self.conn.check_connect().is_err() {
            return;
        }

        while !self.queue.is_empty() {
            match self.conn.read_reply() {
                Ok(Some(reply)) => {
                    let head = self.queue.front_mut().expect("queue checked non-empty");
                    if let Reply::Err(text) = &reply {
                        error!("command error in async reply: {text}");
                    }
                    head.replies.push(reply);
                    if head.replies.len() == head.count {
                        let entry = self.queue.pop_front().expect("head exists");
                        self.complete(entry);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("async reply read failed, {} pending: {e}", self.queue.len());
                    self.close();
                    return;
                }
            }
        }

        self.conn.compact_recv_buffer();
    }

    fn complete(&mut self, entry: QueueEntry) {
        match entry.continuation {
            Continuation::Single(callback) => {
                callback(true, &entry.replies[0]);
            }
            Continuation::Multi(callback) => {
                callback(true, &entry.replies);
            }
            Continuation::Script {
                script,
                keys,
                args,
                callback,
            } => {
                let reply = &entry.replies[0];
                let cache_miss = reply
                    .error_text()
                    .is_some_and(|text| text.starts_with("NOSCRIPT"));
                if cache_miss {
                    // the cached sha stays valid: it is the sha of the
                    // source, and the EVAL below re-loads it on the server
                    debug!("script cache miss, reissuing as EVAL");
                    let cmd = eval_command(script.source(), &keys, &args);
                    if self.conn.send_command_with_retry(&cmd).is_ok() {
                        self.queue.push_back(QueueEntry {
                            count: 1,
                            replies: Vec::with_capacity(1),
                            continuation: Continuation::Single(callback),
                        });
                    } else {
                        error!("EVAL reissue failed, failing the continuation");
                        callback(false, &Reply::Null);
                    }
                } else {
                    callback(true, reply);
                }
            }
        }
    }

    /// Closes the connection and fails every pending continuation exactly
    /// once. The next submission reconnects.
    pub fn close(&mut self) {
        self.conn.close();
        let empty_reply = Reply::Null;
        let empty_batch: Vec<Reply> = Vec::new();
        for entry in std::mem::take(&mut self.queue) {
            match entry.continuation {
                Continuation::Single(callback) | Continuation::Script { callback, .. } => {
                    callback(false, &empty_reply);
                }
                Continuation::Multi(callback) => callback(false, &empty_batch),
            }
        }
    }
}

fn eval_command(source: &str, keys: &[String], args: &[String]) -> Command {
    Command::new("EVAL")
        .arg(source)
        .arg(keys.len())
        .args(keys.iter())
        .args(args.iter())
}

fn evalsha_command(sha1: &str, keys: &[String], args: &[String]) -> Command {
    Command::new("EVALSHA")
        .arg(sha1)
        .arg(keys.len())
        .args(keys.iter())
        .args(args.iter())
}
