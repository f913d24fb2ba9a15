// advisable because not all test modules use all functions of this module:
#![allow(dead_code)]

//! An in-process server speaking the wire protocol, backed by a real
//! keyspace, so the test suite runs without external infrastructure.
//!
//! The server routes PUBLISH to its subscribers and emulates the lock
//! scripts of the crate (recognized by shape at EVAL/SCRIPT LOAD time), so
//! the lock scenarios run end to end.

use flexi_logger::{opt_format, Logger, LoggerHandle};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Returns a logger that prints out all info, warn and error messages.
pub fn init_logger() -> LoggerHandle {
    Logger::try_with_env_or_str("info")
        .unwrap()
        .format(opt_format)
        .start()
        .unwrap_or_else(|e| panic!("Logger initialization failed with {e}"))
}

// ---------------------------------------------------------------------
// keyspace
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(HashSet<String>),
    ZSet(Vec<(i64, String)>), // kept sorted by (score, member)
}

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    expiries: HashMap<String, Instant>,
    scripts: HashMap<String, String>,
    // channel -> subscriber outboxes
    subscribers: HashMap<String, Vec<(u64, Sender<(String, String)>)>>,
    // pattern -> subscriber outboxes
    psubscribers: HashMap<String, Vec<(u64, Sender<(String, String)>)>>,
    log: Vec<String>,
    auth: Option<String>,
}

impl State {
    fn expire_check(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if Instant::now() >= *deadline {
                self.expiries.remove(key);
                self.values.remove(key);
            }
        }
    }

    fn get_str(&mut self, key: &str) -> Option<String> {
        self.expire_check(key);
        match self.values.get(key) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn set_str(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), Value::Str(value));
        self.expiries.remove(key);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expire_check(key);
        self.expiries.remove(key);
        self.values.remove(key).is_some()
    }

    fn incr_by(&mut self, key: &str, by: i64) -> Result<i64, String> {
        let current = match self.get_str(key) {
            Some(s) => s
                .parse::<i64>()
                .map_err(|_| "ERR value is not an integer or out of range".to_string())?,
            None => {
                if self.values.contains_key(key) {
                    return Err("WRONGTYPE Operation against a key holding the wrong kind of value"
                        .to_string());
                }
                0
            }
        };
        let next = current + by;
        self.set_str(key, next.to_string());
        Ok(next)
    }

    fn hash_entry(&mut self, key: &str) -> &mut HashMap<String, String> {
        self.expire_check(key);
        match self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(h) => h,
            _ => panic!("wrong type for {key}"),
        }
    }

    fn zset_entry(&mut self, key: &str) -> &mut Vec<(i64, String)> {
        self.expire_check(key);
        match self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::ZSet(Vec::new()))
        {
            Value::ZSet(z) => z,
            _ => panic!("wrong type for {key}"),
        }
    }

    fn zadd(&mut self, key: &str, score: i64, member: &str) -> i64 {
        let z = self.zset_entry(key);
        let added = if let Some(pos) = z.iter().position(|(_, m)| m == member) {
            z.remove(pos);
            0
        } else {
            1
        };
        z.push((score, member.to_string()));
        z.sort();
        added
    }

    fn zrem(&mut self, key: &str, member: &str) -> i64 {
        let z = self.zset_entry(key);
        match z.iter().position(|(_, m)| m == member) {
            Some(pos) => {
                z.remove(pos);
                1
            }
            None => 0,
        }
    }

    fn zrank(&mut self, key: &str, member: &str) -> Option<i64> {
        let z = self.zset_entry(key);
        z.iter().position(|(_, m)| m == member).map(|p| p as i64)
    }

    // lowest-score member
    fn zfirst(&mut self, key: &str) -> Option<String> {
        self.zset_entry(key).first().map(|(_, m)| m.clone())
    }

    // Delivers to every matching subscriber, returns the receiver count.
    fn publish(&mut self, channel: &str, msg: &str) -> i64 {
        let mut count = 0;
        if let Some(subs) = self.subscribers.get_mut(channel) {
            subs.retain(|(_, tx)| tx.send((channel.to_string(), msg.to_string())).is_ok());
            count += subs.len() as i64;
        }
        for (pattern, subs) in &mut self.psubscribers {
            if glob_match(pattern, channel) {
                subs.retain(|(_, tx)| tx.send((channel.to_string(), msg.to_string())).is_ok());
                count += subs.len() as i64;
            }
        }
        count
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(c), Some(d)) if c == d || *c == b'?' => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

// ---------------------------------------------------------------------
// script emulation
// ---------------------------------------------------------------------
//
// The server cannot run Lua; instead the six scripts shipped by the crate
// are recognized by distinctive fragments of their source and emulated
// against the keyspace, atomically under the state mutex.

#[derive(Clone, Copy, Debug)]
enum KnownScript {
    ScopedUnlock,
    RecursiveLock,
    RecursiveUnlock,
    WaitAcquire,
    WaitRelease,
    WaitCheck,
    ReturnOne,
}

fn classify_script(source: &str) -> Option<KnownScript> {
    if source.trim() == "return 1" {
        Some(KnownScript::ReturnOne)
    } else if source.contains("_lock_wait_score_") {
        Some(KnownScript::WaitAcquire)
    } else if source.contains(":wait") && source.contains("ARGV[1]") {
        Some(KnownScript::WaitRelease)
    } else if source.contains(":wait") {
        Some(KnownScript::WaitCheck)
    } else if source.contains("l:n") && source.contains("PEXPIRE") {
        Some(KnownScript::RecursiveLock)
    } else if source.contains("l:n") {
        Some(KnownScript::RecursiveUnlock)
    } else if source.contains("DEL") {
        Some(KnownScript::ScopedUnlock)
    } else {
        None
    }
}

fn run_script(
    state: &mut State,
    script: KnownScript,
    keys: &[String],
    args: &[String],
) -> Frame {
    match script {
        KnownScript::ReturnOne => Frame::Int(1),
        KnownScript::ScopedUnlock => {
            let key = &keys[0];
            match state.get_str(key) {
                None => Frame::Int(1),
                Some(v) if v == args[0] => {
                    state.remove(key);
                    Frame::Int(1)
                }
                Some(_) => Frame::Int(0),
            }
        }
        KnownScript::RecursiveLock => {
            let key = &keys[0];
            let (id, px) = (&args[0], args[1].parse::<u64>().unwrap_or(0));
            state.expire_check(key);
            let owner = state.hash_entry(key).get("l:v").cloned();
            let ok = match owner {
                None => {
                    let fields = state.hash_entry(key);
                    fields.insert("l:v".to_string(), id.clone());
                    fields.insert("l:n".to_string(), "1".to_string());
                    true
                }
                Some(v) if v == *id => {
                    let n: i64 = state
                        .hash_entry(key)
                        .get("l:n")
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                    state
                        .hash_entry(key)
                        .insert("l:n".to_string(), (n + 1).to_string());
                    true
                }
                Some(_) => false,
            };
            if ok {
                state
                    .expiries
                    .insert(key.clone(), Instant::now() + Duration::from_millis(px));
                Frame::Int(1)
            } else {
                Frame::Int(0)
            }
        }
        KnownScript::RecursiveUnlock => {
            let key = &keys[0];
            let id = &args[0];
            state.expire_check(key);
            if !state.values.contains_key(key) {
                return Frame::Int(1);
            }
            let owner = state.hash_entry(key).get("l:v").cloned();
            match owner {
                None => Frame::Int(1),
                Some(v) if v == *id => {
                    let n: i64 = state
                        .hash_entry(key)
                        .get("l:n")
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0)
                        - 1;
                    if n <= 0 {
                        state.remove(key);
                    } else {
                        state
                            .hash_entry(key)
                            .insert("l:n".to_string(), n.to_string());
                    }
                    Frame::Int(1)
                }
                Some(_) => Frame::Int(0),
            }
        }
        KnownScript::WaitAcquire => {
            let key = &keys[0];
            let (lockid, px, channel) = (
                &args[0],
                args[1].parse::<u64>().unwrap_or(0),
                &args[2],
            );
            let waitkey = format!("{key}:wait");
            let waitlock = format!("{channel}:{lockid}");
            state.expire_check(key);
            if state.get_str(key).is_none() && !state.values.contains_key(key.as_str()) {
                state.set_str(key, lockid.clone());
                state
                    .expiries
                    .insert(key.clone(), Instant::now() + Duration::from_millis(px));
                state.zrem(&waitkey, &waitlock);
                Frame::Int(1)
            } else {
                if state.zrank(&waitkey, &waitlock).is_none() {
                    let score = state.incr_by("_lock_wait_score_", 1).unwrap_or(0);
                    state.zadd(&waitkey, score, &waitlock);
                }
                Frame::Int(0)
            }
        }
        KnownScript::WaitRelease => {
            let key = &keys[0];
            let lockid = &args[0];
            match state.get_str(key) {
                Some(v) if v != *lockid => return Frame::Int(0),
                Some(_) => {
                    state.remove(key);
                }
                None => {}
            }
            notify_next_waiter(state, key);
            Frame::Int(1)
        }
        KnownScript::WaitCheck => {
            let key = &keys[0];
            if state.get_str(key).is_none() {
                notify_next_waiter(state, key);
            }
            Frame::Null
        }
    }
}

fn notify_next_waiter(state: &mut State, key: &str) {
    let waitkey = format!("{key}:wait");
    while let Some(waitlock) = state.zfirst(&waitkey) {
        match waitlock.split_once(':') {
            Some((channel, lockid)) => {
                let (channel, lockid) = (channel.to_string(), lockid.to_string());
                if state.publish(&channel, &lockid) > 0 {
                    break;
                }
                state.zrem(&waitkey, &waitlock);
            }
            None => {
                state.zrem(&waitkey, &waitlock);
            }
        }
    }
}

// ---------------------------------------------------------------------
// wire frames
// ---------------------------------------------------------------------

enum Frame {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(String),
    Null,
    Array(Vec<Frame>),
}

fn write_frame(out: &mut Vec<u8>, frame: &Frame) {
    match frame {
        Frame::Simple(s) => {
            out.extend_from_slice(format!("+{s}\r\n").as_bytes());
        }
        Frame::Error(s) => {
            out.extend_from_slice(format!("-{s}\r\n").as_bytes());
        }
        Frame::Int(n) => {
            out.extend_from_slice(format!(":{n}\r\n").as_bytes());
        }
        Frame::Bulk(s) => {
            out.extend_from_slice(format!("${}\r\n{s}\r\n", s.len()).as_bytes());
        }
        Frame::Null => out.extend_from_slice(b"$-1\r\n"),
        Frame::Array(elements) => {
            out.extend_from_slice(format!("*{}\r\n", elements.len()).as_bytes());
            for element in elements {
                write_frame(out, element);
            }
        }
    }
}

// Parses one array-of-bulk-strings request; returns None if incomplete.
fn parse_command(buf: &mut Vec<u8>) -> Option<Vec<String>> {
    let mut pos = 0_usize;
    let count = {
        let line = read_line(buf, &mut pos)?;
        if line.first() != Some(&b'*') {
            // desynchronized client; drop the connection by panicking the
            // handler thread
            panic!("mock server: unexpected request framing");
        }
        String::from_utf8_lossy(&line[1..]).parse::<usize>().ok()?
    };
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len = {
            let line = read_line(buf, &mut pos)?;
            if line.first() != Some(&b'$') {
                panic!("mock server: unexpected argument framing");
            }
            String::from_utf8_lossy(&line[1..]).parse::<usize>().ok()?
        };
        if buf.len() < pos + len + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[pos..pos + len]).into_owned());
        pos += len + 2;
    }
    buf.drain(..pos);
    Some(args)
}

fn read_line(buf: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    let start = *pos;
    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            *pos = i + 2;
            return Some(buf[start..i].to_vec());
        }
        i += 1;
    }
    None
}

// ---------------------------------------------------------------------
// the server
// ---------------------------------------------------------------------

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct MockServer {
    port: u16,
    state: Arc<Mutex<State>>,
    shutdown: Arc<AtomicBool>,
}

impl MockServer {
    pub fn start() -> Self {
        Self::start_with(None)
    }

    pub fn start_with_auth(auth: &str) -> Self {
        Self::start_with(Some(auth.to_string()))
    }

    fn start_with(auth: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State {
            auth,
            ..State::default()
        }));
        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_accept_loop(listener, Arc::clone(&state), Arc::clone(&shutdown));
        Self {
            port,
            state,
            shutdown,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port)
    }

    pub fn url_with(&self, auth: &str, db: u8) -> String {
        format!("redis://:{auth}@127.0.0.1:{}/{db}", self.port)
    }

    // Uppercased command lines, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().unwrap().log.clear();
    }

    // Closes the listener and every open connection.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(80));
    }

    // Brings the server back on the same port with the same keyspace.
    pub fn restart(&mut self) {
        self.stop();
        let deadline = Instant::now() + Duration::from_secs(3);
        let listener = loop {
            match TcpListener::bind(("127.0.0.1", self.port)) {
                Ok(listener) => break listener,
                Err(e) if Instant::now() < deadline => {
                    let _ = e;
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => panic!("rebind failed: {e}"),
            }
        };
        self.shutdown = Arc::new(AtomicBool::new(false));
        spawn_accept_loop(listener, Arc::clone(&self.state), Arc::clone(&self.shutdown));
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_accept_loop(listener: TcpListener, state: Arc<Mutex<State>>, shutdown: Arc<AtomicBool>) {
    listener.set_nonblocking(true).unwrap();
    std::thread::spawn(move || loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let state = Arc::clone(&state);
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || handle_connection(stream, &state, &shutdown));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return,
        }
    });
}

struct ConnCtx {
    id: u64,
    // channels/patterns this connection is subscribed to
    channels: HashSet<String>,
    patterns: HashSet<String>,
    outbox_rx: Receiver<(String, String)>,
    outbox_tx: Sender<(String, String)>,
}

fn handle_connection(mut stream: TcpStream, state: &Arc<Mutex<State>>, shutdown: &Arc<AtomicBool>) {
    stream
        .set_read_timeout(Some(Duration::from_millis(20)))
        .unwrap();
    let (outbox_tx, outbox_rx) = std::sync::mpsc::channel();
    let mut ctx = ConnCtx {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        channels: HashSet::new(),
        patterns: HashSet::new(),
        outbox_rx,
        outbox_tx,
    };

    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        if shutdown.load(Ordering::SeqCst) {
            cleanup_subscriber(state, &ctx);
            return;
        }

        if let Some(args) = parse_command(&mut buf) {
            let mut out = Vec::new();
            handle_command(state, &mut ctx, &args, &mut out);
            if !out.is_empty() && stream.write_all(&out).is_err() {
                cleanup_subscriber(state, &ctx);
                return;
            }
            continue;
        }

        match stream.read(&mut chunk) {
            Ok(0) => {
                cleanup_subscriber(state, &ctx);
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // idle; push pending pub/sub messages
                let mut out = Vec::new();
                while let Ok((channel, msg)) = ctx.outbox_rx.try_recv() {
                    write_frame(
                        &mut out,
                        &Frame::Array(vec![
                            Frame::Bulk("message".to_string()),
                            Frame::Bulk(channel),
                            Frame::Bulk(msg),
                        ]),
                    );
                }
                if !out.is_empty() && stream.write_all(&out).is_err() {
                    cleanup_subscriber(state, &ctx);
                    return;
                }
            }
            Err(_) => {
                cleanup_subscriber(state, &ctx);
                return;
            }
        }
    }
}

fn cleanup_subscriber(state: &Arc<Mutex<State>>, ctx: &ConnCtx) {
    let mut state = state.lock().unwrap();
    for subs in state.subscribers.values_mut() {
        subs.retain(|(id, _)| *id != ctx.id);
    }
    for subs in state.psubscribers.values_mut() {
        subs.retain(|(id, _)| *id != ctx.id);
    }
}

fn sha1_hex(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[allow(clippy::too_many_lines)]
fn handle_command(
    state: &Arc<Mutex<State>>,
    ctx: &mut ConnCtx,
    args: &[String],
    out: &mut Vec<u8>,
) {
    let mut state = state.lock().unwrap();
    let name = args[0].to_uppercase();
    state.log.push(
        std::iter::once(name.clone())
            .chain(args[1..].iter().cloned())
            .collect::<Vec<_>>()
            .join(" "),
    );

    let frame = match name.as_str() {
        "PING" => Frame::Simple("PONG".to_string()),
        "ECHO" => Frame::Bulk(args[1].clone()),
        "AUTH" => match &state.auth {
            Some(expected) if *expected == args[1] => Frame::Simple("OK".to_string()),
            Some(_) => Frame::Error("ERR invalid password".to_string()),
            None => Frame::Error(
                "ERR Client sent AUTH, but no password is set".to_string(),
            ),
        },
        "SELECT" => Frame::Simple("OK".to_string()),
        "SET" => {
            let (key, value) = (&args[1], args[2].clone());
            let mut px: Option<u64> = None;
            let mut nx = false;
            let mut i = 3;
            while i < args.len() {
                match args[i].to_uppercase().as_str() {
                    "EX" => {
                        px = args.get(i + 1).and_then(|s| s.parse().ok()).map(|s: u64| s * 1000);
                        i += 2;
                    }
                    "PX" => {
                        px = args.get(i + 1).and_then(|s| s.parse().ok());
                        i += 2;
                    }
                    "NX" => {
                        nx = true;
                        i += 1;
                    }
                    _ => i += 1,
                }
            }
            state.expire_check(key);
            if nx && state.values.contains_key(key.as_str()) {
                Frame::Null
            } else {
                state.set_str(key, value);
                if let Some(px) = px {
                    state
                        .expiries
                        .insert(key.clone(), Instant::now() + Duration::from_millis(px));
                }
                Frame::Simple("OK".to_string())
            }
        }
        "GET" => match state.get_str(&args[1]) {
            Some(v) => Frame::Bulk(v),
            None => Frame::Null,
        },
        "DEL" => {
            let mut n = 0;
            for key in &args[1..] {
                if state.remove(key) {
                    n += 1;
                }
            }
            Frame::Int(n)
        }
        "EXISTS" => {
            state.expire_check(&args[1]);
            Frame::Int(i64::from(state.values.contains_key(args[1].as_str())))
        }
        "EXPIRE" | "PEXPIRE" => {
            state.expire_check(&args[1]);
            if state.values.contains_key(args[1].as_str()) {
                let n: u64 = args[2].parse().unwrap_or(0);
                let millis = if name == "EXPIRE" { n * 1000 } else { n };
                state.expiries.insert(
                    args[1].clone(),
                    Instant::now() + Duration::from_millis(millis),
                );
                Frame::Int(1)
            } else {
                Frame::Int(0)
            }
        }
        "TTL" | "PTTL" => {
            state.expire_check(&args[1]);
            if !state.values.contains_key(args[1].as_str()) {
                Frame::Int(-2)
            } else {
                match state.expiries.get(args[1].as_str()) {
                    Some(deadline) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        Frame::Int(if name == "TTL" {
                            left.as_secs() as i64
                        } else {
                            left.as_millis() as i64
                        })
                    }
                    None => Frame::Int(-1),
                }
            }
        }
        "INCR" => match state.incr_by(&args[1], 1) {
            Ok(n) => Frame::Int(n),
            Err(e) => Frame::Error(e),
        },
        "INCRBY" => match state.incr_by(&args[1], args[2].parse().unwrap_or(0)) {
            Ok(n) => Frame::Int(n),
            Err(e) => Frame::Error(e),
        },
        "MSET" => {
            for pair in args[1..].chunks_exact(2) {
                state.set_str(&pair[0], pair[1].clone());
            }
            Frame::Simple("OK".to_string())
        }
        "MGET" => Frame::Array(
            args[1..]
                .iter()
                .map(|key| match state.get_str(key) {
                    Some(v) => Frame::Bulk(v),
                    None => Frame::Null,
                })
                .collect(),
        ),
        "HSET" => {
            let added = i64::from(
                state
                    .hash_entry(&args[1])
                    .insert(args[2].clone(), args[3].clone())
                    .is_none(),
            );
            Frame::Int(added)
        }
        "HGET" => match state.hash_entry(&args[1]).get(&args[2]) {
            Some(v) => Frame::Bulk(v.clone()),
            None => Frame::Null,
        },
        "HMSET" => {
            for pair in args[2..].chunks_exact(2) {
                state.hash_entry(&args[1]).insert(pair[0].clone(), pair[1].clone());
            }
            Frame::Simple("OK".to_string())
        }
        "HMGET" => {
            let fields: Vec<Frame> = args[2..]
                .iter()
                .map(|field| match state.hash_entry(&args[1]).get(field) {
                    Some(v) => Frame::Bulk(v.clone()),
                    None => Frame::Null,
                })
                .collect();
            Frame::Array(fields)
        }
        "HGETALL" => {
            state.expire_check(&args[1]);
            match state.values.get(args[1].as_str()) {
                Some(Value::Hash(h)) => {
                    let mut rows: Vec<(String, String)> =
                        h.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    rows.sort();
                    Frame::Array(
                        rows.into_iter()
                            .flat_map(|(k, v)| [Frame::Bulk(k), Frame::Bulk(v)])
                            .collect(),
                    )
                }
                Some(_) => Frame::Error(
                    "WRONGTYPE Operation against a key holding the wrong kind of value"
                        .to_string(),
                ),
                None => Frame::Array(vec![]),
            }
        }
        "HDEL" => {
            let mut n = 0;
            for field in &args[2..] {
                if state.hash_entry(&args[1]).remove(field).is_some() {
                    n += 1;
                }
            }
            Frame::Int(n)
        }
        "HLEN" => Frame::Int(state.hash_entry(&args[1]).len() as i64),
        "HEXISTS" => Frame::Int(i64::from(state.hash_entry(&args[1]).contains_key(&args[2]))),
        "HINCRBY" => {
            let by: i64 = args[3].parse().unwrap_or(0);
            let fields = state.hash_entry(&args[1]);
            let n = fields.get(&args[2]).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0) + by;
            fields.insert(args[2].clone(), n.to_string());
            Frame::Int(n)
        }
        "HSCAN" => {
            // a single full step: cursor 0 plus all pairs
            let mut rows: Vec<(String, String)> = state
                .hash_entry(&args[1])
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            rows.sort();
            Frame::Array(vec![
                Frame::Bulk("0".to_string()),
                Frame::Array(
                    rows.into_iter()
                        .flat_map(|(k, v)| [Frame::Bulk(k), Frame::Bulk(v)])
                        .collect(),
                ),
            ])
        }
        "LPUSH" | "RPUSH" => {
            state.expire_check(&args[1]);
            let list = match state
                .values
                .entry(args[1].clone())
                .or_insert_with(|| Value::List(VecDeque::new()))
            {
                Value::List(l) => l,
                _ => panic!("wrong type"),
            };
            for v in &args[2..] {
                if name == "LPUSH" {
                    list.push_front(v.clone());
                } else {
                    list.push_back(v.clone());
                }
            }
            Frame::Int(list.len() as i64)
        }
        "LPOP" | "RPOP" => {
            state.expire_check(&args[1]);
            match state.values.get_mut(args[1].as_str()) {
                Some(Value::List(list)) => {
                    let v = if name == "LPOP" {
                        list.pop_front()
                    } else {
                        list.pop_back()
                    };
                    match v {
                        Some(v) => Frame::Bulk(v),
                        None => Frame::Null,
                    }
                }
                _ => Frame::Null,
            }
        }
        "LRANGE" => {
            state.expire_check(&args[1]);
            match state.values.get(args[1].as_str()) {
                Some(Value::List(list)) => {
                    let len = list.len() as i64;
                    let norm = |i: i64| -> i64 {
                        if i < 0 {
                            (len + i).max(0)
                        } else {
                            i.min(len)
                        }
                    };
                    let start = norm(args[2].parse().unwrap_or(0));
                    let stop = norm(args[3].parse().unwrap_or(-1));
                    Frame::Array(
                        list.iter()
                            .skip(start as usize)
                            .take((stop - start + 1).max(0) as usize)
                            .map(|v| Frame::Bulk(v.clone()))
                            .collect(),
                    )
                }
                _ => Frame::Array(vec![]),
            }
        }
        "LLEN" => {
            state.expire_check(&args[1]);
            match state.values.get(args[1].as_str()) {
                Some(Value::List(list)) => Frame::Int(list.len() as i64),
                _ => Frame::Int(0),
            }
        }
        "LREM" => {
            let count: i64 = args[2].parse().unwrap_or(0);
            match state.values.get_mut(args[1].as_str()) {
                Some(Value::List(list)) => {
                    let limit = if count == 0 {
                        usize::MAX
                    } else {
                        count.unsigned_abs() as usize
                    };
                    let mut removed = 0_usize;
                    let mut kept: VecDeque<String> = VecDeque::with_capacity(list.len());
                    if count >= 0 {
                        for v in list.drain(..) {
                            if v == args[3] && removed < limit {
                                removed += 1;
                            } else {
                                kept.push_back(v);
                            }
                        }
                    } else {
                        for v in list.drain(..).rev() {
                            if v == args[3] && removed < limit {
                                removed += 1;
                            } else {
                                kept.push_front(v);
                            }
                        }
                    }
                    *list = kept;
                    Frame::Int(removed as i64)
                }
                _ => Frame::Int(0),
            }
        }
        "LTRIM" => {
            if let Some(Value::List(list)) = state.values.get_mut(args[1].as_str()) {
                let len = list.len() as i64;
                let norm = |i: i64| -> i64 {
                    if i < 0 {
                        (len + i).max(0)
                    } else {
                        i.min(len)
                    }
                };
                let start = norm(args[2].parse().unwrap_or(0));
                let stop = norm(args[3].parse().unwrap_or(-1));
                let trimmed: VecDeque<String> = list
                    .iter()
                    .skip(start as usize)
                    .take((stop - start + 1).max(0) as usize)
                    .cloned()
                    .collect();
                *list = trimmed;
            }
            Frame::Simple("OK".to_string())
        }
        "SINTER" => {
            let mut sets: Vec<&HashSet<String>> = Vec::new();
            for key in &args[1..] {
                match state.values.get(key.as_str()) {
                    Some(Value::Set(s)) => sets.push(s),
                    _ => {
                        sets.clear();
                        break;
                    }
                }
            }
            let mut members: Vec<String> = match sets.split_first() {
                Some((first, rest)) => first
                    .iter()
                    .filter(|m| rest.iter().all(|s| s.contains(*m)))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            members.sort();
            Frame::Array(members.into_iter().map(Frame::Bulk).collect())
        }
        "SADD" | "SREM" => {
            state.expire_check(&args[1]);
            let set = match state
                .values
                .entry(args[1].clone())
                .or_insert_with(|| Value::Set(HashSet::new()))
            {
                Value::Set(s) => s,
                _ => panic!("wrong type"),
            };
            let mut n = 0;
            for v in &args[2..] {
                let changed = if name == "SADD" {
                    set.insert(v.clone())
                } else {
                    set.remove(v)
                };
                if changed {
                    n += 1;
                }
            }
            Frame::Int(n)
        }
        "SCARD" => match state.values.get(args[1].as_str()) {
            Some(Value::Set(s)) => Frame::Int(s.len() as i64),
            _ => Frame::Int(0),
        },
        "SISMEMBER" => match state.values.get(args[1].as_str()) {
            Some(Value::Set(s)) => Frame::Int(i64::from(s.contains(&args[2]))),
            _ => Frame::Int(0),
        },
        "SMEMBERS" => match state.values.get(args[1].as_str()) {
            Some(Value::Set(s)) => {
                let mut members: Vec<String> = s.iter().cloned().collect();
                members.sort();
                Frame::Array(members.into_iter().map(Frame::Bulk).collect())
            }
            _ => Frame::Array(vec![]),
        },
        "ZADD" => {
            let score: i64 = args[2].parse().unwrap_or(0);
            Frame::Int(state.zadd(&args[1], score, &args[3]))
        }
        "ZREM" => Frame::Int(state.zrem(&args[1], &args[2])),
        "ZRANK" => match state.zrank(&args[1], &args[2]) {
            Some(rank) => Frame::Int(rank),
            None => Frame::Null,
        },
        "PUBLISH" => Frame::Int(state.publish(&args[1], &args[2])),
        "SUBSCRIBE" => {
            let channel = args[1].clone();
            ctx.channels.insert(channel.clone());
            state
                .subscribers
                .entry(channel.clone())
                .or_default()
                .push((ctx.id, ctx.outbox_tx.clone()));
            Frame::Array(vec![
                Frame::Bulk("subscribe".to_string()),
                Frame::Bulk(channel),
                Frame::Int(ctx.channels.len() as i64),
            ])
        }
        "UNSUBSCRIBE" => {
            if let Some(channel) = args.get(1) {
                ctx.channels.remove(channel);
                if let Some(subs) = state.subscribers.get_mut(channel) {
                    subs.retain(|(id, _)| *id != ctx.id);
                }
                Frame::Array(vec![
                    Frame::Bulk("unsubscribe".to_string()),
                    Frame::Bulk(channel.clone()),
                    Frame::Int(ctx.channels.len() as i64),
                ])
            } else if ctx.channels.is_empty() {
                // nothing subscribed: the ack carries a null channel
                Frame::Array(vec![
                    Frame::Bulk("unsubscribe".to_string()),
                    Frame::Null,
                    Frame::Int(0),
                ])
            } else {
                let channels: Vec<String> = ctx.channels.drain().collect();
                let mut frames = Vec::new();
                for (i, channel) in channels.iter().enumerate() {
                    if let Some(subs) = state.subscribers.get_mut(channel) {
                        subs.retain(|(id, _)| *id != ctx.id);
                    }
                    frames.push(Frame::Array(vec![
                        Frame::Bulk("unsubscribe".to_string()),
                        Frame::Bulk(channel.clone()),
                        Frame::Int((channels.len() - i - 1) as i64),
                    ]));
                }
                for frame in frames {
                    write_frame(out, &frame);
                }
                return;
            }
        }
        "PSUBSCRIBE" => {
            let pattern = args[1].clone();
            ctx.patterns.insert(pattern.clone());
            state
                .psubscribers
                .entry(pattern.clone())
                .or_default()
                .push((ctx.id, ctx.outbox_tx.clone()));
            Frame::Array(vec![
                Frame::Bulk("psubscribe".to_string()),
                Frame::Bulk(pattern),
                Frame::Int(ctx.patterns.len() as i64),
            ])
        }
        "PUNSUBSCRIBE" => {
            if let Some(pattern) = args.get(1) {
                ctx.patterns.remove(pattern);
                if let Some(subs) = state.psubscribers.get_mut(pattern) {
                    subs.retain(|(id, _)| *id != ctx.id);
                }
                Frame::Array(vec![
                    Frame::Bulk("punsubscribe".to_string()),
                    Frame::Bulk(pattern.clone()),
                    Frame::Int(ctx.patterns.len() as i64),
                ])
            } else {
                Frame::Array(vec![
                    Frame::Bulk("punsubscribe".to_string()),
                    Frame::Null,
                    Frame::Int(0),
                ])
            }
        }
        "SCRIPT" => match args[1].to_uppercase().as_str() {
            "LOAD" => {
                let sha = sha1_hex(&args[2]);
                state.scripts.insert(sha.clone(), args[2].clone());
                Frame::Bulk(sha)
            }
            "EXISTS" => {
                let exists = state.scripts.contains_key(&args[2]);
                Frame::Array(vec![Frame::Int(i64::from(exists))])
            }
            "FLUSH" => {
                state.scripts.clear();
                Frame::Simple("OK".to_string())
            }
            _ => Frame::Error("ERR unknown SCRIPT subcommand".to_string()),
        },
        "EVAL" | "EVALSHA" => {
            let source = if name == "EVAL" {
                let sha = sha1_hex(&args[1]);
                state.scripts.insert(sha, args[1].clone());
                Some(args[1].clone())
            } else {
                state.scripts.get(&args[1]).cloned()
            };
            match source {
                None => Frame::Error(
                    "NOSCRIPT No matching script. Please use EVAL.".to_string(),
                ),
                Some(source) => {
                    let numkeys: usize = args[2].parse().unwrap_or(0);
                    let keys = args[3..3 + numkeys].to_vec();
                    let script_args = args[3 + numkeys..].to_vec();
                    match classify_script(&source) {
                        Some(script) => run_script(&mut state, script, &keys, &script_args),
                        None => Frame::Error("ERR unsupported script".to_string()),
                    }
                }
            }
        }
        _ => Frame::Error(format!("ERR unknown command '{name}'")),
    };
    write_frame(out, &frame);
}
