use super::Script;
use crate::sync::{SetOptions, SyncClient};
use crate::{clock, RedlineResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

// Verified release: only the identity that acquired may delete the key.
// A missing key counts as released (the expiry fired).
static SCOPED_UNLOCK: Script = Script::new(
    r#"
local v = redis.call("GET", KEYS[1])
if not v then
    return 1
elseif v == ARGV[1] then
    redis.call("DEL", KEYS[1])
    return 1
end
return 0
"#,
);

// Re-entrant acquire over a hash {l:v = identity, l:n = depth}; every
// acquire refreshes the expiry.
static RECURSIVE_LOCK: Script = Script::new(
    r#"
if (redis.call("EXISTS", KEYS[1]) == 0) then
    redis.call("HMSET", KEYS[1], "l:v", ARGV[1], "l:n", 1)
    redis.call("PEXPIRE", KEYS[1], ARGV[2])
    return 1
end

local v = redis.call("HGET", KEYS[1], "l:v")
if not v then
    redis.call("HMSET", KEYS[1], "l:v", ARGV[1], "l:n", 1)
elseif v == ARGV[1] then
    redis.call("HINCRBY", KEYS[1], "l:n", 1)
else
    return 0
end
redis.call("PEXPIRE", KEYS[1], ARGV[2])
return 1
"#,
);

// Balanced release: the key is deleted when the depth reaches zero.
static RECURSIVE_UNLOCK: Script = Script::new(
    r#"
if (redis.call("EXISTS", KEYS[1]) == 0) then
    return 1
end

local v = redis.call("HGET", KEYS[1], "l:v")
if not v then
    return 1
elseif v == ARGV[1] then
    local n = redis.call("HINCRBY", KEYS[1], "l:n", -1)
    if tonumber(n) <= 0 then
        redis.call("DEL", KEYS[1])
    end
    return 1
end

return 0
"#,
);

lazy_static! {
    // one random identity per process; a lock attempt is identified by
    // <process-uuid>:<thread-seq> so only the holder can release
    static ref PROCESS_UUID: String = Uuid::new_v4().to_string();

    static ref ID_SEGMENT: Regex =
        Regex::new(r"([:/\{_-])(\d+|[0-9a-zA-Z]{24,})").expect("canonicalization pattern");

    static ref LOCK_RECORDS: RwLock<HashMap<String, Arc<LockData>>> = RwLock::new(HashMap::new());
}

static RECORDING: AtomicBool = AtomicBool::new(true);
static NEXT_THREAD_SEQ: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_SEQ: u64 = NEXT_THREAD_SEQ.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn lock_identity() -> String {
    format!("{}:{}", *PROCESS_UUID, THREAD_SEQ.with(|seq| *seq))
}

/// Rewrites a lock key for metrics aggregation: numeric and long
/// alphanumeric identifier segments (after `:`, `/`, `{`, `_`, `-`) are
/// replaced with `*`, so keys that differ only by a tenant or user id
/// aggregate into one row.
///
/// ```
/// use redline_impl::canonical_key;
/// assert_eq!(canonical_key("order:1234:state"), "order:*:state");
/// ```
pub fn canonical_key(key: &str) -> String {
    ID_SEGMENT.replace_all(key, "${1}*").into_owned()
}

/// Enables or disables the per-key lock statistics (enabled by default).
pub fn set_lock_recording(enabled: bool) {
    RECORDING.store(enabled, Ordering::Relaxed);
}

// Per canonical key statistics; times are kept in raw ticks and converted
// to microseconds when a snapshot is rendered.
#[derive(Debug, Default)]
pub(crate) struct LockData {
    pub lock_count: AtomicI64,
    pub fail_count: AtomicI64,
    pub try_tsc: AtomicI64,
    pub try_max_tsc: AtomicI64,
    pub held_tsc: AtomicI64,
    pub held_max_tsc: AtomicI64,
    pub spin_count: AtomicI64,
}

impl LockData {
    fn add_try(&self, tsc: i64) {
        self.try_tsc.fetch_add(tsc, Ordering::Relaxed);
        self.try_max_tsc.fetch_max(tsc, Ordering::Relaxed);
    }
    fn add_held(&self, tsc: i64) {
        self.held_tsc.fetch_add(tsc, Ordering::Relaxed);
        self.held_max_tsc.fetch_max(tsc, Ordering::Relaxed);
    }
}

// Returns the record for the canonicalized key, creating it on first use.
// Shared lock for the lookup, exclusive only for the first registration.
fn register(key: &str) -> Option<Arc<LockData>> {
    if !RECORDING.load(Ordering::Relaxed) {
        return None;
    }
    let canonical = canonical_key(key);
    if let Ok(records) = LOCK_RECORDS.read() {
        if let Some(data) = records.get(&canonical) {
            return Some(Arc::clone(data));
        }
    }
    let mut records = LOCK_RECORDS.write().ok()?;
    Some(Arc::clone(
        records.entry(canonical).or_insert_with(Arc::default),
    ))
}

// Point-in-time copy for the metrics sink.
pub(crate) fn snapshot_lock_records() -> Vec<(String, Arc<LockData>)> {
    LOCK_RECORDS
        .read()
        .map(|records| {
            records
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// The spin-based distributed mutex: acquisition either succeeds
/// immediately or fails, callers poll. See [`SpinLocker`] for the
/// polling wrapper.
///
/// Two variants share the lock identity `<process-uuid>:<thread-seq>`:
/// the scoped lock (a plain `SET PX NX` with a scripted verified release)
/// and the recursive lock (a hash carrying identity and depth, balanced
/// release).
#[derive(Debug)]
pub struct SpinLock<'a> {
    client: &'a mut SyncClient,
}

impl<'a> SpinLock<'a> {
    pub fn new(client: &'a mut SyncClient) -> Self {
        Self { client }
    }

    /// Tries to acquire the scoped lock. Not re-entrant: a second acquire
    /// by the same holder fails.
    pub fn scoped_lock(&mut self, key: &str, max_lock_ms: u64) -> RedlineResult<bool> {
        self.client.set_with(
            key,
            lock_identity(),
            SetOptions {
                px: Some(max_lock_ms),
                nx: true,
                ..SetOptions::default()
            },
        )
    }

    /// Releases the scoped lock. Succeeds if the key is gone (expired) or
    /// held by this identity; fails on a foreign holder.
    pub fn scoped_unlock(&mut self, key: &str) -> RedlineResult<bool> {
        let reply = self.client.script(
            &SCOPED_UNLOCK,
            &[key.to_string()],
            &[lock_identity()],
        )?;
        Ok(reply.to_i64() == Some(1))
    }

    /// Tries to acquire the recursive lock; re-acquires by the holder
    /// increment the depth and refresh the expiry.
    pub fn recursive_lock(&mut self, key: &str, max_lock_ms: u64) -> RedlineResult<bool> {
        let reply = self.client.script(
            &RECURSIVE_LOCK,
            &[key.to_string()],
            &[lock_identity(), max_lock_ms.to_string()],
        )?;
        Ok(reply.to_i64() == Some(1))
    }

    /// Releases one level of the recursive lock; the key is deleted when
    /// as many releases as acquisitions have happened.
    pub fn recursive_unlock(&mut self, key: &str) -> RedlineResult<bool> {
        let reply = self.client.script(
            &RECURSIVE_UNLOCK,
            &[key.to_string()],
            &[lock_identity()],
        )?;
        Ok(reply.to_i64() == Some(1))
    }
}

/// A caller-facing scoped lock: the constructor repeatedly tries to
/// acquire every [`SPIN_INTERVAL_MS`](crate::SPIN_INTERVAL_MS) until
/// either success or the wait budget elapses; an exhausted budget is a
/// soft failure reported through [`locked`](SpinLocker::locked).
/// Dropping the locker releases the lock and records the per-key
/// statistics.
///
/// ```rust,no_run
/// # use redline_impl::{SpinLocker, SyncClient};
/// # let mut client = SyncClient::try_new("redis://localhost").unwrap();
/// let locker = SpinLocker::new(&mut client, "jobs:1017:owner", 2000, 2000);
/// if locker.locked() {
///     // critical section
/// }
/// ```
pub struct SpinLocker<'a> {
    client: &'a mut SyncClient,
    key: String,
    locked: bool,
    begin_tsc: i64,
    lock_tsc: i64,
    fail_tsc: i64,
    spin_count: i64,
}

impl std::fmt::Debug for SpinLocker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SpinLocker {{ key: {}, locked: {} }}", self.key, self.locked)
    }
}

impl<'a> SpinLocker<'a> {
    pub fn new(client: &'a mut SyncClient, key: &str, max_lock_ms: u64, wait_ms: u64) -> Self {
        let mut locker = Self {
            client,
            key: key.to_string(),
            locked: false,
            begin_tsc: clock::tsc(),
            lock_tsc: 0,
            fail_tsc: 0,
            spin_count: 0,
        };
        loop {
            locker.spin_count += 1;
            let acquired = SpinLock::new(locker.client)
                .scoped_lock(&locker.key, max_lock_ms)
                .unwrap_or(false);
            if acquired {
                locker.locked = true;
                locker.lock_tsc = clock::tsc();
                break;
            }
            let tsc = clock::tsc();
            let waited_us = (tsc - locker.begin_tsc) / clock::tsc_per_us();
            if waited_us > i64::try_from(wait_ms.saturating_mul(1000)).unwrap_or(i64::MAX) {
                locker.fail_tsc = tsc;
                error!(
                    "gave up locking {} after {waited_us} µs",
                    locker.key
                );
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(crate::SPIN_INTERVAL_MS));
        }
        locker
    }

    /// Whether the lock is held.
    pub fn locked(&self) -> bool {
        self.locked
    }
}

impl Drop for SpinLocker<'_> {
    fn drop(&mut self) {
        if self.locked {
            if let Err(e) = SpinLock::new(self.client).scoped_unlock(&self.key) {
                warn!("unlock of {} failed: {e}", self.key);
            }
        }

        let unlock_tsc = clock::tsc();
        if let Some(data) = register(&self.key) {
            data.lock_count.fetch_add(1, Ordering::Relaxed);
            if self.locked {
                data.add_try(self.lock_tsc - self.begin_tsc);
                data.add_held(unlock_tsc - self.lock_tsc);
            } else {
                data.fail_count.fetch_add(1, Ordering::Relaxed);
                data.add_try(self.fail_tsc - self.begin_tsc);
            }
            data.spin_count.fetch_add(self.spin_count, Ordering::Relaxed);
        }
    }
}
