use super::Script;
use crate::sync::SyncClient;
use crate::{clock, ConnectParams, RedlineResult, Reply};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

// Acquire, or enqueue the caller as a waiter. The wait set <key>:wait is a
// sorted set of "<channel>:<lockid>" entries ordered by a monotonic score,
// so release can notify the longest-waiting subscriber first.
static ACQUIRE: Script = Script::new(
    r#"
local waitkey = KEYS[1] .. ":wait"
local waitlock = ARGV[3] .. ":" .. ARGV[1]
if redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2], "NX") then
    redis.call("ZREM", waitkey, waitlock)
    return 1
end

if redis.call("ZRANK", waitkey, waitlock) then
    -- already queued, this is a retry
else
    -- TIME is not usable as a score: it taints the script as random
    local score = redis.call("INCRBY", "_lock_wait_score_", 1)
    redis.call("ZADD", waitkey, score, waitlock)
end
return 0
"#,
);

// Verified release, then notify the lowest-score waiter whose channel has
// a live subscriber; dead waiters are pruned along the way.
static RELEASE: Script = Script::new(
    r#"
local v = redis.call("GET", KEYS[1])
if not v then
    --
elseif v == ARGV[1] then
    redis.call("DEL", KEYS[1])
else
    return 0
end

local waitkey = KEYS[1] .. ":wait"
while 1 do
    local waitlocks = redis.call("ZRANGE", waitkey, 0, 0)
    if #waitlocks == 0 then
        break
    end
    local waitlock = waitlocks[1]
    local splitpos = string.find(waitlock, ":")
    if splitpos then
        local channel = string.sub(waitlock, 0, splitpos - 1)
        local lockid = string.sub(waitlock, splitpos + 1, -1)
        if redis.call("PUBLISH", channel, lockid) > 0 then
            break
        else
            redis.call("ZREM", waitkey, waitlock)
        end
    else
        redis.call("ZREM", waitkey, waitlock)
    end
end

return 1
"#,
);

// Heals a lost release notification: when the key is free but waiters
// exist, run the same notify loop as release.
static CHECK: Script = Script::new(
    r#"
local v = redis.call("GET", KEYS[1])
if v then
    return
end

local waitkey = KEYS[1] .. ":wait"
while 1 do
    local waitlocks = redis.call("ZRANGE", waitkey, 0, 0)
    if #waitlocks == 0 then
        break
    end
    local waitlock = waitlocks[1]
    local splitpos = string.find(waitlock, ":")
    if splitpos then
        local channel = string.sub(waitlock, 0, splitpos - 1)
        local lockid = string.sub(waitlock, splitpos + 1, -1)
        if redis.call("PUBLISH", channel, lockid) > 0 then
            break
        else
            redis.call("ZREM", waitkey, waitlock)
        end
    else
        redis.call("ZREM", waitkey, waitlock)
    end
end
"#,
);

// Sweep interval for timed-out waiters and the healing check.
const SWEEP_INTERVAL_US: i64 = 1_000_000;

struct WaitLock {
    key: String,
    lockid: String,
    max_lock_ms: u64,
    wait_ms: u64,
    begin_tsc: i64,
    on_locked: Box<dyn FnOnce() + Send>,
    on_fail: Box<dyn FnOnce() + Send>,
}

/// The subscribe/notify distributed mutex: contended acquisitions park in
/// a server-side wait set instead of busy-waiting, and the releaser
/// publishes a wake-up to the next waiter's channel.
///
/// Each instance owns two connections built from the same parameters: a
/// command connection for the scripts and a subscription connection
/// listening on a per-instance UUID channel. Lock attempts are identified
/// by `<channel-uuid>:<monotonic-counter>`.
///
/// [`lock`](SubscribeLock::lock) either succeeds immediately (the success
/// continuation runs, then the lock is released) or parks the attempt;
/// [`update`](SubscribeLock::update) must be driven periodically to drain
/// wake-ups, retry parked attempts, expire those whose wait budget
/// elapsed (the fail continuation fires exactly once), and heal lost
/// notifications at most once per second per key.
pub struct SubscribeLock {
    client: SyncClient,
    subscriber: SyncClient,
    channel: String,
    waits: HashMap<String, WaitLock>,
    next_lock_id: i64,
    last_sweep_tsc: i64,
}

impl std::fmt::Debug for SubscribeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "SubscribeLock {{ channel: {}, waiting: {} }}",
            self.channel,
            self.waits.len()
        )
    }
}

impl SubscribeLock {
    /// Builds the command connection and the subscription connection and
    /// subscribes the instance channel.
    pub fn try_new(params: ConnectParams) -> RedlineResult<Self> {
        let client = SyncClient::try_new(&params)?;
        let mut subscriber = SyncClient::try_new_subscriber(&params)?;
        let channel = Uuid::new_v4().to_string();
        subscriber.subscribe(&channel)?;
        Ok(Self {
            client,
            subscriber,
            channel,
            waits: HashMap::new(),
            next_lock_id: 1,
            last_sweep_tsc: clock::tsc(),
        })
    }

    /// The wake-up channel of this instance.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Number of parked lock attempts.
    pub fn waiting(&self) -> usize {
        self.waits.len()
    }

    /// Attempts the lock. On immediate success `on_locked` runs inside
    /// this call and the lock is released afterwards; otherwise the
    /// attempt parks until a wake-up, its wait budget (`wait_ms`)
    /// elapses, or the instance is dropped.
    pub fn lock<S, F>(
        &mut self,
        key: &str,
        max_lock_ms: u64,
        wait_ms: u64,
        on_locked: S,
        on_fail: F,
    ) -> RedlineResult<()>
    where
        S: FnOnce() + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let lockid = self.next_lock_id.to_string();
        self.next_lock_id += 1;

        if self.acquire(key, &lockid, max_lock_ms)? {
            on_locked();
            self.release(key, &lockid)?;
            return Ok(());
        }

        // the acquire script queued us in the wait set; park locally
        self.waits.insert(
            lockid.clone(),
            WaitLock {
                key: key.to_string(),
                lockid,
                max_lock_ms,
                wait_ms,
                begin_tsc: clock::tsc(),
                on_locked: Box::new(on_locked),
                on_fail: Box::new(on_fail),
            },
        );
        Ok(())
    }

    /// Drains wake-ups and runs the periodic sweep.
    pub fn update(&mut self) -> RedlineResult<()> {
        let now = clock::tsc();
        let sweep_due = (now - self.last_sweep_tsc) / clock::tsc_per_us() > SWEEP_INTERVAL_US;
        let mut checked: HashSet<String> = HashSet::new();

        while let Some((_, payload)) = self.subscriber.message(false)? {
            let lockid = String::from_utf8_lossy(&payload).into_owned();
            let Some(wait) = self.waits.remove(&lockid) else {
                // raced with the sweep, or a stale wake-up
                continue;
            };
            if self.acquire(&wait.key, &wait.lockid, wait.max_lock_ms)? {
                let key = wait.key;
                let lockid = wait.lockid;
                (wait.on_locked)();
                self.release(&key, &lockid)?;
                // release already ran the notify loop for this key
                if sweep_due {
                    checked.insert(key);
                }
            } else {
                // someone else was faster; the acquire script re-queued us
                self.waits.insert(lockid, wait);
            }
        }

        if sweep_due {
            let mut kept = HashMap::with_capacity(self.waits.len());
            let mut expired = Vec::new();
            for (id, wait) in self.waits.drain() {
                let waited_us = (now - wait.begin_tsc) / clock::tsc_per_us();
                let budget_us =
                    i64::try_from(wait.wait_ms.saturating_mul(1000)).unwrap_or(i64::MAX);
                if waited_us > budget_us {
                    expired.push(wait);
                } else {
                    kept.insert(id, wait);
                }
            }
            self.waits = kept;

            for wait in expired {
                info!("lock wait for {} timed out", wait.key);
                let waitkey = format!("{}:wait", wait.key);
                let member = format!("{}:{}", self.channel, wait.lockid);
                if let Err(e) = self.client.zrem(&waitkey, member) {
                    warn!("removing expired waiter from {waitkey} failed: {e}");
                }
                (wait.on_fail)();
            }

            let waiting_keys: HashSet<String> =
                self.waits.values().map(|wait| wait.key.clone()).collect();
            for key in waiting_keys {
                if checked.insert(key.clone()) {
                    self.check(&key)?;
                }
            }

            // the stamp moves on every sweep so the interval holds
            self.last_sweep_tsc = now;
        }
        Ok(())
    }

    fn acquire(&mut self, key: &str, lockid: &str, max_lock_ms: u64) -> RedlineResult<bool> {
        let reply = self.client.script(
            &ACQUIRE,
            &[key.to_string()],
            &[
                lockid.to_string(),
                max_lock_ms.to_string(),
                self.channel.clone(),
            ],
        )?;
        Ok(reply.to_i64() == Some(1))
    }

    fn release(&mut self, key: &str, lockid: &str) -> RedlineResult<bool> {
        let reply = self
            .client
            .script(&RELEASE, &[key.to_string()], &[lockid.to_string()])?;
        Ok(reply.to_i64() == Some(1))
    }

    fn check(&mut self, key: &str) -> RedlineResult<()> {
        let reply = self.client.script(&CHECK, &[key.to_string()], &[])?;
        if let Reply::Err(text) = reply {
            warn!("lock check failed for {key}: {text}");
        }
        Ok(())
    }
}
