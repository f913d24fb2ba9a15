use super::client::scan_projection;
use super::{SetOptions, SyncClient};
use crate::{Command, FromReply, RedlineResult, Reply, ToArg};
use std::collections::HashMap;
use std::hash::Hash;

type Binder<'a> = Box<dyn FnMut(&Reply) + 'a>;

// A contiguous range of entries whose replies are folded into one
// synthetic array reply for a single outer binder.
struct Composite<'a> {
    begin: usize,
    end: usize,
    acc: Vec<Reply>,
    bind: Option<Binder<'a>>,
}

/// Accumulates commands and per-command result binders; one
/// [`run`](Pipeline::run) round trip yields all replies.
///
/// Every adder returns a [`Bind`] handle through which the caller projects
/// the decoded reply into their own storage — a scalar, a sequence, a
/// mapping, or any type implementing [`FromReply`]. Binders whose reply is
/// a server error are skipped.
///
/// The composite adders (`multi_hgetall`, `multi_hmget`, `multi_hget`)
/// issue one command per key and coalesce the replies into a single
/// synthetic array reply delivered to one outer binder.
///
/// The pipeline may be reused after `run`.
///
/// # Example
///
/// ```rust,no_run
/// # use redline_impl::{Pipeline, SyncClient};
/// # let mut client = SyncClient::try_new("redis://localhost").unwrap();
/// let mut count = 0_i64;
/// let mut value = String::new();
/// let mut pipeline = Pipeline::new(&mut client);
/// pipeline.incr("counter").bind(&mut count);
/// pipeline.get("key1").bind(&mut value);
/// pipeline.run().unwrap();
/// ```
pub struct Pipeline<'a> {
    client: &'a mut SyncClient,
    cmds: Vec<Command>,
    binds: Vec<Option<Binder<'a>>>,
    composites: Vec<Composite<'a>>,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Pipeline {{ {} commands }}", self.cmds.len())
    }
}

/// Configures where the reply of one pipeline entry (or of one composite
/// range) is projected to. Dropping the handle without calling a bind
/// method discards the reply.
pub struct Bind<'p, 'a> {
    slot: &'p mut Option<Binder<'a>>,
}

impl std::fmt::Debug for Bind<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Bind {{ bound: {} }}", self.slot.is_some())
    }
}

impl<'p, 'a> Bind<'p, 'a> {
    /// Projects the reply through [`FromReply`] and assigns the target.
    /// The target is untouched if the reply shape does not fit.
    pub fn bind<T: FromReply>(self, target: &'a mut T) {
        *self.slot = Some(Box::new(move |reply| {
            if let Some(v) = T::from_reply(reply) {
                *target = v;
            }
        }));
    }

    /// Appends the elements of an array reply to the target.
    pub fn bind_list<T: FromReply>(self, target: &'a mut Vec<T>) {
        *self.slot = Some(Box::new(move |reply| {
            if let Some(elements) = reply.as_arr() {
                target.extend(elements.iter().filter_map(T::from_reply));
            }
        }));
    }

    /// Merges the pairwise entries of a dictionary shaped reply into the
    /// target.
    pub fn bind_map<K, V>(self, target: &'a mut HashMap<K, V>)
    where
        K: FromReply + Hash + Eq,
        V: FromReply,
    {
        *self.slot = Some(Box::new(move |reply| {
            if let Some(m) = HashMap::<K, V>::from_reply(reply) {
                target.extend(m);
            }
        }));
    }

    /// Appends one mapping per element of a two-dimensional reply, keeping
    /// the target symmetric with the issued commands (unusable elements
    /// yield an empty mapping). This is the usual projection for
    /// [`multi_hgetall`](Pipeline::multi_hgetall).
    pub fn bind_map_list<K, V>(self, target: &'a mut Vec<HashMap<K, V>>)
    where
        K: FromReply + Hash + Eq,
        V: FromReply,
    {
        *self.slot = Some(Box::new(move |reply| {
            if let Some(elements) = reply.as_arr() {
                for element in elements {
                    target.push(HashMap::<K, V>::from_reply(element).unwrap_or_default());
                }
            }
        }));
    }

    /// SCAN-family projection: assigns the follow-up cursor and appends
    /// the payload elements.
    pub fn bind_scan<T: FromReply>(self, cursor: &'a mut u64, target: &'a mut Vec<T>) {
        *self.slot = Some(Box::new(move |reply| {
            if let Some((next, payload)) = scan_projection::<Vec<T>>(reply) {
                *cursor = next;
                target.extend(payload);
            }
        }));
    }

    /// SCAN-family projection with a dictionary payload (HSCAN).
    pub fn bind_scan_map<K, V>(self, cursor: &'a mut u64, target: &'a mut HashMap<K, V>)
    where
        K: FromReply + Hash + Eq,
        V: FromReply,
    {
        *self.slot = Some(Box::new(move |reply| {
            if let Some((next, payload)) = scan_projection::<HashMap<K, V>>(reply) {
                *cursor = next;
                target.extend(payload);
            }
        }));
    }

    /// Full control: the closure receives the decoded reply.
    pub fn bind_with<F: FnMut(&Reply) + 'a>(self, f: F) {
        *self.slot = Some(Box::new(f));
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(client: &'a mut SyncClient) -> Self {
        Self {
            client,
            cmds: Vec::new(),
            binds: Vec::new(),
            composites: Vec::new(),
        }
    }

    /// Number of accumulated commands.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Appends an arbitrary command.
    pub fn add(&mut self, cmd: Command) -> Bind<'_, 'a> {
        self.cmds.push(cmd);
        self.binds.push(None);
        Bind {
            slot: self.binds.last_mut().expect("entry just pushed"),
        }
    }

    /// Appends a command given in its string form, e.g. `"SET key 123"`.
    pub fn command(&mut self, line: &str) -> Bind<'_, 'a> {
        self.add(Command::parse(line))
    }

    // ---- singleton adders (representative surface) --------------------

    pub fn del(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("DEL").arg(key))
    }

    pub fn dels(&mut self, keys: &[&str]) -> Bind<'_, 'a> {
        self.add(Command::new("DEL").args(keys.iter().copied()))
    }

    pub fn exists(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("EXISTS").arg(key))
    }

    pub fn expire(&mut self, key: &str, seconds: i64) -> Bind<'_, 'a> {
        self.add(Command::new("EXPIRE").arg(key).arg(seconds))
    }

    pub fn pexpire(&mut self, key: &str, millis: i64) -> Bind<'_, 'a> {
        self.add(Command::new("PEXPIRE").arg(key).arg(millis))
    }

    pub fn ttl(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("TTL").arg(key))
    }

    pub fn pttl(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("PTTL").arg(key))
    }

    pub fn set<V: ToArg>(&mut self, key: &str, value: V) -> Bind<'_, 'a> {
        self.add(Command::new("SET").arg(key).arg(value))
    }

    pub fn set_with<V: ToArg>(&mut self, key: &str, value: V, options: SetOptions) -> Bind<'_, 'a> {
        let mut cmd = Command::new("SET").arg(key).arg(value);
        if let Some(ex) = options.ex {
            cmd = cmd.arg("EX").arg(ex);
        } else if let Some(px) = options.px {
            cmd = cmd.arg("PX").arg(px);
        }
        if options.nx {
            cmd = cmd.arg("NX");
        }
        self.add(cmd)
    }

    pub fn get(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("GET").arg(key))
    }

    pub fn mset(&mut self, pairs: &[(&str, &str)]) -> Bind<'_, 'a> {
        self.add(Command::new("MSET").arg_pairs(pairs.iter().copied()))
    }

    pub fn mget(&mut self, keys: &[&str]) -> Bind<'_, 'a> {
        self.add(Command::new("MGET").args(keys.iter().copied()))
    }

    pub fn incr(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("INCR").arg(key))
    }

    pub fn incrby(&mut self, key: &str, value: i64) -> Bind<'_, 'a> {
        self.add(Command::new("INCRBY").arg(key).arg(value))
    }

    pub fn hset<V: ToArg>(&mut self, key: &str, field: &str, value: V) -> Bind<'_, 'a> {
        self.add(Command::new("HSET").arg(key).arg(field).arg(value))
    }

    pub fn hget(&mut self, key: &str, field: &str) -> Bind<'_, 'a> {
        self.add(Command::new("HGET").arg(key).arg(field))
    }

    pub fn hmset(&mut self, key: &str, pairs: &[(&str, &str)]) -> Bind<'_, 'a> {
        self.add(Command::new("HMSET").arg(key).arg_pairs(pairs.iter().copied()))
    }

    pub fn hmget(&mut self, key: &str, fields: &[&str]) -> Bind<'_, 'a> {
        self.add(Command::new("HMGET").arg(key).args(fields.iter().copied()))
    }

    pub fn hgetall(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("HGETALL").arg(key))
    }

    pub fn hincrby(&mut self, key: &str, field: &str, value: i64) -> Bind<'_, 'a> {
        self.add(Command::new("HINCRBY").arg(key).arg(field).arg(value))
    }

    pub fn hlen(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("HLEN").arg(key))
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> Bind<'_, 'a> {
        self.add(Command::new("HDEL").arg(key).arg(field))
    }

    pub fn hexists(&mut self, key: &str, field: &str) -> Bind<'_, 'a> {
        self.add(Command::new("HEXISTS").arg(key).arg(field))
    }

    pub fn hscan(&mut self, key: &str, cursor: u64, pattern: &str, count: u32) -> Bind<'_, 'a> {
        let mut cmd = Command::new("HSCAN").arg(key).arg(cursor);
        if !pattern.is_empty() {
            cmd = cmd.arg("MATCH").arg(pattern);
        }
        if count > 0 {
            cmd = cmd.arg("COUNT").arg(count);
        }
        self.add(cmd)
    }

    pub fn lpush<V: ToArg>(&mut self, key: &str, value: V) -> Bind<'_, 'a> {
        self.add(Command::new("LPUSH").arg(key).arg(value))
    }

    pub fn rpush<V: ToArg>(&mut self, key: &str, value: V) -> Bind<'_, 'a> {
        self.add(Command::new("RPUSH").arg(key).arg(value))
    }

    pub fn lpop(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("LPOP").arg(key))
    }

    pub fn rpop(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("RPOP").arg(key))
    }

    pub fn lrange(&mut self, key: &str, start: i64, stop: i64) -> Bind<'_, 'a> {
        self.add(Command::new("LRANGE").arg(key).arg(start).arg(stop))
    }

    pub fn llen(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("LLEN").arg(key))
    }

    pub fn lrem<V: ToArg>(&mut self, key: &str, count: i64, value: V) -> Bind<'_, 'a> {
        self.add(Command::new("LREM").arg(key).arg(count).arg(value))
    }

    pub fn ltrim(&mut self, key: &str, start: i64, stop: i64) -> Bind<'_, 'a> {
        self.add(Command::new("LTRIM").arg(key).arg(start).arg(stop))
    }

    pub fn sadd<V: ToArg>(&mut self, key: &str, member: V) -> Bind<'_, 'a> {
        self.add(Command::new("SADD").arg(key).arg(member))
    }

    pub fn srem<V: ToArg>(&mut self, key: &str, member: V) -> Bind<'_, 'a> {
        self.add(Command::new("SREM").arg(key).arg(member))
    }

    pub fn scard(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("SCARD").arg(key))
    }

    pub fn smembers(&mut self, key: &str) -> Bind<'_, 'a> {
        self.add(Command::new("SMEMBERS").arg(key))
    }

    pub fn sismember<V: ToArg>(&mut self, key: &str, member: V) -> Bind<'_, 'a> {
        self.add(Command::new("SISMEMBER").arg(key).arg(member))
    }

    pub fn sinter(&mut self, keys: &[&str]) -> Bind<'_, 'a> {
        self.add(Command::new("SINTER").args(keys.iter().copied()))
    }

    pub fn eval(&mut self, source: &str, keys: &[String], args: &[String]) -> Bind<'_, 'a> {
        self.add(
            Command::new("EVAL")
                .arg(source)
                .arg(keys.len())
                .args(keys.iter())
                .args(args.iter()),
        )
    }

    pub fn evalsha(&mut self, sha1: &str, keys: &[String], args: &[String]) -> Bind<'_, 'a> {
        self.add(
            Command::new("EVALSHA")
                .arg(sha1)
                .arg(keys.len())
                .args(keys.iter())
                .args(args.iter()),
        )
    }

    pub fn script_load(&mut self, source: &str) -> Bind<'_, 'a> {
        self.add(Command::new("SCRIPT").arg("LOAD").arg(source))
    }

    // ---- composite adders ---------------------------------------------

    /// One HGETALL per key; the replies are folded into a single array
    /// reply (one element per key, in key order) for the returned binder.
    pub fn multi_hgetall(&mut self, keys: &[&str]) -> Bind<'_, 'a> {
        let begin = self.cmds.len();
        for key in keys {
            self.cmds.push(Command::new("HGETALL").arg(*key));
            self.binds.push(None);
        }
        self.push_composite(begin)
    }

    /// One HMGET per key with the same field list.
    pub fn multi_hmget(&mut self, keys: &[&str], fields: &[&str]) -> Bind<'_, 'a> {
        let begin = self.cmds.len();
        for key in keys {
            self.cmds
                .push(Command::new("HMGET").arg(*key).args(fields.iter().copied()));
            self.binds.push(None);
        }
        self.push_composite(begin)
    }

    /// One HGET per key for the same field.
    pub fn multi_hget(&mut self, keys: &[&str], field: &str) -> Bind<'_, 'a> {
        let begin = self.cmds.len();
        for key in keys {
            self.cmds.push(Command::new("HGET").arg(*key).arg(field));
            self.binds.push(None);
        }
        self.push_composite(begin)
    }

    fn push_composite(&mut self, begin: usize) -> Bind<'_, 'a> {
        let end = self.cmds.len();
        self.composites.push(Composite {
            begin,
            end,
            acc: Vec::new(),
            bind: None,
        });
        Bind {
            slot: &mut self.composites.last_mut().expect("just pushed").bind,
        }
    }

    /// Executes the accumulated batch in one round trip, invokes the
    /// binders, and clears the pipeline for reuse.
    ///
    /// On a transport failure no binder is invoked and the whole batch
    /// fails, like [`SyncClient::execute_batch`]. Error replies never reach
    /// a binder or a composite accumulator: a singleton binder is skipped,
    /// an erroring element is left out of the folded array reply, and an
    /// error in the range's last position skips the outer binder too. The
    /// error reply is still part of the returned list.
    pub fn run(&mut self) -> RedlineResult<Vec<Reply>> {
        let cmds = std::mem::take(&mut self.cmds);
        let mut binds = std::mem::take(&mut self.binds);
        let mut composites = std::mem::take(&mut self.composites);

        if cmds.is_empty() {
            return Ok(Vec::new());
        }

        let replies = self.client.execute_batch(&cmds)?;

        let mut composite_iter = composites.iter_mut().peekable();
        for (i, reply) in replies.iter().enumerate() {
            // composites cover contiguous, ascending, non-overlapping ranges
            while composite_iter
                .peek()
                .is_some_and(|composite| composite.end <= i)
            {
                composite_iter.next();
            }
            if let Some(composite) = composite_iter.peek_mut() {
                if composite.begin <= i && i < composite.end {
                    if reply.is_error() {
                        continue;
                    }
                    composite.acc.push(reply.clone());
                    if i + 1 == composite.end {
                        let folded = Reply::Arr(std::mem::take(&mut composite.acc));
                        if let Some(bind) = composite.bind.as_mut() {
                            bind(&folded);
                        }
                    }
                    continue;
                }
            }
            if reply.is_error() {
                continue;
            }
            if let Some(bind) = binds[i].as_mut() {
                bind(reply);
            }
        }

        Ok(replies)
    }
}
