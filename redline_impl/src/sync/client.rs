use crate::conn::{Connection, ConnectionCounters, SubscribeState};
use crate::lock::Script;
use crate::{Command, IntoConnectParams, RedlineError, RedlineResult, Reply};
use std::collections::HashMap;
use std::sync::Arc;

/// A synchronous connection to the server.
///
/// Strictly single-threaded: one `SyncClient` is owned by one thread.
/// Request and reply are symmetric — every [`execute`](SyncClient::execute)
/// sends one command and reads exactly one reply.
///
/// A client created with [`try_new_subscriber`](SyncClient::try_new_subscriber)
/// is in subscription mode: it accepts only the subscribe operations and the
/// [`message`](SyncClient::message) poll, and automatically re-subscribes
/// its channels after a reconnect.
///
/// # Example
///
/// ```rust,no_run
/// use redline_impl::{Command, SyncClient};
/// let mut client = SyncClient::try_new("redis://localhost:6379").unwrap();
/// client.set("key1", "v").unwrap();
/// assert_eq!(client.get("key1").unwrap().as_deref(), Some("v"));
/// ```
#[derive(Debug)]
pub struct SyncClient {
    conn: Connection,
}

/// Options for [`SyncClient::set_with`]: expiry in seconds or milliseconds
/// (at most one of the two) and set-if-absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetOptions {
    pub ex: Option<u64>,
    pub px: Option<u64>,
    pub nx: bool,
}

impl SyncClient {
    /// Factory method for connected clients.
    ///
    /// # Errors
    ///
    /// Several variants of `RedlineError` can occur.
    pub fn try_new<P: IntoConnectParams>(params: P) -> RedlineResult<Self> {
        let mut conn = Connection::new(false, false);
        conn.init(params.into_connect_params()?)?;
        Ok(Self { conn })
    }

    /// Factory method for subscription-mode clients.
    pub fn try_new_subscriber<P: IntoConnectParams>(params: P) -> RedlineResult<Self> {
        let mut conn = Connection::new(true, false);
        conn.init(params.into_connect_params()?)?;
        Ok(Self { conn })
    }

    /// Closes the connection. The next operation reconnects.
    pub fn close(&mut self) {
        self.conn.close();
    }

    /// Whether the connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// The connection parameters, if the client was initialized.
    pub fn connect_params(&self) -> Option<&crate::ConnectParams> {
        self.conn.params()
    }

    /// The usage counters of this connection.
    pub fn counters(&self) -> &Arc<ConnectionCounters> {
        self.conn.counters()
    }

    /// Executes one command and waits for its reply.
    ///
    /// A server-side command error is returned as [`Reply::Err`], not as a
    /// transport failure. Transport failures close the connection and are
    /// returned as `Err`; the next call attempts a single reconnect.
    pub fn execute(&mut self, cmd: &Command) -> RedlineResult<Reply> {
        if self.conn.is_subscribe() {
            return Err(RedlineError::Usage(
                "subscription-mode connections cannot execute commands",
            ));
        }
        self.conn.send_command_with_retry(cmd)?;
        self.conn.clear_recv_buffer();

        match self.conn.read_reply() {
            Ok(Some(reply)) => {
                if let Reply::Err(text) = &reply {
                    error!("command error: {text}, cmd={}", cmd.to_command_string());
                }
                Ok(reply)
            }
            Ok(None) => {
                self.conn.close();
                Err(RedlineError::Protocol("reply missing".to_string()))
            }
            Err(e) => {
                error!("reply read failed, cmd={}", cmd.to_command_string());
                self.conn.close();
                Err(e)
            }
        }
    }

    /// Executes a batch in one round trip and returns all replies in order.
    ///
    /// On a transport failure mid-batch the connection is closed and the
    /// whole batch fails; no partial reply list is returned, so a later
    /// call cannot observe misaligned replies.
    pub fn execute_batch(&mut self, cmds: &[Command]) -> RedlineResult<Vec<Reply>> {
        if self.conn.is_subscribe() {
            return Err(RedlineError::Usage(
                "subscription-mode connections cannot execute commands",
            ));
        }
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        self.conn.send_batch_with_retry(cmds)?;
        self.conn.clear_recv_buffer();

        let mut replies = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            match self.conn.read_reply() {
                Ok(Some(reply)) => {
                    if let Reply::Err(text) = &reply {
                        error!("command error: {text}, cmd={}", cmd.to_command_string());
                    }
                    replies.push(reply);
                }
                Ok(None) => {
                    self.conn.close();
                    return Err(RedlineError::Protocol("reply missing".to_string()));
                }
                Err(e) => {
                    error!("reply read failed, cmd={}", cmd.to_command_string());
                    self.conn.close();
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }

    // ---- typed helpers ------------------------------------------------
    //
    // Thin wrappers over execute(); a server error reply surfaces as
    // RedlineError::Command because the promised result shape cannot
    // carry it.

    pub fn del(&mut self, key: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("DEL").arg(key))?;
        expect_int(reply)
    }

    pub fn dels(&mut self, keys: &[&str]) -> RedlineResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let reply = self.execute(&Command::new("DEL").args(keys.iter().copied()))?;
        expect_int(reply)
    }

    pub fn exists(&mut self, key: &str) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("EXISTS").arg(key))?;
        Ok(expect_int(reply)? == 1)
    }

    pub fn expire(&mut self, key: &str, seconds: i64) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("EXPIRE").arg(key).arg(seconds))?;
        Ok(expect_int(reply)? == 1)
    }

    pub fn expire_at(&mut self, key: &str, unix_seconds: i64) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("EXPIREAT").arg(key).arg(unix_seconds))?;
        Ok(expect_int(reply)? == 1)
    }

    pub fn pexpire(&mut self, key: &str, millis: i64) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("PEXPIRE").arg(key).arg(millis))?;
        Ok(expect_int(reply)? == 1)
    }

    pub fn pexpire_at(&mut self, key: &str, unix_millis: i64) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("PEXPIREAT").arg(key).arg(unix_millis))?;
        Ok(expect_int(reply)? == 1)
    }

    pub fn ttl(&mut self, key: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("TTL").arg(key))?;
        expect_int(reply)
    }

    pub fn pttl(&mut self, key: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("PTTL").arg(key))?;
        expect_int(reply)
    }

    /// Plain SET; overwrites any existing value regardless of its type.
    pub fn set<V: crate::ToArg>(&mut self, key: &str, value: V) -> RedlineResult<()> {
        let reply = self.execute(&Command::new("SET").arg(key).arg(value))?;
        expect_ok(reply)
    }

    /// SET with expiry/NX options. Returns false if NX prevented the write.
    pub fn set_with<V: crate::ToArg>(
        &mut self,
        key: &str,
        value: V,
        options: SetOptions,
    ) -> RedlineResult<bool> {
        let mut cmd = Command::new("SET").arg(key).arg(value);
        if let Some(ex) = options.ex {
            cmd = cmd.arg("EX").arg(ex);
        } else if let Some(px) = options.px {
            cmd = cmd.arg("PX").arg(px);
        }
        if options.nx {
            cmd = cmd.arg("NX");
        }
        let reply = self.execute(&cmd)?;
        match reply {
            Reply::Null => Ok(false),
            other => expect_ok(other).map(|()| true),
        }
    }

    pub fn get(&mut self, key: &str) -> RedlineResult<Option<String>> {
        let reply = self.execute(&Command::new("GET").arg(key))?;
        expect_opt_string(reply)
    }

    pub fn mset(&mut self, pairs: &[(&str, &str)]) -> RedlineResult<()> {
        let reply =
            self.execute(&Command::new("MSET").arg_pairs(pairs.iter().copied()))?;
        expect_ok(reply)
    }

    pub fn mget(&mut self, keys: &[&str]) -> RedlineResult<Vec<Option<String>>> {
        let reply = self.execute(&Command::new("MGET").args(keys.iter().copied()))?;
        expect_opt_string_array(reply)
    }

    pub fn incr(&mut self, key: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("INCR").arg(key))?;
        expect_int(reply)
    }

    pub fn incrby(&mut self, key: &str, value: i64) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("INCRBY").arg(key).arg(value))?;
        expect_int(reply)
    }

    pub fn hset<V: crate::ToArg>(
        &mut self,
        key: &str,
        field: &str,
        value: V,
    ) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("HSET").arg(key).arg(field).arg(value))?;
        Ok(expect_int(reply)? == 1)
    }

    pub fn hget(&mut self, key: &str, field: &str) -> RedlineResult<Option<String>> {
        let reply = self.execute(&Command::new("HGET").arg(key).arg(field))?;
        expect_opt_string(reply)
    }

    pub fn hmset(&mut self, key: &str, pairs: &[(&str, &str)]) -> RedlineResult<()> {
        let reply = self.execute(
            &Command::new("HMSET").arg(key).arg_pairs(pairs.iter().copied()),
        )?;
        expect_ok(reply)
    }

    pub fn hmget(&mut self, key: &str, fields: &[&str]) -> RedlineResult<Vec<Option<String>>> {
        let reply =
            self.execute(&Command::new("HMGET").arg(key).args(fields.iter().copied()))?;
        expect_opt_string_array(reply)
    }

    pub fn hgetall(&mut self, key: &str) -> RedlineResult<HashMap<String, String>> {
        let reply = self.execute(&Command::new("HGETALL").arg(key))?;
        expect_shape(reply)
    }

    pub fn hincrby(&mut self, key: &str, field: &str, value: i64) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("HINCRBY").arg(key).arg(field).arg(value))?;
        expect_int(reply)
    }

    pub fn hlen(&mut self, key: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("HLEN").arg(key))?;
        expect_int(reply)
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("HDEL").arg(key).arg(field))?;
        expect_int(reply)
    }

    pub fn hdels(&mut self, key: &str, fields: &[&str]) -> RedlineResult<i64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let reply =
            self.execute(&Command::new("HDEL").arg(key).args(fields.iter().copied()))?;
        expect_int(reply)
    }

    pub fn hexists(&mut self, key: &str, field: &str) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("HEXISTS").arg(key).arg(field))?;
        Ok(expect_int(reply)? == 1)
    }

    /// One HSCAN step. Returns the follow-up cursor (0 when the iteration
    /// is complete) and the fields of this step.
    pub fn hscan(
        &mut self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: u32,
    ) -> RedlineResult<(u64, HashMap<String, String>)> {
        let mut cmd = Command::new("HSCAN").arg(key).arg(cursor);
        if !pattern.is_empty() {
            cmd = cmd.arg("MATCH").arg(pattern);
        }
        if count > 0 {
            cmd = cmd.arg("COUNT").arg(count);
        }
        let reply = self.execute(&cmd)?;
        scan_projection(&reply).ok_or(RedlineError::UnexpectedReply("HSCAN reply"))
    }

    pub fn lpush<V: crate::ToArg>(&mut self, key: &str, value: V) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("LPUSH").arg(key).arg(value))?;
        expect_int(reply)
    }

    pub fn lpushs(&mut self, key: &str, values: &[&str]) -> RedlineResult<i64> {
        let reply =
            self.execute(&Command::new("LPUSH").arg(key).args(values.iter().copied()))?;
        expect_int(reply)
    }

    pub fn rpush<V: crate::ToArg>(&mut self, key: &str, value: V) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("RPUSH").arg(key).arg(value))?;
        expect_int(reply)
    }

    pub fn rpushs(&mut self, key: &str, values: &[&str]) -> RedlineResult<i64> {
        let reply =
            self.execute(&Command::new("RPUSH").arg(key).args(values.iter().copied()))?;
        expect_int(reply)
    }

    pub fn lpop(&mut self, key: &str) -> RedlineResult<Option<String>> {
        let reply = self.execute(&Command::new("LPOP").arg(key))?;
        expect_opt_string(reply)
    }

    pub fn rpop(&mut self, key: &str) -> RedlineResult<Option<String>> {
        let reply = self.execute(&Command::new("RPOP").arg(key))?;
        expect_opt_string(reply)
    }

    pub fn lrange(&mut self, key: &str, start: i64, stop: i64) -> RedlineResult<Vec<String>> {
        let reply = self.execute(&Command::new("LRANGE").arg(key).arg(start).arg(stop))?;
        expect_shape(reply)
    }

    pub fn llen(&mut self, key: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("LLEN").arg(key))?;
        expect_int(reply)
    }

    /// LREM; returns the number of removed elements.
    pub fn lrem<V: crate::ToArg>(&mut self, key: &str, count: i64, value: V) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("LREM").arg(key).arg(count).arg(value))?;
        expect_int(reply)
    }

    pub fn ltrim(&mut self, key: &str, start: i64, stop: i64) -> RedlineResult<()> {
        let reply = self.execute(&Command::new("LTRIM").arg(key).arg(start).arg(stop))?;
        expect_ok(reply)
    }

    pub fn sadd<V: crate::ToArg>(&mut self, key: &str, member: V) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("SADD").arg(key).arg(member))?;
        expect_int(reply)
    }

    pub fn sadds(&mut self, key: &str, members: &[&str]) -> RedlineResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        let reply =
            self.execute(&Command::new("SADD").arg(key).args(members.iter().copied()))?;
        expect_int(reply)
    }

    pub fn srem<V: crate::ToArg>(&mut self, key: &str, member: V) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("SREM").arg(key).arg(member))?;
        expect_int(reply)
    }

    pub fn srems(&mut self, key: &str, members: &[&str]) -> RedlineResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        let reply =
            self.execute(&Command::new("SREM").arg(key).args(members.iter().copied()))?;
        expect_int(reply)
    }

    /// SINTER over the given keys.
    pub fn sinter(&mut self, keys: &[&str]) -> RedlineResult<Vec<String>> {
        let reply = self.execute(&Command::new("SINTER").args(keys.iter().copied()))?;
        expect_shape(reply)
    }

    pub fn scard(&mut self, key: &str) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("SCARD").arg(key))?;
        expect_int(reply)
    }

    pub fn smembers(&mut self, key: &str) -> RedlineResult<Vec<String>> {
        let reply = self.execute(&Command::new("SMEMBERS").arg(key))?;
        expect_shape(reply)
    }

    pub fn sismember<V: crate::ToArg>(&mut self, key: &str, member: V) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("SISMEMBER").arg(key).arg(member))?;
        Ok(expect_int(reply)? == 1)
    }

    pub fn zadd<V: crate::ToArg>(
        &mut self,
        key: &str,
        score: i64,
        member: V,
    ) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("ZADD").arg(key).arg(score).arg(member))?;
        expect_int(reply)
    }

    pub fn zrem<V: crate::ToArg>(&mut self, key: &str, member: V) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("ZREM").arg(key).arg(member))?;
        expect_int(reply)
    }

    /// PUBLISH; returns the number of subscribers that received the message.
    pub fn publish<V: crate::ToArg>(&mut self, channel: &str, msg: V) -> RedlineResult<i64> {
        let reply = self.execute(&Command::new("PUBLISH").arg(channel).arg(msg))?;
        expect_int(reply)
    }

    // ---- scripting ----------------------------------------------------

    /// EVAL with inline source; loads the script as a side effect.
    pub fn eval(&mut self, source: &str, keys: &[String], args: &[String]) -> RedlineResult<Reply> {
        self.execute(
            &Command::new("EVAL")
                .arg(source)
                .arg(keys.len())
                .args(keys.iter())
                .args(args.iter()),
        )
    }

    /// EVALSHA against a previously loaded script.
    pub fn evalsha(
        &mut self,
        sha1: &str,
        keys: &[String],
        args: &[String],
    ) -> RedlineResult<Reply> {
        self.execute(
            &Command::new("EVALSHA")
                .arg(sha1)
                .arg(keys.len())
                .args(keys.iter())
                .args(args.iter()),
        )
    }

    /// SCRIPT LOAD; returns the SHA1 of the script.
    pub fn script_load(&mut self, source: &str) -> RedlineResult<String> {
        let reply = self.execute(&Command::new("SCRIPT").arg("LOAD").arg(source))?;
        match reply {
            Reply::Str(b) => String::from_utf8(b)
                .map_err(|_| RedlineError::UnexpectedReply("non-utf8 script sha")),
            Reply::Err(text) => Err(RedlineError::Command(text)),
            _ => Err(RedlineError::UnexpectedReply("SCRIPT LOAD reply")),
        }
    }

    pub fn script_exists(&mut self, sha1: &str) -> RedlineResult<bool> {
        let reply = self.execute(&Command::new("SCRIPT").arg("EXISTS").arg(sha1))?;
        match reply.as_arr().and_then(|a| a.first()).and_then(Reply::as_int) {
            Some(n) => Ok(n == 1),
            None => Err(RedlineError::UnexpectedReply("SCRIPT EXISTS reply")),
        }
    }

    pub fn script_flush(&mut self) -> RedlineResult<()> {
        let reply = self.execute(&Command::new("SCRIPT").arg("FLUSH"))?;
        expect_ok(reply)
    }

    /// Executes a script handle: loads the source on the first use, then
    /// runs EVALSHA; a `NOSCRIPT` error reply (script cache flushed on the
    /// server) triggers one transparent reload and retry.
    pub fn script(
        &mut self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> RedlineResult<Reply> {
        let sha = match script.cached_sha()? {
            Some(sha) => sha,
            None => {
                let sha = self.script_load(script.source())?;
                script.store_sha(sha.clone())?;
                sha
            }
        };
        let reply = self.evalsha(&sha, keys, args)?;
        if let Reply::Err(text) = &reply {
            if text.starts_with("NOSCRIPT") {
                debug!("script cache miss, reloading");
                let sha = self.script_load(script.source())?;
                script.store_sha(sha.clone())?;
                return self.evalsha(&sha, keys, args);
            }
        }
        Ok(reply)
    }

    // ---- pub/sub ------------------------------------------------------

    /// SUBSCRIBE. Only valid on subscription-mode clients; the server ack
    /// is consumed by the next [`message`](SyncClient::message) poll.
    pub fn subscribe(&mut self, channel: &str) -> RedlineResult<()> {
        self.require_subscribe_mode()?;
        self.conn
            .send_command_with_retry(&Command::new("SUBSCRIBE").arg(channel))?;
        self.conn
            .set_channel_state(channel, SubscribeState::SendPending);
        Ok(())
    }

    /// UNSUBSCRIBE. An empty channel name unsubscribes everything.
    pub fn unsubscribe(&mut self, channel: &str) -> RedlineResult<()> {
        self.require_subscribe_mode()?;
        let mut cmd = Command::new("UNSUBSCRIBE");
        if !channel.is_empty() {
            cmd = cmd.arg(channel);
        }
        self.conn.send_command_with_retry(&cmd)?;
        if channel.is_empty() {
            self.conn
                .set_all_channels_state(SubscribeState::UnsubscribePending);
        } else if self.conn.channel_state(channel).is_some() {
            self.conn
                .set_channel_state(channel, SubscribeState::UnsubscribePending);
        }
        Ok(())
    }

    /// PSUBSCRIBE.
    pub fn psubscribe(&mut self, pattern: &str) -> RedlineResult<()> {
        self.require_subscribe_mode()?;
        self.conn
            .send_command_with_retry(&Command::new("PSUBSCRIBE").arg(pattern))?;
        self.conn
            .set_pattern_state(pattern, SubscribeState::SendPending);
        Ok(())
    }

    /// PUNSUBSCRIBE. An empty pattern unsubscribes every pattern.
    pub fn punsubscribe(&mut self, pattern: &str) -> RedlineResult<()> {
        self.require_subscribe_mode()?;
        let mut cmd = Command::new("PUNSUBSCRIBE");
        if !pattern.is_empty() {
            cmd = cmd.arg(pattern);
        }
        self.conn.send_command_with_retry(&cmd)?;
        if pattern.is_empty() {
            self.conn
                .set_all_patterns_state(SubscribeState::UnsubscribePending);
        } else if self.conn.pattern_state(pattern).is_some() {
            self.conn
                .set_pattern_state(pattern, SubscribeState::UnsubscribePending);
        }
        Ok(())
    }

    /// Polls for one published message.
    ///
    /// Subscription housekeeping rows (subscribe/unsubscribe acks) are
    /// consumed internally and update the local channel state. With
    /// `block = true` the socket is switched to blocking for the duration
    /// of this poll and restored on exit on every code path.
    pub fn message(&mut self, block: bool) -> RedlineResult<Option<(String, Vec<u8>)>> {
        self.require_subscribe_mode()?;
        self.conn.check_connect()?;

        if block {
            self.conn.set_socket_blocking(true)?;
        }
        let result = self.message_inner(block);
        if block {
            // restore non-blocking regardless of the poll outcome
            let _ = self.conn.set_socket_blocking(false);
        }
        self.conn.compact_recv_buffer();
        result
    }

    fn message_inner(&mut self, block: bool) -> RedlineResult<Option<(String, Vec<u8>)>> {
        loop {
            let reply = match self.conn.read_reply() {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    if block {
                        continue;
                    }
                    return Ok(None);
                }
                Err(e) => {
                    warn!("subscription read failed: {e}");
                    self.conn.close();
                    // reconnect re-subscribes; propagate if that fails too
                    self.conn.check_connect()?;
                    continue;
                }
            };

            let Some(row) = reply.as_arr() else {
                return Err(RedlineError::UnexpectedReply("subscription frame"));
            };
            let tag = row.first().and_then(Reply::as_str).unwrap_or_default();
            match tag {
                "message" => {
                    let (Some(channel), Some(payload)) = (
                        row.get(1).and_then(Reply::as_str),
                        row.get(2).and_then(Reply::as_bytes),
                    ) else {
                        return Err(RedlineError::UnexpectedReply("message row"));
                    };
                    return Ok(Some((channel.to_string(), payload.to_vec())));
                }
                "pmessage" => {
                    // [tag, pattern, channel, payload]
                    let (Some(channel), Some(payload)) = (
                        row.get(2).and_then(Reply::as_str),
                        row.get(3).and_then(Reply::as_bytes),
                    ) else {
                        return Err(RedlineError::UnexpectedReply("pmessage row"));
                    };
                    return Ok(Some((channel.to_string(), payload.to_vec())));
                }
                "subscribe" => {
                    if let Some(channel) = row.get(1).and_then(Reply::as_str) {
                        if self.conn.channel_state(channel).is_some() {
                            info!("subscribed, channel={channel}");
                            self.conn
                                .set_channel_state(channel, SubscribeState::ServerAcked);
                        } else {
                            warn!("ack for unknown channel={channel}");
                        }
                    }
                }
                "unsubscribe" => {
                    // a null channel acks an unsubscribe-all with no
                    // remaining subscriptions; nothing to do locally
                    if let Some(channel) = row.get(1).and_then(Reply::as_str) {
                        if self.conn.remove_channel(channel) {
                            info!("unsubscribed, channel={channel}");
                        } else {
                            warn!("ack for unknown channel={channel}");
                        }
                    }
                }
                "psubscribe" => {
                    if let Some(pattern) = row.get(1).and_then(Reply::as_str) {
                        if self.conn.pattern_state(pattern).is_some() {
                            info!("subscribed, pattern={pattern}");
                            self.conn
                                .set_pattern_state(pattern, SubscribeState::ServerAcked);
                        } else {
                            warn!("ack for unknown pattern={pattern}");
                        }
                    }
                }
                "punsubscribe" => {
                    if let Some(pattern) = row.get(1).and_then(Reply::as_str) {
                        if self.conn.remove_pattern(pattern) {
                            info!("unsubscribed, pattern={pattern}");
                        } else {
                            warn!("ack for unknown pattern={pattern}");
                        }
                    }
                }
                other => {
                    error!("unexpected subscription row tag {other}");
                    return Err(RedlineError::UnexpectedReply("subscription row tag"));
                }
            }
        }
    }

    fn require_subscribe_mode(&self) -> RedlineResult<()> {
        if self.conn.is_subscribe() {
            Ok(())
        } else {
            Err(RedlineError::Usage(
                "subscribe operations require a subscription-mode client",
            ))
        }
    }
}

// ---- reply shape helpers ----------------------------------------------

fn command_error(reply: Reply) -> RedlineError {
    match reply {
        Reply::Err(text) => RedlineError::Command(text),
        _ => RedlineError::UnexpectedReply("unexpected reply shape"),
    }
}

fn expect_int(reply: Reply) -> RedlineResult<i64> {
    reply.as_int().ok_or_else(|| command_error(reply))
}

fn expect_ok(reply: Reply) -> RedlineResult<()> {
    if reply.is_ok() {
        Ok(())
    } else {
        Err(command_error(reply))
    }
}

fn expect_opt_string(reply: Reply) -> RedlineResult<Option<String>> {
    match reply {
        Reply::Null => Ok(None),
        Reply::Str(b) => String::from_utf8(b)
            .map(Some)
            .map_err(|_| RedlineError::UnexpectedReply("non-utf8 string reply")),
        other => Err(command_error(other)),
    }
}

fn expect_opt_string_array(reply: Reply) -> RedlineResult<Vec<Option<String>>> {
    expect_shape(reply)
}

fn expect_shape<T: crate::FromReply>(reply: Reply) -> RedlineResult<T> {
    T::from_reply(&reply).ok_or_else(|| command_error(reply))
}

// SCAN-family projection: [cursor, payload]
pub(crate) fn scan_projection<T: crate::FromReply>(reply: &Reply) -> Option<(u64, T)> {
    let row = reply.as_arr()?;
    if row.len() != 2 {
        return None;
    }
    let cursor = row[0].to_i64()?;
    Some((u64::try_from(cursor).ok()?, T::from_reply(&row[1])?))
}
