//! A pure rust client for Redis-compatible key-value stores.
//!
//! `redline` speaks the store's line-oriented request/response protocol and
//! layers three execution modes over one wire codec:
//!
//! - the blocking [`SyncClient`] with a typed helper per common command,
//! - the [`Pipeline`], which batches commands into one round trip and
//!   projects each reply into caller storage through binders,
//! - the non-blocking [`AsyncClient`] with per-command continuations,
//!   meant to be polled from an event loop.
//!
//! On top of these it provides subscription channels that survive
//! reconnects, two families of server-side distributed locks
//! ([`SpinLocker`], [`SubscribeLock`]), and counter snapshots in three
//! metrics text formats ([`connection_snapshot`], [`lock_snapshot`]).
//!
//! ```rust,no_run
//! use redline::{Command, SyncClient};
//!
//! # fn main() -> redline::RedlineResult<()> {
//! let mut client = SyncClient::try_new("redis://localhost:6379")?;
//! client.set("key1", "v")?;
//! assert_eq!(client.get("key1")?.as_deref(), Some("v"));
//! assert_eq!(client.del("key1")?, 1);
//!
//! // any command works through the generic entry point
//! let reply = client.execute(&Command::new("ECHO").arg("hello"))?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_debug_implementations)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

pub use redline_impl::{
    canonical_key, connection_snapshot, lock_snapshot, set_lock_recording, AsyncClient, Command,
    ConnectParams, ConnectParamsBuilder, ConnectionCounters, FromReply, IntoConnectParams,
    Pipeline, RedlineError, RedlineResult, Reply, Script, SetOptions, SnapshotFormat, SpinLock,
    SpinLocker, SubscribeLock, SyncClient, ToArg, DEFAULT_LOCK_MS, DEFAULT_WAIT_MS,
    SPIN_INTERVAL_MS,
};

pub use redline_impl::sync::Bind;

pub use redline_impl::{clock, url};
