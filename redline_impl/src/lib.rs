//! Do not use this crate directly.
//!
//! This is the implementation crate for `redline`.

#![deny(missing_debug_implementations)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod clock;
mod conn;
mod lock;
mod metrics;
mod protocol;
mod rl_error;
pub mod url;

pub mod a_sync;
pub mod sync;

pub use crate::conn::{
    ConnectParams, ConnectParamsBuilder, ConnectionCounters, IntoConnectParams,
};

pub use crate::protocol::{Command, FromReply, Reply, ToArg};

pub use crate::rl_error::{RedlineError, RedlineResult};

pub use crate::lock::{
    canonical_key, set_lock_recording, Script, SpinLock, SpinLocker, SubscribeLock,
};

pub use crate::metrics::{connection_snapshot, lock_snapshot, SnapshotFormat};

pub use crate::sync::{Pipeline, SetOptions, SyncClient};

pub use crate::a_sync::AsyncClient;

/// Default expiry for a distributed lock key, in milliseconds.
///
/// A crashed holder can block other acquirers at most this long.
pub const DEFAULT_LOCK_MS: u64 = 8_000;

/// Default wall-clock wait budget for a lock acquisition, in milliseconds.
pub const DEFAULT_WAIT_MS: u64 = 8_000;

/// Interval between acquisition attempts of the spin locker, in milliseconds.
pub const SPIN_INTERVAL_MS: u64 = 100;
