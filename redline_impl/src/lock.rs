mod script;
mod spin_lock;
mod subscribe_lock;

pub use script::Script;
pub use spin_lock::{canonical_key, set_lock_recording, SpinLock, SpinLocker};
pub(crate) use spin_lock::snapshot_lock_records;
pub use subscribe_lock::SubscribeLock;
