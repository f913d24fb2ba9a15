//! The synchronous API of this driver.

mod client;
mod pipeline;

pub use client::{SetOptions, SyncClient};
pub use pipeline::{Bind, Pipeline};
