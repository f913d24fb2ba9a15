//! The non-blocking API of this driver.

mod client;

pub use client::AsyncClient;
