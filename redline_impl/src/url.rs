//! Connection URLs.
//!
//! The URL format is
//!
//! > `<scheme>://[:<auth>@]<host>[:<port>][/<db>]`
//!
//! where
//! - `<scheme>` is `redis` for a plain TCP connection or `rediss` for a
//!   TLS-secured connection,
//! - `<auth>` is the optional authentication secret; if absent, the
//!   connect sequence probes the server with `PING`,
//! - `<port>` defaults to 6379,
//! - `<db>` is the optional database index (0..=15) that is selected after
//!   the handshake.
//!
//! Examples:
//!
//! ```text
//! redis://localhost:6379
//! redis://:secret@cache.internal:7001/3
//! rediss://cache.internal
//! ```

/// URL scheme for a plain TCP connection.
pub const PLAIN_SCHEME: &str = "redis";

/// URL scheme for a TLS-secured connection.
pub const TLS_SCHEME: &str = "rediss";

/// The default server port.
pub const DEFAULT_PORT: u16 = 6379;
