//! Connection parameters
use crate::{ConnectParamsBuilder, IntoConnectParams};
use secstr::SecUtf8;
use serde::de::Deserialize;

/// An immutable struct with all information necessary to open a new
/// connection to a server.
///
/// # Instantiating a `ConnectParams` using the `ConnectParamsBuilder`
///
/// ```rust
/// use redline_impl::ConnectParams;
/// let connect_params = ConnectParams::builder()
///     .hostname("the_host")
///     .port(6379)
///     .auth("secret")
///     .db(2)
///     .build()
///     .unwrap();
/// ```
///
/// # Instantiating a `ConnectParams` from a URL
///
/// See module [`url`](crate::url) for details about the supported URLs.
///
/// ```rust
/// use redline_impl::IntoConnectParams;
/// let connect_params = "redis://:secret@the_host:6379/2"
///     .into_connect_params()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectParams {
    host: String,
    addr: String,
    port: u16,
    auth: SecUtf8,
    db: u8,
    tls: bool,
}

impl ConnectParams {
    pub(crate) fn new(host: String, port: u16, auth: SecUtf8, db: u8, tls: bool) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            host,
            port,
            auth,
            db,
            tls,
        }
    }

    /// Returns a new builder for `ConnectParams`.
    pub fn builder() -> ConnectParamsBuilder {
        ConnectParamsBuilder::new()
    }

    /// The host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The socket address (`host:port`).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The authentication secret. An empty secret makes the connect
    /// sequence probe the server with `PING` instead of `AUTH`.
    pub fn auth(&self) -> &SecUtf8 {
        &self.auth
    }

    /// The database index selected after the handshake (0..=15).
    pub fn db(&self) -> u8 {
        self.db
    }

    /// Whether TLS or a plain TCP connection is to be used.
    pub fn is_tls(&self) -> bool {
        self.tls
    }
}

impl std::fmt::Display for ConnectParams {
    // the URL form, without the secret
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            if self.tls { "rediss" } else { "redis" },
            self.host,
            self.port,
            self.db
        )
    }
}

impl<'de> Deserialize<'de> for ConnectParams {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let url = String::deserialize(deserializer)?;
        url.into_connect_params().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::IntoConnectParams;

    #[test]
    fn test_params_from_url() {
        {
            let params = "redis://abcd123:6379".into_connect_params().unwrap();
            assert_eq!("abcd123", params.host());
            assert_eq!("abcd123:6379", params.addr());
            assert_eq!("", params.auth().unsecure());
            assert_eq!(0, params.db());
            assert!(!params.is_tls());
        }
        {
            let params = "redis://:schLau@abcd123:7001/3"
                .into_connect_params()
                .unwrap();
            assert_eq!("schLau", params.auth().unsecure());
            assert_eq!(7001, params.port());
            assert_eq!(3, params.db());
            assert!(!params.is_tls());
            // no secret in the display form
            assert_eq!(params.to_string(), "redis://abcd123:7001/3");
        }
        {
            let params = "rediss://abcd123".into_connect_params().unwrap();
            assert!(params.is_tls());
            assert_eq!(6379, params.port());
        }
    }

    #[test]
    fn test_errors() {
        assert!("".into_connect_params().is_err());
        assert!("redis://".into_connect_params().is_err());
        assert!("http://abcd123:6379".into_connect_params().is_err());
        assert!("redis://abcd123:6379/16".into_connect_params().is_err());
    }
}
