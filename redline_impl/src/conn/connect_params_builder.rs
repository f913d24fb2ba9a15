use crate::{ConnectParams, RedlineError, RedlineResult};
use secstr::SecUtf8;

/// A builder for [`ConnectParams`].
///
/// ```rust
/// use redline_impl::ConnectParams;
///
/// let connect_params = ConnectParams::builder()
///     .hostname("abcd123")
///     .port(6379)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConnectParamsBuilder {
    hostname: Option<String>,
    port: Option<u16>,
    auth: Option<SecUtf8>,
    db: u8,
    tls: bool,
}

impl ConnectParamsBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hostname.
    pub fn hostname<H: AsRef<str>>(&mut self, hostname: H) -> &mut Self {
        self.hostname = Some(hostname.as_ref().to_owned());
        self
    }

    /// Sets the port. Defaults to 6379.
    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port = Some(port);
        self
    }

    /// Sets the authentication secret.
    pub fn auth<P: AsRef<str>>(&mut self, auth: P) -> &mut Self {
        self.auth = Some(SecUtf8::from(auth.as_ref()));
        self
    }

    /// Unsets the authentication secret; the connect sequence then probes
    /// with `PING`.
    pub fn unset_auth(&mut self) -> &mut Self {
        self.auth = None;
        self
    }

    /// Sets the database index to select after the handshake (0..=15).
    pub fn db(&mut self, db: u8) -> &mut Self {
        self.db = db;
        self
    }

    /// Makes the driver use TLS for the connection to the server.
    ///
    /// Default verification roots are loaded but the server certificate is
    /// not verified; leave verification policy to the deployment.
    pub fn tls(&mut self, tls: bool) -> &mut Self {
        self.tls = tls;
        self
    }

    /// Whether TLS or a plain TCP connection is to be used.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Constructs a `ConnectParams` from the builder.
    ///
    /// # Errors
    /// `RedlineError::ConnParams` if the builder was not yet configured to
    /// create a meaningful `ConnectParams`.
    pub fn build(&self) -> RedlineResult<ConnectParams> {
        let host = match self.hostname {
            Some(ref s) if !s.is_empty() => s.clone(),
            _ => {
                return Err(RedlineError::conn_params("hostname is missing".into()));
            }
        };
        if self.db > 15 {
            return Err(RedlineError::conn_params(
                format!("invalid database index {}", self.db).into(),
            ));
        }
        Ok(ConnectParams::new(
            host,
            self.port.unwrap_or(crate::url::DEFAULT_PORT),
            self.auth.clone().unwrap_or_else(|| SecUtf8::from("")),
            self.db,
            self.tls,
        ))
    }
}
