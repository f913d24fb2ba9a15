use crate::{ConnectParams, RedlineError, RedlineResult};
use secstr::SecUtf8;

/// A trait implemented by types that can be converted into a
/// [`ConnectParams`].
pub trait IntoConnectParams {
    /// Converts the value into a `ConnectParams`.
    fn into_connect_params(self) -> RedlineResult<ConnectParams>;
}

impl IntoConnectParams for ConnectParams {
    fn into_connect_params(self) -> RedlineResult<ConnectParams> {
        Ok(self)
    }
}

impl IntoConnectParams for &ConnectParams {
    fn into_connect_params(self) -> RedlineResult<ConnectParams> {
        Ok(self.clone())
    }
}

impl IntoConnectParams for &str {
    fn into_connect_params(self) -> RedlineResult<ConnectParams> {
        url::Url::parse(self)
            .map_err(|e| RedlineError::conn_params(Box::new(e)))?
            .into_connect_params()
    }
}

impl IntoConnectParams for String {
    fn into_connect_params(self) -> RedlineResult<ConnectParams> {
        self.as_str().into_connect_params()
    }
}

impl IntoConnectParams for url::Url {
    fn into_connect_params(self) -> RedlineResult<ConnectParams> {
        let tls = match self.scheme() {
            crate::url::PLAIN_SCHEME => false,
            crate::url::TLS_SCHEME => true,
            other => {
                return Err(RedlineError::conn_params(
                    format!("unsupported URL scheme {other}").into(),
                ));
            }
        };

        let host = match self.host_str() {
            Some(h) if !h.is_empty() => h.to_owned(),
            _ => return Err(RedlineError::conn_params("no host specified".into())),
        };
        let port = self.port().unwrap_or(crate::url::DEFAULT_PORT);

        let auth = SecUtf8::from(self.password().unwrap_or(""));

        let db = {
            let segment = self.path().trim_start_matches('/');
            if segment.is_empty() {
                0
            } else {
                let db: u8 = segment
                    .parse()
                    .map_err(|_| RedlineError::conn_params("invalid database index".into()))?;
                if db > 15 {
                    return Err(RedlineError::conn_params(
                        format!("invalid database index {db}").into(),
                    ));
                }
                db
            }
        };

        Ok(ConnectParams::new(host, port, auth, db, tls))
    }
}
