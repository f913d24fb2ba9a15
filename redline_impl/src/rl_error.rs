use thiserror::Error;

/// A list specifying categories of [`RedlineError`](crate::RedlineError).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RedlineError {
    /// Erroneous connection parameters, e.g. from a malformed connection URL.
    #[error("Erroneous connection parameters")]
    ConnParams {
        /// The causing Error.
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The server refused the AUTH or SELECT handshake command.
    #[error("Server refused the connection handshake: {}", _0)]
    Auth(String),

    /// The server responded with an error to a command that promises a
    /// concrete result shape.
    ///
    /// Raw [`execute`](crate::SyncClient::execute) calls return error replies
    /// as [`Reply::Err`](crate::Reply) values instead.
    #[error("Server responded with an error: {}", _0)]
    Command(String),

    /// A reply did not have the shape the issued command promises.
    #[error("Unexpected reply shape: {}", _0)]
    UnexpectedReply(&'static str),

    /// Malformed wire framing. The connection is closed.
    #[error("Malformed reply framing: {}", _0)]
    Protocol(String),

    /// Error occured in communication with the server.
    #[error(transparent)]
    Io {
        /// The causing Error.
        #[from]
        source: std::io::Error,
    },

    /// TLS set up failed because the server name was not valid.
    #[error("TLS setup failed because the server name was not valid")]
    TlsServerName,

    /// TLS protocol error.
    #[error("TLS set up failed, after setting up the TCP connection; is the server prepared for TLS?")]
    TlsProtocol {
        /// The causing Error.
        #[from]
        source: rustls::Error,
    },

    /// Error occured in thread synchronization.
    #[error("Error occured in thread synchronization")]
    Poison,

    /// Error caused by wrong usage.
    #[error("Wrong usage: {}", _0)]
    Usage(&'static str),
}

/// Abbreviation of `Result<T, RedlineError>`.
pub type RedlineResult<T> = std::result::Result<T, RedlineError>;

impl RedlineError {
    pub(crate) fn conn_params(error: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        Self::ConnParams { source: error }
    }

    /// Returns the text of the contained server error reply, if any.
    pub fn server_error(&self) -> Option<&str> {
        match self {
            Self::Command(text) | Self::Auth(text) => Some(text),
            _ => None,
        }
    }
}

impl<G> From<std::sync::PoisonError<G>> for RedlineError {
    fn from(_error: std::sync::PoisonError<G>) -> Self {
        Self::Poison
    }
}
