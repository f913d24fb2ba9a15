use crate::RedlineResult;
use std::sync::RwLock;

/// A server-side script with its lazily cached SHA1.
///
/// The handle is meant to live in a `static`: the source is loaded on the
/// first execution and the SHA1 is reused afterwards. Concurrent loaders
/// may race; last writer wins, which is safe because the SHA1 of a fixed
/// source is deterministic.
///
/// See [`SyncClient::script`](crate::SyncClient::script) and
/// [`AsyncClient::script`](crate::AsyncClient::script) for the transparent
/// load-on-miss execution.
#[derive(Debug)]
pub struct Script {
    source: &'static str,
    sha: RwLock<Option<String>>,
}

impl Script {
    pub const fn new(source: &'static str) -> Self {
        Self {
            source,
            sha: RwLock::new(None),
        }
    }

    /// The script source text.
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// The cached SHA1, if the script was already loaded by this process.
    pub fn cached_sha(&self) -> RedlineResult<Option<String>> {
        Ok(self.sha.read()?.clone())
    }

    /// Stores the SHA1 obtained from a SCRIPT LOAD.
    pub fn store_sha(&self, sha: String) -> RedlineResult<()> {
        *self.sha.write()? = Some(sha);
        Ok(())
    }
}
