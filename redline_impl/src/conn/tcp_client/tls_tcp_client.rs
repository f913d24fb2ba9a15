use crate::{ConnectParams, RedlineError, RedlineResult};
use rustls::{
    client::{ServerCertVerified, ServerCertVerifier, ServerName},
    Certificate, ClientConfig, ClientConnection, OwnedTrustAnchor, RootCertStore, StreamOwned,
};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

pub(crate) struct TlsTcpClient {
    stream: StreamOwned<ClientConnection, TcpStream>,
}

impl std::fmt::Debug for TlsTcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "TlsTcpClient {{ ... }}")
    }
}

impl TlsTcpClient {
    pub fn try_new(params: &ConnectParams) -> RedlineResult<Self> {
        Ok(Self {
            stream: try_new_tls_stream(params)?,
        })
    }

    pub fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }

    pub fn write_some(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> std::io::Result<()> {
        self.stream.sock.set_nonblocking(nonblocking)
    }

    pub fn shutdown(&mut self) {
        self.stream.conn.send_close_notify();
        let _ = self.stream.flush();
        let _ = self.stream.sock.shutdown(Shutdown::Both);
    }
}

fn try_new_tls_stream(
    params: &ConnectParams,
) -> RedlineResult<StreamOwned<ClientConnection, TcpStream>> {
    let a_client_config = Arc::new(rustls_clientconfig());
    let server_name = ServerName::try_from(params.host())
        .map_err(|_| RedlineError::TlsServerName)?;
    let client_connection = ClientConnection::new(a_client_config, server_name)?;
    debug!("ClientConnection: {client_connection:?}");

    let tcpstream = super::plain_tcp_client::try_connect(params)?;
    trace!("tcpstream working");

    Ok(StreamOwned::new(client_connection, tcpstream))
}

// Default roots are loaded, but the certificate is not verified;
// verification policy is left to the deployment.
fn rustls_clientconfig() -> ClientConfig {
    let mut root_store = RootCertStore::empty();
    root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(NoCertificateVerification {}));
    config
}

struct NoCertificateVerification {}
impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
