use async_imap::types::Mailbox;
use async_imap::Session;
use async_native_tls::TlsStream;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::info;

use crate::types::error::{MonitorError, Result};

// An IMAP session is generic over the stream type: here TLS over TCP,
// wrapped in the tokio compat layer.
pub type ImapSession = Session<TlsStream<Compat<TcpStream>>>;

pub struct ImapConnection {
    pub session: ImapSession,
}

impl ImapConnection {
    /// Open `folder` read-only so flags are left untouched
    pub async fn examine(&mut self, folder: &str) -> Result<Mailbox> {
        self.session
            .examine(folder)
            .await
            .map_err(|e| MonitorError::Mailbox(format!("EXAMINE {} failed: {}", folder, e)))
    }
}

pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> Result<ImapConnection> {
    info!(host = %host, port = port, "Connecting to IMAP server");

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| MonitorError::Connection(format!("TCP connection failed: {}", e)))?;

    let tcp = tcp.compat();
    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tls
        .connect(host, tcp)
        .await
        .map_err(|e| MonitorError::Connection(format!("TLS handshake failed: {}", e)))?;

    let client = async_imap::Client::new(tls_stream);

    let session = client
        .login(username, password)
        .await
        .map_err(|(e, _)| MonitorError::Auth(format!("Login failed: {}", e)))?;

    Ok(ImapConnection { session })
}
