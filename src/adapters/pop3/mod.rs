//! Minimal POP3 client over TLS
//!
//! Only the commands the monitor needs: USER/PASS, STAT, UIDL, LIST, TOP (with
//! a RETR fallback) and QUIT. Nothing is ever deleted.

use async_native_tls::TlsStream;
use async_trait::async_trait;
use futures::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use mailparse::MailHeaderMap;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

use crate::adapters::InboxSession;
use crate::types::error::{MonitorError, Result};
use crate::types::FetchedHeaders;

pub type Pop3Stream = TlsStream<Compat<TcpStream>>;

pub struct Pop3Connection<S = Pop3Stream> {
    stream: BufReader<S>,
    uidl_supported: bool,
}

pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> Result<Pop3Connection> {
    info!(host = %host, port = port, "Connecting to POP3 server");

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| MonitorError::Connection(format!("TCP connection failed: {}", e)))?;

    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tls
        .connect(host, tcp.compat())
        .await
        .map_err(|e| MonitorError::Connection(format!("TLS handshake failed: {}", e)))?;

    Pop3Connection::handshake(tls_stream, username, password).await
}

impl<S> Pop3Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Read the greeting and authenticate with USER/PASS
    pub async fn handshake(stream: S, username: &str, password: &str) -> Result<Self> {
        let mut conn = Self {
            stream: BufReader::new(stream),
            uidl_supported: true,
        };

        let greeting = conn.read_line().await?;
        status_text(&greeting)
            .map_err(|e| MonitorError::Connection(format!("Unexpected greeting: {}", e)))?;

        conn.command(&format!("USER {}", username))
            .await
            .map_err(into_auth_error)?;
        conn.command(&format!("PASS {}", password))
            .await
            .map_err(into_auth_error)?;

        debug!("POP3 login succeeded for {}", username);
        Ok(conn)
    }

    async fn read_raw_line(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| MonitorError::Connection(format!("Read failed: {}", e)))?;
        if n == 0 {
            return Err(MonitorError::Connection("Connection closed by server".into()));
        }
        Ok(buf)
    }

    async fn read_line(&mut self) -> Result<String> {
        let raw = self.read_raw_line().await?;
        Ok(String::from_utf8_lossy(&raw)
            .trim_end_matches(|c| c == '\r' || c == '\n')
            .to_string())
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| MonitorError::Connection(format!("Write failed: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| MonitorError::Connection(format!("Write failed: {}", e)))
    }

    /// Send a command and return the text after `+OK`
    async fn command(&mut self, line: &str) -> Result<String> {
        self.send(line).await?;
        let response = self.read_line().await?;
        let verb = line.split_whitespace().next().unwrap_or(line);
        status_text(&response)
            .map(str::to_string)
            .map_err(|e| MonitorError::Mailbox(format!("{} failed: {}", verb, e)))
    }

    /// Body of a multi-line response, dot-unstuffed, without the terminator
    async fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let line = self.read_raw_line().await?;
            if is_terminator(&line) {
                return Ok(data);
            }
            data.extend_from_slice(unstuff(&line));
        }
    }

    async fn uidl(&mut self, index: u32) -> Result<Option<String>> {
        if !self.uidl_supported {
            return Ok(None);
        }
        match self.command(&format!("UIDL {}", index)).await {
            Ok(text) => Ok(second_field(&text).map(str::to_string)),
            Err(MonitorError::Mailbox(e)) => {
                debug!("UIDL unavailable, using message index: {}", e);
                self.uidl_supported = false;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn size(&mut self, index: u32) -> Result<u64> {
        let text = self.command(&format!("LIST {}", index)).await?;
        second_field(&text)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MonitorError::Parse(format!("Bad LIST response: {}", text)))
    }

    /// Raw header block of a message, falling back to RETR without TOP
    async fn header_block(&mut self, index: u32) -> Result<Vec<u8>> {
        match self.command(&format!("TOP {} 0", index)).await {
            Ok(_) => self.read_multiline().await,
            Err(MonitorError::Mailbox(e)) => {
                debug!("TOP unavailable, retrieving whole message: {}", e);
                self.command(&format!("RETR {}", index)).await?;
                self.read_multiline().await
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<S> InboxSession for Pop3Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn stat(&mut self) -> Result<u32> {
        let text = self.command("STAT").await?;
        parse_stat(&text)
            .map(|(count, _)| count)
            .ok_or_else(|| MonitorError::Parse(format!("Bad STAT response: {}", text)))
    }

    async fn retrieve(&mut self, index: u32) -> Result<FetchedHeaders> {
        let uidl = self.uidl(index).await?;
        let size = self.size(index).await?;
        let raw = self.header_block(index).await?;

        let (headers, _) = mailparse::parse_headers(&raw)
            .map_err(|e| MonitorError::Parse(format!("Bad message headers: {}", e)))?;

        Ok(FetchedHeaders {
            index,
            uidl,
            from: headers.get_first_value("From").unwrap_or_default(),
            subject: headers.get_first_value("Subject").unwrap_or_default(),
            message_id: headers
                .get_first_value("Message-ID")
                .map(|id| id.trim().to_string())
                .unwrap_or_default(),
            size,
        })
    }

    async fn quit(&mut self) -> Result<()> {
        self.command("QUIT").await.map(|_| ())
    }
}

fn into_auth_error(err: MonitorError) -> MonitorError {
    match err {
        MonitorError::Mailbox(msg) => MonitorError::Auth(msg),
        other => other,
    }
}

/// Text after `+OK`, or the whole line as the error
fn status_text(line: &str) -> std::result::Result<&str, String> {
    match line.strip_prefix("+OK") {
        Some(rest) => Ok(rest.trim()),
        None => Err(line.trim().to_string()),
    }
}

/// `count size` from a STAT response
fn parse_stat(text: &str) -> Option<(u32, u64)> {
    let mut fields = text.split_whitespace();
    let count = fields.next()?.parse().ok()?;
    let size = fields.next()?.parse().ok()?;
    Some((count, size))
}

// UIDL and LIST answer "<index> <value>"
fn second_field(text: &str) -> Option<&str> {
    text.split_whitespace().nth(1)
}

fn is_terminator(line: &[u8]) -> bool {
    line == b".\r\n" || line == b".\n" || line == b"."
}

fn unstuff(line: &[u8]) -> &[u8] {
    if line.starts_with(b"..") {
        &line[1..]
    } else {
        line
    }
}
