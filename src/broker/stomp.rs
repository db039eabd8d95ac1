//! Minimal STOMP 1.2 client transport.
//!
//! Implements exactly what the relay needs: CONNECT, SEND with a receipt,
//! DISCONNECT. Every SEND asks for a RECEIPT so delivery is confirmed by the
//! broker before the message is considered delivered.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{BrokerChannel, BrokerConnector, BrokerError, Destination, Result};
use crate::config::{BrokerSettings, Credentials};
use crate::types::PreparedMessage;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens STOMP sessions using the configured port and credentials.
pub struct StompConnector {
    port: u16,
    use_ssl: bool,
    credentials: Option<Credentials>,
}

impl StompConnector {
    pub fn from_config(broker: &BrokerSettings) -> Self {
        StompConnector {
            port: if broker.use_ssl {
                broker.ssl_port
            } else {
                broker.port
            },
            use_ssl: broker.use_ssl,
            credentials: broker.credentials.clone(),
        }
    }

    #[cfg(test)]
    fn plain(port: u16) -> Self {
        StompConnector {
            port,
            use_ssl: false,
            credentials: None,
        }
    }
}

#[async_trait]
impl BrokerConnector for StompConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn BrokerChannel>> {
        if self.use_ssl {
            return Err(BrokerError::TlsUnavailable);
        }

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, self.port)))
            .await
            .map_err(|_| BrokerError::Timeout)?
            .map_err(|source| BrokerError::Connect {
                host: host.to_string(),
                source,
            })?;

        let mut channel = StompChannel {
            stream: BufStream::new(stream),
            receipt_seq: 0,
        };

        let mut connect = Frame::new("CONNECT");
        connect.header("accept-version", "1.2");
        connect.header("host", host);
        connect.header("heart-beat", "0,0");
        if let Some(creds) = &self.credentials {
            connect.header("login", &creds.username);
            connect.header("passcode", &creds.password);
        }
        channel.write_frame(&connect).await?;

        let reply = channel.reply().await?;
        match reply.command.as_str() {
            "CONNECTED" => Ok(Box::new(channel)),
            "ERROR" => Err(BrokerError::Rejected {
                message: reply.error_message(),
            }),
            other => Err(BrokerError::Protocol(format!(
                "unexpected reply to CONNECT: {other}"
            ))),
        }
    }
}

struct StompChannel {
    stream: BufStream<TcpStream>,
    receipt_seq: u64,
}

impl StompChannel {
    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.stream.write_all(&frame.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn reply(&mut self) -> Result<Frame> {
        timeout(REPLY_TIMEOUT, read_frame(&mut self.stream))
            .await
            .map_err(|_| BrokerError::Timeout)?
    }
}

#[async_trait]
impl BrokerChannel for StompChannel {
    async fn send(&mut self, destination: &Destination, message: &PreparedMessage) -> Result<()> {
        self.receipt_seq += 1;
        let receipt = format!("relay-{}", self.receipt_seq);
        let expires = Utc::now().timestamp_millis() + destination.ttl.as_millis() as i64;

        let mut frame = Frame::new("SEND");
        frame.header("destination", &destination.path);
        frame.header("content-type", "text/plain");
        frame.header(
            "persistent",
            if destination.persistent { "true" } else { "false" },
        );
        frame.header("expires", &expires.to_string());
        frame.header("receipt", &receipt);
        if let Some(vo) = &message.vo {
            frame.header("vo", vo);
        }
        frame.body = message.text.as_bytes().to_vec();
        let length = frame.body.len().to_string();
        frame.header("content-length", &length);
        self.write_frame(&frame).await?;

        let reply = self.reply().await?;
        match reply.command.as_str() {
            "RECEIPT" => {
                if reply.header_value("receipt-id") == Some(receipt.as_str()) {
                    Ok(())
                } else {
                    Err(BrokerError::Protocol("receipt for a different frame".into()))
                }
            }
            "ERROR" => Err(BrokerError::Rejected {
                message: reply.error_message(),
            }),
            other => Err(BrokerError::Protocol(format!(
                "unexpected reply to SEND: {other}"
            ))),
        }
    }

    async fn close(&mut self) {
        let bye = Frame::new("DISCONNECT");
        let _ = self.write_frame(&bye).await;
        let _ = self.stream.shutdown().await;
    }
}

/// One STOMP frame, either direction.
#[derive(Debug, PartialEq, Eq)]
struct Frame {
    command: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Frame {
    fn new(command: &str) -> Self {
        Frame {
            command: command.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn header(&mut self, key: &str, value: &str) {
        self.headers.push((key.to_string(), value.to_string()));
    }

    fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn error_message(&self) -> String {
        match self.header_value("message") {
            Some(m) => m.to_string(),
            None => String::from_utf8_lossy(&self.body).trim().to_string(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 128);
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');
        for (key, value) in &self.headers {
            out.extend_from_slice(escape(key).as_bytes());
            out.push(b':');
            out.extend_from_slice(escape(value).as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

/// Reads one frame, skipping heartbeat newlines.
async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut line = String::new();
    let command = loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(BrokerError::Closed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if !trimmed.is_empty() {
            break trimmed.to_string();
        }
    };

    let mut headers = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(BrokerError::Closed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let (key, value) = trimmed
            .split_once(':')
            .ok_or_else(|| BrokerError::Protocol(format!("header without colon: {trimmed:?}")))?;
        headers.push((unescape(key)?, unescape(value)?));
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok());

    let body = match content_length {
        Some(length) => {
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).await?;
            let mut terminator = [0u8; 1];
            reader.read_exact(&mut terminator).await?;
            if terminator[0] != 0 {
                return Err(BrokerError::Protocol("missing frame terminator".into()));
            }
            body
        }
        None => {
            let mut body = Vec::new();
            if reader.read_until(0, &mut body).await? == 0 {
                return Err(BrokerError::Closed);
            }
            if body.pop() != Some(0) {
                return Err(BrokerError::Protocol("missing frame terminator".into()));
            }
            body
        }
    };

    Ok(Frame {
        command,
        headers,
        body,
    })
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(BrokerError::Protocol(format!(
                    "bad escape sequence in header: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
