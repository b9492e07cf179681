//! Client library for talking to a logkv server
//!
//! The server answers exactly one request per connection, so every call opens
//! a fresh connection, sends one line and reads one line back.

use crate::error::{LogKvError, Result};
use crate::protocol::Command;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Client for a logkv server
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
        }
    }

    /// Bound each request (connect, send, receive) by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one raw request line and return the response line without its
    /// terminator
    pub async fn send_line(&self, line: &str) -> Result<String> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(line))
                .await
                .map_err(|_| LogKvError::Timeout)?,
            None => self.exchange(line).await,
        }
    }

    async fn exchange(&self, line: &str) -> Result<String> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stream.write_all(b"\n").await?;
        }
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        if reader.read_line(&mut response).await? == 0 {
            return Err(LogKvError::Client(
                "server closed the connection without a response".to_string(),
            ));
        }
        Ok(response.trim_end_matches(|c: char| c == '\r' || c == '\n').to_string())
    }

    async fn send_command(&self, command: &Command) -> Result<String> {
        self.send_line(&command.to_line()).await
    }

    /// Insert a record
    pub async fn insert(&self, key: &str, value: &str) -> Result<()> {
        let command = Command::Insert {
            key: key.to_string(),
            value: value.to_string(),
        };

        match self.send_command(&command).await?.as_str() {
            "OK" => Ok(()),
            "ERROR" => Err(LogKvError::Server("INSERT rejected".to_string())),
            other => Err(LogKvError::Protocol(format!(
                "Unexpected response for INSERT: {}",
                other
            ))),
        }
    }

    /// Look up the effective value for a key
    pub async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let command = Command::Lookup {
            key: key.to_string(),
        };

        let response = self.send_command(&command).await?;
        match response.as_str() {
            "NOT_FOUND" => Ok(None),
            "ERROR" => Err(LogKvError::Server("LOOKUP rejected".to_string())),
            _ => Ok(Some(response)),
        }
    }
}
