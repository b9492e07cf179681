//! Per-connection request/response cycle
//!
//! A connection carries exactly one exchange: one request line in, one
//! response line out, then the socket is closed.

use crate::{
    error::{LogKvError, Result},
    protocol::{parse_command, Command, Response},
    record_log::RecordLog,
};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::{
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
        BufReader,
    },
    net::TcpStream,
};
use tracing::{debug, error, warn};

/// Longest accepted request line, terminator included
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Serve a single client exchange and close the connection
pub async fn handle_connection(
    stream: TcpStream,
    log: &RecordLog,
    io_timeout: Option<Duration>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    serve(reader, writer, log, io_timeout).await
}

async fn serve<R, W>(
    reader: R,
    mut writer: W,
    log: &RecordLog,
    io_timeout: Option<Duration>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    let (response, read_error) =
        match with_deadline(io_timeout, read_request(&mut reader, &mut line)).await {
            Ok(()) => (process_line(&line, log).await, None),
            Err(e) => (Response::Error, Some(e)),
        };

    let written = with_deadline(io_timeout, async {
        writer.write_all(&response.to_bytes()).await?;
        writer.flush().await?;
        writer.shutdown().await
    })
    .await;

    match (read_error, written) {
        (Some(e), _) => Err(e),
        (None, written) => written,
    }
}

/// Read one line of at most `MAX_LINE_BYTES` into `line`
async fn read_request<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<()>
where
    R: AsyncRead + AsyncBufRead + Unpin,
{
    let limit = MAX_LINE_BYTES as u64;
    let read = reader.take(limit).read_until(b'\n', line).await?;
    if read as u64 == limit && line.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request line exceeds {} bytes", MAX_LINE_BYTES),
        ));
    }
    Ok(())
}

async fn with_deadline<T, F>(io_timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match io_timeout {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| LogKvError::Timeout)?
            .map_err(LogKvError::from),
        None => fut.await.map_err(LogKvError::from),
    }
}

/// Decode a request line, run it against the log, and build the response
pub async fn process_line(line: &[u8], log: &RecordLog) -> Response {
    match parse_command(line) {
        Ok(command) => execute_command(command, log).await,
        Err(e) => {
            debug!(error = %e, "rejecting malformed request");
            Response::Error
        }
    }
}

async fn execute_command(command: Command, log: &RecordLog) -> Response {
    match command {
        Command::Insert { key, value } => match log.append(&key, &value).await {
            Ok(()) => Response::Ok,
            Err(e) => {
                report_failure("INSERT", &key, &e);
                Response::Error
            }
        },
        Command::Lookup { key } => match log.find_first(&key).await {
            Ok(Some(value)) => Response::Value(value),
            Ok(None) => Response::NotFound,
            Err(e) => {
                report_failure("LOOKUP", &key, &e);
                Response::Error
            }
        },
    }
}

fn report_failure(op: &str, key: &str, e: &LogKvError) {
    if e.is_storage() {
        error!(op, key, error = %e, "storage failure");
    } else {
        warn!(op, key, error = %e, "command failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::duplex;

    async fn exchange(request: &[u8], log: &RecordLog) -> (Result<()>, Vec<u8>) {
        let (mut client, server) = duplex(MAX_LINE_BYTES * 2);
        let (reader, writer) = tokio::io::split(server);

        client.write_all(request).await.unwrap();
        client.shutdown().await.unwrap();

        let result = serve(reader, writer, log, Some(Duration::from_secs(5))).await;
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        (result, response)
    }

    #[tokio::test]
    async fn test_command_processing() {
        let dir = tempdir().unwrap();
        let log = RecordLog::new(dir.path().join("users.db"));

        assert_eq!(process_line(b"LOOKUP alice\n", &log).await, Response::NotFound);
        assert_eq!(process_line(b"INSERT alice secret123\n", &log).await, Response::Ok);
        assert_eq!(
            process_line(b"LOOKUP alice\n", &log).await,
            Response::Value("secret123".to_string())
        );
        assert_eq!(process_line(b"INSERT alice newpass\n", &log).await, Response::Ok);
        assert_eq!(
            process_line(b"LOOKUP alice\n", &log).await,
            Response::Value("secret123".to_string())
        );
    }

    #[tokio::test]
    async fn test_malformed_requests_do_not_mutate() {
        let dir = tempdir().unwrap();
        let log = RecordLog::new(dir.path().join("users.db"));

        let lines: [&[u8]; 4] = [b"INSERT onlyonearg\n", b"\n", b"FOO x\n", b"INSERT a b c\n"];
        for line in lines {
            assert_eq!(process_line(line, &log).await, Response::Error);
        }
        assert!(log.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_error() {
        let dir = tempdir().unwrap();
        let log = RecordLog::new(dir.path());

        assert_eq!(process_line(b"INSERT alice secret123\n", &log).await, Response::Error);
        assert_eq!(process_line(b"LOOKUP alice\n", &log).await, Response::Error);
    }

    #[tokio::test]
    async fn test_single_exchange() {
        let dir = tempdir().unwrap();
        let log = RecordLog::new(dir.path().join("users.db"));

        let (result, response) = exchange(b"INSERT alice secret123\nLOOKUP alice\n", &log).await;
        result.unwrap();
        assert_eq!(response, b"OK\n");

        let (result, response) = exchange(b"LOOKUP alice\n", &log).await;
        result.unwrap();
        assert_eq!(response, b"secret123\n");
    }

    #[tokio::test]
    async fn test_empty_connection_gets_error() {
        let dir = tempdir().unwrap();
        let log = RecordLog::new(dir.path().join("users.db"));

        let (result, response) = exchange(b"", &log).await;
        result.unwrap();
        assert_eq!(response, b"ERROR\n");
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected() {
        let dir = tempdir().unwrap();
        let log = RecordLog::new(dir.path().join("users.db"));

        let mut request = b"INSERT alice ".to_vec();
        request.extend(std::iter::repeat(b'x').take(MAX_LINE_BYTES));
        request.push(b'\n');

        let (result, response) = exchange(&request, &log).await;
        assert!(matches!(result, Err(LogKvError::Io(_))));
        assert_eq!(response, b"ERROR\n");
        assert!(log.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let dir = tempdir().unwrap();
        let log = RecordLog::new(dir.path().join("users.db"));

        let (mut client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let handler = tokio::spawn(async move {
            serve(reader, writer, &log, Some(Duration::from_millis(50))).await
        });

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"ERROR\n");
        assert!(matches!(handler.await.unwrap(), Err(LogKvError::Timeout)));
    }
}
