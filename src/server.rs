//! logkv TCP server
//!
//! Accepts connections and runs one handler task per connection against a
//! shared record log. The number of live handlers is capped by a semaphore.

use crate::{
    error::{LogKvError, Result},
    handler::handle_connection,
    record_log::RecordLog,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    net::TcpListener,
    sync::{watch, Semaphore},
};
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// logkv server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub max_connections: usize,
    /// Deadline for reading the request and for writing the response
    pub io_timeout: Option<Duration>,
    /// Keep an in-memory index instead of scanning the file on every lookup
    pub indexed: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:12347".to_string(),
            db_path: PathBuf::from("users.db"),
            max_connections: 1024,
            io_timeout: Some(Duration::from_secs(30)),
            indexed: false,
        }
    }
}

/// logkv TCP server
pub struct LogKvServer {
    listener: TcpListener,
    log: Arc<RecordLog>,
    limit: Arc<Semaphore>,
    io_timeout: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
}

impl LogKvServer {
    /// Open the record log and bind the listener
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(LogKvError::Server(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let log = if config.indexed {
            RecordLog::open_indexed(&config.db_path).await?
        } else {
            RecordLog::new(&config.db_path)
        };
        info!(
            path = %log.path().display(),
            indexed = log.is_indexed(),
            "using record log"
        );

        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            log: Arc::new(log),
            limit: Arc::new(Semaphore::new(config.max_connections)),
            io_timeout: config.io_timeout,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn log(&self) -> &Arc<RecordLog> {
        &self.log
    }

    /// Accept connections until `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        info!("logkv server listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            // Wait for a free handler slot before taking the next connection.
            let permit = tokio::select! {
                permit = Arc::clone(&self.limit).acquire_owned() => permit
                    .map_err(|_| LogKvError::Server("connection limiter closed".to_string()))?,
                _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
            };

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(peer = %addr, "accepted connection");
                            let log = Arc::clone(&self.log);
                            let io_timeout = self.io_timeout;

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, &log, io_timeout).await {
                                    warn!(peer = %addr, error = %e, "connection ended with error");
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                            // errors such as EMFILE persist; give handlers time to release descriptors
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }

                _ = async { shutdown_rx.wait_for(|stopped| *stopped).await.map(|_| ()) } => break,
            }
        }

        info!("logkv server stopped");
        Ok(())
    }

    /// Trigger graceful shutdown of the accept loop.
    ///
    /// The request is kept, so a `run` that starts later returns at once.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            db_path: dir.join("users.db"),
            max_connections: 4,
            io_timeout: Some(Duration::from_secs(5)),
            indexed: false,
        }
    }

    async fn request(addr: SocketAddr, line: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_rejects_zero_connection_limit() {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            max_connections: 0,
            ..test_config(dir.path())
        };
        assert!(LogKvServer::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_serves_and_shuts_down() {
        let dir = tempdir().unwrap();
        let server = Arc::new(LogKvServer::bind(test_config(dir.path())).await.unwrap());
        let addr = server.local_addr().unwrap();

        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run().await });

        assert_eq!(request(addr, "INSERT alice secret123\n").await, "OK\n");
        assert_eq!(request(addr, "LOOKUP alice\n").await, "secret123\n");

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_run() {
        let dir = tempdir().unwrap();
        let server = LogKvServer::bind(test_config(dir.path())).await.unwrap();

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.run())
            .await
            .expect("run should return after an earlier shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_queues_excess() {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            max_connections: 1,
            ..test_config(dir.path())
        };
        let server = Arc::new(LogKvServer::bind(config).await.unwrap());
        let addr = server.local_addr().unwrap();

        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        // Holds the only slot until it sends its request.
        let mut idle = TcpStream::connect(addr).await.unwrap();
        let queued = tokio::spawn(async move { request(addr, "LOOKUP alice\n").await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!queued.is_finished());

        idle.write_all(b"LOOKUP bob\n").await.unwrap();
        let mut response = String::new();
        idle.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "NOT_FOUND\n");

        assert_eq!(queued.await.unwrap(), "NOT_FOUND\n");
    }
}
