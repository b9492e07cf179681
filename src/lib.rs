//! logkv - a line-oriented key-value store over TCP
//!
//! This library provides:
//! - An append-only record log with first-match-wins lookups
//! - A text protocol with `INSERT <key> <value>` and `LOOKUP <key>`
//! - A TCP server answering one request per connection
//! - A client for the same protocol

pub mod client;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod record_log;
pub mod server;

pub use client::Client;
pub use error::{LogKvError, Result};
pub use protocol::{Command, Response};
pub use record_log::{Record, RecordLog};
pub use server::{LogKvServer, ServerConfig};
