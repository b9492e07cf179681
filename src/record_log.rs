//! Append-only record log backing the whole store
//!
//! Records are stored one per line as `key|value`. Every append and every
//! lookup holds the log lock for the whole open → operate → close sequence,
//! so concurrent connections never interleave bytes in the file or observe a
//! half-written record.

use crate::error::{LogKvError, Result};
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Separates key from value in a stored line
pub const DELIMITER: char = '|';

/// One persisted (key, value) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Encode as a stored line, including the trailing newline
    pub fn encode(&self) -> Result<String> {
        if self.key.is_empty() {
            return Err(LogKvError::InvalidRecord("empty key".to_string()));
        }
        if self.key.contains(DELIMITER) {
            return Err(LogKvError::InvalidRecord(format!(
                "key {:?} contains '{}'",
                self.key, DELIMITER
            )));
        }
        if has_line_break(&self.key) || has_line_break(&self.value) {
            return Err(LogKvError::InvalidRecord(
                "record contains a line break".to_string(),
            ));
        }
        Ok(format!("{}{}{}\n", self.key, DELIMITER, self.value))
    }

    /// Decode a stored line without its trailing newline
    pub fn decode(line: &str) -> Option<Self> {
        let (key, value) = line.split_once(DELIMITER)?;
        Some(Self::new(key, value))
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains(|c: char| c == '\n' || c == '\r')
}

/// Durable append-only log of records.
///
/// In the default mode there is no index and `find_first` scans the file from
/// the start. `open_indexed` additionally keeps a map rebuilt from the file at
/// open time; it holds the same first-match-wins answers as a scan.
pub struct RecordLog {
    path: PathBuf,
    indexed: bool,
    // The lock also serializes file access when no index is kept.
    index: Mutex<Option<HashMap<String, String>>>,
}

impl RecordLog {
    /// Create a scan-mode log. The file is created by the first append.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            indexed: false,
            index: Mutex::new(None),
        }
    }

    /// Open a log and build an in-memory index by replaying the file
    pub async fn open_indexed<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut index = HashMap::new();
        let mut replayed = 0usize;
        scan(&path, |record| {
            replayed += 1;
            index.entry(record.key).or_insert(record.value);
            ControlFlow::Continue(())
        })
        .await?;
        debug!(path = %path.display(), records = replayed, keys = index.len(), "replayed record log");

        Ok(Self {
            path,
            indexed: true,
            index: Mutex::new(Some(index)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Append one record and sync it to disk before returning.
    ///
    /// A torn tail left by an interrupted append is cut off first, and a
    /// failed write is rolled back, so the file always ends on a newline.
    pub async fn append(&self, key: &str, value: &str) -> Result<()> {
        let line = Record::new(key, value).encode()?;

        let mut index = self.index.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .await?;

        let len = file.metadata().await?.len();
        let start = committed_len(&mut file, len).await?;
        if start < len {
            warn!(
                path = %self.path.display(),
                dropped = len - start,
                "truncating torn record at end of log"
            );
            file.set_len(start).await?;
        }

        if let Err(e) = write_at(&mut file, start, line.as_bytes()).await {
            if let Err(rollback) = file.set_len(start).await {
                warn!(path = %self.path.display(), error = %rollback, "failed to roll back partial append");
            }
            return Err(e.into());
        }

        if let Some(index) = &mut *index {
            index
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        Ok(())
    }

    /// Value of the oldest record whose key matches.
    ///
    /// Later inserts for the same key are shadowed by the first one. A missing
    /// file is an empty log, not an error.
    pub async fn find_first(&self, key: &str) -> Result<Option<String>> {
        let index = self.index.lock().await;
        if let Some(index) = &*index {
            return Ok(index.get(key).cloned());
        }

        let mut found = None;
        scan(&self.path, |record| {
            if record.key == key {
                found = Some(record.value);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await?;
        Ok(found)
    }

    /// Every record in log order
    pub async fn records(&self) -> Result<Vec<Record>> {
        let _guard = self.index.lock().await;
        let mut records = Vec::new();
        scan(&self.path, |record| {
            records.push(record);
            ControlFlow::Continue(())
        })
        .await?;
        Ok(records)
    }
}

/// Length of the file up to and including its last newline
async fn committed_len(file: &mut File, len: u64) -> io::Result<u64> {
    const CHUNK: u64 = 4096;
    let mut end = len;
    let mut buf = vec![0u8; CHUNK as usize];

    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(chunk).await?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

async fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Feed records to `visit` in file order until it breaks or the file ends.
/// Callers must hold the log lock.
async fn scan<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(Record) -> ControlFlow<()>,
{
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        line_no += 1;

        let Some(body) = line.strip_suffix('\n') else {
            // an append interrupted before its newline reached the disk
            warn!(path = %path.display(), line = line_no, "ignoring torn record at end of log");
            break;
        };
        if body.is_empty() {
            continue;
        }

        let record = Record::decode(body).ok_or(LogKvError::CorruptRecord { line: line_no })?;
        if visit(record).is_break() {
            break;
        }
    }

    Ok(())
}
