//! Local ledgers
//!
//! `MemoryLedger` lives in-process; `FileLedger` appends one JSON line per
//! transaction so anchors survive restarts of the CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use super::{Anchor, AnchorError};
use crate::types::TxId;

/// Transaction id for the `seq`-th submission of `payload`
fn derive_tx_id(payload: &[u8], seq: u64) -> Result<TxId, AnchorError> {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(seq.to_be_bytes());
    TxId::parse(&hex::encode(hasher.finalize()))
        .map_err(|e| AnchorError::Rejected(e.to_string()))
}

fn check_size(payload: &[u8], max: usize) -> Result<(), AnchorError> {
    if payload.len() > max {
        return Err(AnchorError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }
    Ok(())
}

/// In-process ledger
pub struct MemoryLedger {
    max_payload_bytes: usize,
    entries: RwLock<Vec<(TxId, Vec<u8>)>>,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            max_payload_bytes,
            entries: RwLock::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every call fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Record an arbitrary transaction, bypassing the size ceiling. Stands in
    /// for transactions written by other parties.
    pub fn insert_raw(&self, payload: Vec<u8>) -> Result<TxId, AnchorError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AnchorError::Unavailable("ledger lock poisoned".to_string()))?;
        let tx_id = derive_tx_id(&payload, entries.len() as u64)?;
        entries.push((tx_id.clone(), payload));
        Ok(tx_id)
    }

    /// Number of recorded transactions
    pub fn tx_count(&self) -> Result<usize, AnchorError> {
        self.entries
            .read()
            .map(|e| e.len())
            .map_err(|_| AnchorError::Unavailable("ledger lock poisoned".to_string()))
    }

    fn ensure_online(&self) -> Result<(), AnchorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AnchorError::Unavailable("memory ledger is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(80)
    }
}

#[async_trait]
impl Anchor for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn submit(&self, payload: &[u8]) -> Result<TxId, AnchorError> {
        self.ensure_online()?;
        check_size(payload, self.max_payload_bytes)?;
        self.insert_raw(payload.to_vec())
    }

    async fn fetch_payload(&self, tx_id: &TxId) -> Result<Option<Vec<u8>>, AnchorError> {
        self.ensure_online()?;
        let entries = self
            .entries
            .read()
            .map_err(|_| AnchorError::Unavailable("ledger lock poisoned".to_string()))?;
        Ok(entries
            .iter()
            .find(|(id, _)| id == tx_id)
            .map(|(_, payload)| payload.clone()))
    }
}

/// One line of the file ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerRecord {
    seq: u64,
    tx_id: TxId,
    payload_hex: String,
    submitted_at: DateTime<Utc>,
}

/// Append-only JSON-lines ledger
pub struct FileLedger {
    path: PathBuf,
    max_payload_bytes: usize,
    write_lock: AsyncMutex<()>,
}

impl FileLedger {
    pub fn new(path: impl AsRef<Path>, max_payload_bytes: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes,
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_records(&self) -> Result<Vec<LedgerRecord>, AnchorError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping unreadable ledger line"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Anchor for FileLedger {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn submit(&self, payload: &[u8]) -> Result<TxId, AnchorError> {
        check_size(payload, self.max_payload_bytes)?;
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let seq = self
            .read_records()
            .await?
            .last()
            .map(|r| r.seq + 1)
            .unwrap_or(0);
        let record = LedgerRecord {
            seq,
            tx_id: derive_tx_id(payload, seq)?,
            payload_hex: hex::encode(payload),
            submitted_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&record)
            .map_err(|e| AnchorError::Rejected(format!("cannot encode ledger record: {}", e)))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;

        debug!(tx_id = %record.tx_id, seq, "Ledger transaction appended");
        Ok(record.tx_id)
    }

    async fn fetch_payload(&self, tx_id: &TxId) -> Result<Option<Vec<u8>>, AnchorError> {
        let records = self.read_records().await?;
        match records.into_iter().find(|r| &r.tx_id == tx_id) {
            Some(record) => hex::decode(&record.payload_hex).map(Some).map_err(|e| {
                AnchorError::Unavailable(format!("corrupt payload for {}: {}", tx_id, e))
            }),
            None => Ok(None),
        }
    }
}
