//! Anchor module - boundary to the append-only ledger
//!
//! The core only needs two operations from a ledger: submit a small payload
//! and read it back by transaction id. Chain clients implement [`Anchor`];
//! [`MemoryLedger`] and [`FileLedger`] are local stand-ins.

mod ledger;
mod payload;

pub use ledger::{FileLedger, MemoryLedger};
pub use payload::{
    decode_payload, encode_payload, round_to, AnchorPayload, PayloadError, DISPERSION_DECIMALS,
    MAX_PRICE, MAX_SOURCES, MIN_PAYLOAD_CEILING, MIN_SOURCES, PRICE_DECIMALS,
};

use async_trait::async_trait;

use crate::types::TxId;

/// Ledger client used for anchoring and verification
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Anchor: Send + Sync {
    /// Ledger name for logs
    fn name(&self) -> &'static str;

    /// Commit a payload, returning the transaction id
    async fn submit(&self, payload: &[u8]) -> Result<TxId, AnchorError>;

    /// Payload carried by a transaction. `Ok(None)` when the transaction does
    /// not exist; an empty vector when it exists without payload.
    async fn fetch_payload(&self, tx_id: &TxId) -> Result<Option<Vec<u8>>, AnchorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("payload is {size} bytes, ledger accepts at most {max}")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("ledger call timed out after {0}ms")]
    Timeout(u64),
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
}
