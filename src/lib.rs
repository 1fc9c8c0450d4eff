//! Oracle Anchor Library
//!
//! Multi-provider price index with reproducible evidence bundles, compact
//! on-chain commitments and independent verification.

pub mod anchor;
pub mod config;
pub mod evidence;
pub mod oracle;
pub mod scheduler;
pub mod store;
pub mod tick;
pub mod types;
pub mod verifier;
