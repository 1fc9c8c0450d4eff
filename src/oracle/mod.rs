//! Oracle module - Multi-provider price aggregation
//!
//! Turns the observations gathered in one tick into a single index per asset.

mod aggregator;

pub use aggregator::{aggregate, median};
