//! Error taxonomy for the MITRE mapper (spec §7). Mapping never fails on
//! bad evidence — it just yields fewer candidates — so the only error
//! surfaced here is a malformed knowledge-base refresh.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MitreError {
    #[error("failed to refresh knowledge base: {0}")]
    RefreshFailed(String),
}
