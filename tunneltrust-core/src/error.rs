//! Aggregate error type for Tunneltrust operations.

use thiserror::Error;

use crate::fetch::FetchError;
use crate::store::StoreError;
use crate::sync::SyncError;
use crate::verify::VerifyError;

/// Top-level error type covering every Tunneltrust subsystem.
#[derive(Debug, Error)]
pub enum TunneltrustError {
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
