//! Crash recovery
//!
//! A process that dies mid-execution leaves RUNNING rows behind. The
//! sweep runs once at startup, before the scheduler starts and before
//! any execute call is accepted, and fails every RUNNING execution with
//! a stable message. It cannot distinguish a row owned by another live
//! orchestrator from a truly orphaned one; single-writer operation
//! against the store file is assumed.

use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::store::Store;

/// Startup reconciliation of in-flight executions
pub struct RecoverySweep {
    store: Arc<Store>,
}

impl RecoverySweep {
    /// Create a sweep over `store`
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Fail all RUNNING executions; returns the number swept
    pub async fn run(&self) -> Result<u64> {
        let swept = self.store.mark_running_as_failed().await?;
        if swept > 0 {
            info!(count = swept, "recovered orphaned executions");
        }
        Ok(swept)
    }
}
