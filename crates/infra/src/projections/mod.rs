//! Disposable read models built from published event envelopes.
//!
//! Projections consume envelopes with at-least-once delivery, so every apply
//! path is idempotent: a per-stream cursor skips duplicates and rejects gaps.
//! Read models are never the source of truth - each projection can be
//! rebuilt from scratch by replaying the event history.

pub mod medicine_catalog;
pub mod order_history;
pub mod requester_inventory;
pub mod usage_totals;
pub mod vendor_stock;

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use rxflow_core::{AggregateId, OrgId};

pub use medicine_catalog::{CatalogProjection, MedicineRecord};
pub use order_history::{OrderHistoryProjection, OrderRecord};
pub use requester_inventory::{MedicineStockSummary, RequesterInventoryView};
pub use usage_totals::{UsageTotalsProjection, UsageTotalsRecord};
pub use vendor_stock::{BatchRecord, VendorStockProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("org isolation violation: {0}")]
    OrgIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Outcome of a cursor check for an incoming envelope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CursorCheck {
    /// New event; apply it, then advance the cursor.
    Apply,
    /// Replay or duplicate (at-least-once delivery); safe to ignore.
    Duplicate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    org_id: OrgId,
    aggregate_id: AggregateId,
}

/// Per-stream cursor tracking shared by all projections.
///
/// Rules per (org, aggregate) stream:
/// - sequence 0 is invalid;
/// - a sequence at or below the cursor is a duplicate and is skipped;
/// - the first observed event may carry any positive sequence, after which
///   strict +1 increments are enforced.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn check(
        &self,
        org_id: OrgId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<CursorCheck, ProjectionError> {
        let key = CursorKey {
            org_id,
            aggregate_id,
        };
        let last = match self.inner.read() {
            Ok(cursors) => *cursors.get(&key).unwrap_or(&0),
            Err(_) => 0,
        };

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorCheck::Duplicate);
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        Ok(CursorCheck::Apply)
    }

    pub(crate) fn advance(&self, org_id: OrgId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(
                CursorKey {
                    org_id,
                    aggregate_id,
                },
                seq,
            );
        }
    }

    pub(crate) fn clear_org(&self, org_id: OrgId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|k, _| k.org_id != org_id);
        }
    }
}
