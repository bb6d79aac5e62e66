use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use rxflow_core::{BatchId, Entity};

/// One manufactured lot of a medicine, held by its vendor.
///
/// Batches are never deleted: a batch drawn down to zero or past its expiry
/// stays on the books as history (and feeds expiry reporting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    /// Human lot label printed on the packaging. Not globally unique.
    pub batch_number: String,
    pub manufacturing_date: NaiveDate,
    pub expiry_date: NaiveDate,
    /// Units currently on hand. Never negative.
    pub quantity_on_hand: i64,
    /// Offer price per unit in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    /// Maximum retail price per unit in smallest currency unit.
    pub list_price: u64,
}

impl Batch {
    /// A batch whose expiry date has passed is excluded from allocation no
    /// matter how much stock it still holds. A batch expiring on `as_of`
    /// itself is still usable.
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expiry_date < as_of
    }

    /// Eligible for allocation: not expired and something left to take.
    pub fn is_allocatable(&self, as_of: NaiveDate) -> bool {
        !self.is_expired(as_of) && self.quantity_on_hand > 0
    }
}

impl Entity for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.batch_id
    }
}
