//! First-expire-first-out batch allocation.
//!
//! `allocate` is a pure function over a snapshot of a vendor's batches: it
//! never mutates stock. Committing the resulting plan (and re-validating it
//! under the stream's critical section) is the `VendorStock` aggregate's job.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use rxflow_core::{BatchId, DomainError, DomainResult, ValueObject};

use crate::batch::Batch;

/// One slice of an allocation: take `quantity` units from `batch_id` at the
/// batch's offer price. The expiry date is carried along so order records
/// stay self-contained for later valuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_price: u64,
    pub expiry_date: NaiveDate,
}

impl ValueObject for AllocationLine {}

/// The batch/quantity/price breakdown chosen to satisfy one order.
///
/// Ephemeral: a plan is only ever produced fully satisfied (shortfalls are
/// errors, never partial plans) and is not persisted on its own - once
/// committed it lives on as the order's dispatched batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    /// Lines in consumption order: soonest-expiring batch first.
    pub lines: Vec<AllocationLine>,
    pub total_price: u64,
}

impl ValueObject for AllocationPlan {}

impl AllocationPlan {
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

/// Greedily allocate `requested` units from the soonest-expiring eligible
/// batches.
///
/// Eligibility: `expiry_date >= as_of` and `quantity_on_hand > 0`. Batches
/// with equal expiry dates are consumed in registration order (the slice
/// order), which keeps the plan deterministic.
///
/// All-or-nothing: if the eligible batches cannot cover `requested`, no plan
/// is produced and `DomainError::InsufficientStock` reports what was
/// available.
pub fn allocate(batches: &[Batch], requested: i64, as_of: NaiveDate) -> DomainResult<AllocationPlan> {
    if requested <= 0 {
        return Err(DomainError::validation(
            "requested quantity must be positive",
        ));
    }

    let mut eligible: Vec<&Batch> = batches.iter().filter(|b| b.is_allocatable(as_of)).collect();
    // Stable sort: ties keep registration order.
    eligible.sort_by_key(|b| b.expiry_date);

    let available: i64 = eligible.iter().map(|b| b.quantity_on_hand).sum();
    if available < requested {
        return Err(DomainError::insufficient_stock(requested, available));
    }

    let mut remaining = requested;
    let mut lines = Vec::new();
    let mut total_price: u64 = 0;

    for batch in eligible {
        if remaining == 0 {
            break;
        }
        let take = batch.quantity_on_hand.min(remaining);
        lines.push(AllocationLine {
            batch_id: batch.batch_id,
            quantity: take,
            unit_price: batch.unit_price,
            expiry_date: batch.expiry_date,
        });
        total_price = total_price.saturating_add((take as u64).saturating_mul(batch.unit_price));
        remaining -= take;
    }

    Ok(AllocationPlan { lines, total_price })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn batch(qty: i64, expiry: NaiveDate, unit_price: u64) -> Batch {
        Batch {
            batch_id: BatchId::new(),
            batch_number: "LOT".to_string(),
            manufacturing_date: date(2024, 1, 1),
            expiry_date: expiry,
            quantity_on_hand: qty,
            unit_price,
            list_price: unit_price + 50,
        }
    }

    #[test]
    fn consumes_soonest_expiring_batches_first() {
        let b1 = batch(50, date(2025, 1, 1), 10);
        let b2 = batch(30, date(2025, 2, 1), 12);
        // Registered out of expiry order on purpose.
        let batches = vec![b2.clone(), b1.clone()];

        let plan = allocate(&batches, 60, date(2024, 12, 1)).unwrap();

        assert_eq!(plan.lines.len(), 2);
        assert_eq!(plan.lines[0].batch_id, b1.batch_id);
        assert_eq!(plan.lines[0].quantity, 50);
        assert_eq!(plan.lines[0].unit_price, 10);
        assert_eq!(plan.lines[1].batch_id, b2.batch_id);
        assert_eq!(plan.lines[1].quantity, 10);
        assert_eq!(plan.lines[1].unit_price, 12);
        assert_eq!(plan.total_price, 50 * 10 + 10 * 12);
    }

    #[test]
    fn shortfall_produces_no_plan() {
        let batches = vec![
            batch(50, date(2025, 1, 1), 10),
            batch(30, date(2025, 2, 1), 12),
        ];

        let err = allocate(&batches, 100, date(2024, 12, 1)).unwrap_err();
        match err {
            DomainError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, 100);
                assert_eq!(available, 80);
            }
            e => panic!("Expected InsufficientStock, got: {e:?}"),
        }
    }

    #[test]
    fn expired_batches_are_never_selected() {
        let expired = batch(100, date(2024, 6, 1), 5);
        let live = batch(40, date(2025, 3, 1), 9);
        let batches = vec![expired.clone(), live.clone()];

        let plan = allocate(&batches, 40, date(2024, 12, 1)).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].batch_id, live.batch_id);

        // Expired stock does not count towards availability either.
        let err = allocate(&batches, 41, date(2024, 12, 1)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));
    }

    #[test]
    fn batch_expiring_on_the_allocation_date_is_still_usable() {
        let edge = batch(10, date(2024, 12, 1), 7);
        let plan = allocate(std::slice::from_ref(&edge), 10, date(2024, 12, 1)).unwrap();
        assert_eq!(plan.lines[0].batch_id, edge.batch_id);
    }

    #[test]
    fn equal_expiry_dates_keep_registration_order() {
        let first = batch(10, date(2025, 1, 1), 10);
        let second = batch(10, date(2025, 1, 1), 10);
        let batches = vec![first.clone(), second.clone()];

        let plan = allocate(&batches, 15, date(2024, 12, 1)).unwrap();
        assert_eq!(plan.lines[0].batch_id, first.batch_id);
        assert_eq!(plan.lines[0].quantity, 10);
        assert_eq!(plan.lines[1].batch_id, second.batch_id);
        assert_eq!(plan.lines[1].quantity, 5);
    }

    #[test]
    fn non_positive_request_is_rejected() {
        let batches = vec![batch(10, date(2025, 1, 1), 10)];
        assert!(matches!(
            allocate(&batches, 0, date(2024, 12, 1)).unwrap_err(),
            DomainError::Validation(_)
        ));
        assert!(matches!(
            allocate(&batches, -5, date(2024, 12, 1)).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any produced plan takes exactly the requested quantity,
        /// never more than a batch holds, never from an expired batch, and
        /// lines are ordered by expiry date.
        #[test]
        fn plans_respect_stock_expiry_and_ordering(
            quantities in prop::collection::vec(0i64..200, 1..12),
            expiry_offsets in prop::collection::vec(-30i64..365, 1..12),
            requested in 1i64..500,
        ) {
            let as_of = date(2024, 12, 1);
            let n = quantities.len().min(expiry_offsets.len());
            let batches: Vec<Batch> = (0..n)
                .map(|i| batch(
                    quantities[i],
                    as_of + chrono::Duration::days(expiry_offsets[i]),
                    10,
                ))
                .collect();

            let available: i64 = batches
                .iter()
                .filter(|b| b.is_allocatable(as_of))
                .map(|b| b.quantity_on_hand)
                .sum();

            match allocate(&batches, requested, as_of) {
                Ok(plan) => {
                    prop_assert!(available >= requested);
                    prop_assert_eq!(plan.total_quantity(), requested);

                    let mut last_expiry: Option<NaiveDate> = None;
                    for line in &plan.lines {
                        let source = batches
                            .iter()
                            .find(|b| b.batch_id == line.batch_id)
                            .expect("line references a known batch");
                        prop_assert!(line.quantity > 0);
                        prop_assert!(line.quantity <= source.quantity_on_hand);
                        prop_assert!(!source.is_expired(as_of));
                        if let Some(prev) = last_expiry {
                            prop_assert!(line.expiry_date >= prev);
                        }
                        last_expiry = Some(line.expiry_date);
                    }
                }
                Err(DomainError::InsufficientStock { available: reported, .. }) => {
                    prop_assert!(available < requested);
                    prop_assert_eq!(reported, available);
                }
                Err(e) => prop_assert!(false, "unexpected error: {e:?}"),
            }
        }

        /// Property: a batch is only drawn from once the earlier-expiring
        /// eligible batches are fully drained.
        #[test]
        fn later_batches_only_used_when_earlier_exhausted(
            quantities in prop::collection::vec(1i64..100, 2..8),
            requested in 1i64..300,
        ) {
            let as_of = date(2024, 12, 1);
            let batches: Vec<Batch> = quantities
                .iter()
                .enumerate()
                .map(|(i, &q)| batch(q, as_of + chrono::Duration::days(i as i64 + 1), 10))
                .collect();

            if let Ok(plan) = allocate(&batches, requested, as_of) {
                // Every line except the last one must fully drain its batch.
                for line in &plan.lines[..plan.lines.len() - 1] {
                    let source = batches
                        .iter()
                        .find(|b| b.batch_id == line.batch_id)
                        .unwrap();
                    prop_assert_eq!(line.quantity, source.quantity_on_hand);
                }
            }
        }
    }
}
