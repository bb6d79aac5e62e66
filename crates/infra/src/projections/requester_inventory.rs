//! Requester-side inventory views: usable stock and its valuation.
//!
//! Both queries are **recomputed on every call** from the order-history and
//! usage-totals read models - nothing here is cached, so the answer can
//! never go stale relative to those models. This is a reporting projection,
//! never the source of truth for stock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use rxflow_core::{MedicineId, OrgId};
use rxflow_orders::{OrderId, RequesterKind};
use rxflow_usage::UsageKind;

use crate::read_model::OrgStore;

use super::order_history::{OrderHistoryProjection, OrderRecord};
use super::usage_totals::{UsageTotalsProjection, UsageTotalsRecord};

/// Per-medicine rollup of currently usable stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedicineStockSummary {
    pub medicine_id: MedicineId,
    pub total_stock: i64,
}

/// A delivered batch line as usage subtraction walks over it.
#[derive(Debug, Clone, Copy)]
struct RemainingLine {
    quantity: i64,
    unit_price: u64,
    expiry_date: chrono::NaiveDate,
}

/// Read-only inventory view over one requester's delivered orders.
pub struct RequesterInventoryView<OS, US>
where
    OS: OrgStore<OrderId, OrderRecord>,
    US: OrgStore<MedicineId, UsageTotalsRecord>,
{
    orders: Arc<OrderHistoryProjection<OS>>,
    usage: Arc<UsageTotalsProjection<US>>,
}

impl<OS, US> RequesterInventoryView<OS, US>
where
    OS: OrgStore<OrderId, OrderRecord>,
    US: OrgStore<MedicineId, UsageTotalsRecord>,
{
    pub fn new(
        orders: Arc<OrderHistoryProjection<OS>>,
        usage: Arc<UsageTotalsProjection<US>>,
    ) -> Self {
        Self { orders, usage }
    }

    /// Currently usable stock per medicine, from the requester's delivered
    /// orders, excluding expired batches and already-consumed quantities.
    pub fn snapshot(
        &self,
        org_id: OrgId,
        medicine_id: Option<MedicineId>,
        as_of: DateTime<Utc>,
    ) -> Vec<MedicineStockSummary> {
        self.remaining_by_medicine(org_id, medicine_id, as_of)
            .into_iter()
            .map(|(medicine_id, lines)| MedicineStockSummary {
                medicine_id,
                total_stock: lines.iter().map(|l| l.quantity).sum(),
            })
            .collect()
    }

    /// Realizable value of currently usable stock, priced at what each unit
    /// actually cost when it was allocated. Expired stock values at zero
    /// even though it was paid for.
    pub fn valuation(
        &self,
        org_id: OrgId,
        medicine_id: Option<MedicineId>,
        as_of: DateTime<Utc>,
    ) -> u64 {
        self.remaining_by_medicine(org_id, medicine_id, as_of)
            .into_iter()
            .flat_map(|(_, lines)| lines)
            .map(|l| (l.quantity as u64).saturating_mul(l.unit_price))
            .sum()
    }

    /// The shared computation: flatten delivered batch lines per medicine in
    /// delivery order, subtract recorded consumption oldest-delivery-first
    /// (consumption drew on the oldest stock while it was still valid), then
    /// drop lines whose batch has expired by `as_of`.
    fn remaining_by_medicine(
        &self,
        org_id: OrgId,
        filter: Option<MedicineId>,
        as_of: DateTime<Utc>,
    ) -> Vec<(MedicineId, Vec<RemainingLine>)> {
        let as_of_date = as_of.date_naive();
        let delivered = self.orders.delivered(org_id);

        let Some(first) = delivered.first() else {
            return Vec::new();
        };
        // Every order of one org shares the requester kind; it decides which
        // consumption counter applies.
        let usage_kind = match first.requester_kind {
            RequesterKind::Pharmacy => UsageKind::Sale,
            RequesterKind::Hospital => UsageKind::Dispense,
        };

        // Flatten lines per medicine, preserving delivery order.
        let mut line_sets: HashMap<MedicineId, Vec<RemainingLine>> = HashMap::new();
        let mut medicine_order: Vec<MedicineId> = Vec::new();
        for record in &delivered {
            if let Some(wanted) = filter {
                if record.medicine_id != wanted {
                    continue;
                }
            }
            for batch in &record.dispatched_batches {
                let lines = line_sets.entry(record.medicine_id).or_insert_with(|| {
                    medicine_order.push(record.medicine_id);
                    Vec::new()
                });
                lines.push(RemainingLine {
                    quantity: batch.quantity,
                    unit_price: batch.unit_price,
                    expiry_date: batch.expiry_date,
                });
            }
        }
        medicine_order.sort_by_key(|m| *m.as_uuid().as_bytes());

        medicine_order
            .into_iter()
            .map(|medicine_id| {
                let mut lines = line_sets.remove(&medicine_id).unwrap_or_default();

                // Subtract consumption from the oldest delivered lines first.
                let mut used = self.usage.get(org_id, medicine_id).for_kind(usage_kind);
                for line in &mut lines {
                    if used == 0 {
                        break;
                    }
                    // Consumption beyond what a line held clamps the line to
                    // zero and carries on to the next one.
                    let taken = line.quantity.min(used);
                    line.quantity -= taken;
                    used -= taken;
                }

                // Whatever is left in an expired batch is worthless now.
                lines.retain(|l| l.quantity > 0 && l.expiry_date >= as_of_date);
                (medicine_id, lines)
            })
            .collect()
    }
}
