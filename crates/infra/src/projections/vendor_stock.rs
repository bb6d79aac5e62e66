//! Vendor stock read model: current batch quantities plus expiry reporting.
//!
//! Expired and drawn-down batches stay in the read model on purpose - the
//! expiry report is the reason expired stock remains visible at all.

use chrono::{Days, NaiveDate};
use serde_json::Value as JsonValue;

use rxflow_core::{BatchId, MedicineId, OrgId};
use rxflow_events::EventEnvelope;
use rxflow_stock::{StockEvent, StockId};

use crate::read_model::OrgStore;

use super::{CursorCheck, ProjectionError, StreamCursors};

pub const STOCK_AGGREGATE_TYPE: &str = "stock.vendor_stock";

/// Queryable batch state for one vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    pub medicine_id: MedicineId,
    pub batch_number: String,
    pub manufacturing_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub quantity_on_hand: i64,
    pub unit_price: u64,
    pub list_price: u64,
}

impl BatchRecord {
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expiry_date < as_of
    }
}

/// Vendor stock projection.
///
/// Consumes published envelopes (JSON payloads) and maintains an org-isolated
/// read model keyed by batch. Disposable and rebuildable from the event
/// stream.
#[derive(Debug)]
pub struct VendorStockProjection<S>
where
    S: OrgStore<BatchId, BatchRecord>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> VendorStockProjection<S>
where
    S: OrgStore<BatchId, BatchRecord>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    /// Query one batch.
    pub fn get(&self, vendor_id: OrgId, batch_id: &BatchId) -> Option<BatchRecord> {
        self.store.get(vendor_id, batch_id)
    }

    /// List all batches for a vendor.
    pub fn list(&self, vendor_id: OrgId) -> Vec<BatchRecord> {
        let mut records = self.store.list(vendor_id);
        records.sort_by_key(|r| (r.expiry_date, *r.batch_id.as_uuid().as_bytes()));
        records
    }

    /// List a vendor's batches for one medicine, soonest-expiring first.
    pub fn list_for_medicine(&self, vendor_id: OrgId, medicine_id: MedicineId) -> Vec<BatchRecord> {
        self.list(vendor_id)
            .into_iter()
            .filter(|r| r.medicine_id == medicine_id)
            .collect()
    }

    /// Batches already past their expiry date that still hold stock -
    /// dead inventory the vendor needs to write off.
    pub fn list_expired(&self, vendor_id: OrgId, as_of: NaiveDate) -> Vec<BatchRecord> {
        self.list(vendor_id)
            .into_iter()
            .filter(|r| r.is_expired(as_of) && r.quantity_on_hand > 0)
            .collect()
    }

    /// Batches expiring within the next `days` days that still hold stock.
    pub fn list_expiring_within(
        &self,
        vendor_id: OrgId,
        as_of: NaiveDate,
        days: u64,
    ) -> Vec<BatchRecord> {
        let horizon = as_of
            .checked_add_days(Days::new(days))
            .unwrap_or(NaiveDate::MAX);
        self.list(vendor_id)
            .into_iter()
            .filter(|r| {
                !r.is_expired(as_of) && r.expiry_date <= horizon && r.quantity_on_hand > 0
            })
            .collect()
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != STOCK_AGGREGATE_TYPE {
            return Ok(());
        }

        let org_id = envelope.org_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(org_id, aggregate_id, seq)? {
            CursorCheck::Duplicate => return Ok(()),
            CursorCheck::Apply => {}
        }

        let ev: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_vendor, medicine_id) = match &ev {
            StockEvent::BatchRegistered(e) => (e.vendor_id, e.medicine_id),
            StockEvent::StockAllocated(e) => (e.vendor_id, e.medicine_id),
            StockEvent::AllocationReleased(e) => (e.vendor_id, e.medicine_id),
        };

        if event_vendor != org_id {
            return Err(ProjectionError::OrgIsolation(
                "event vendor_id does not match envelope org_id".to_string(),
            ));
        }
        if StockId::for_medicine(medicine_id).0 != aggregate_id {
            return Err(ProjectionError::OrgIsolation(
                "event medicine_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            StockEvent::BatchRegistered(e) => {
                self.store.upsert(
                    org_id,
                    e.batch_id,
                    BatchRecord {
                        batch_id: e.batch_id,
                        medicine_id: e.medicine_id,
                        batch_number: e.batch_number,
                        manufacturing_date: e.manufacturing_date,
                        expiry_date: e.expiry_date,
                        quantity_on_hand: e.quantity,
                        unit_price: e.unit_price,
                        list_price: e.list_price,
                    },
                );
            }
            StockEvent::StockAllocated(e) => {
                for line in &e.lines {
                    if let Some(mut record) = self.store.get(org_id, &line.batch_id) {
                        record.quantity_on_hand -= line.quantity;
                        self.store.upsert(org_id, line.batch_id, record);
                    }
                }
            }
            StockEvent::AllocationReleased(e) => {
                for line in &e.lines {
                    if let Some(mut record) = self.store.get(org_id, &line.batch_id) {
                        record.quantity_on_hand += line.quantity;
                        self.store.upsert(org_id, line.batch_id, record);
                    }
                }
            }
        }

        self.cursors.advance(org_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut orgs = envs.iter().map(|e| e.org_id()).collect::<Vec<_>>();
            orgs.sort_by_key(|o| *o.as_uuid().as_bytes());
            orgs.dedup();
            for org in orgs {
                self.store.clear_org(org);
                self.cursors.clear_org(org);
            }
        }

        // Deterministic replay order: org, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.org_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
