//! Order history read model, keyed by requester organization.
//!
//! This is the persisted record the requester-side inventory views recompute
//! from: every delivered order's dispatched batch lines (with committed
//! prices and expiry dates) live here.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use rxflow_core::{MedicineId, OrgId};
use rxflow_events::EventEnvelope;
use rxflow_orders::{DispatchedBatch, OrderEvent, OrderId, OrderStatus, RequesterKind};

use crate::read_model::OrgStore;

use super::{CursorCheck, ProjectionError, StreamCursors};

pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";

/// Queryable order state for one requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub requester_kind: RequesterKind,
    pub requester_name: String,
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub unit_price_snapshot: u64,
    pub total_value: u64,
    pub order_date: DateTime<Utc>,
    pub delivery_date: NaiveDate,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub dispatched_batches: Vec<DispatchedBatch>,
}

impl OrderRecord {
    /// Whether the order arrived by its target date. `None` until delivered.
    pub fn delivered_on_time(&self) -> Option<bool> {
        self.delivered_at
            .map(|at| at.date_naive() <= self.delivery_date)
    }
}

/// Order history projection.
///
/// Consumes published envelopes (JSON payloads) and maintains an org-isolated
/// read model keyed by order. Disposable and rebuildable from the event
/// stream.
#[derive(Debug)]
pub struct OrderHistoryProjection<S>
where
    S: OrgStore<OrderId, OrderRecord>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrderHistoryProjection<S>
where
    S: OrgStore<OrderId, OrderRecord>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    /// Query one order.
    pub fn get(&self, org_id: OrgId, order_id: &OrderId) -> Option<OrderRecord> {
        self.store.get(org_id, order_id)
    }

    /// List all of a requester's orders, oldest first.
    pub fn list(&self, org_id: OrgId) -> Vec<OrderRecord> {
        let mut records = self.store.list(org_id);
        records.sort_by_key(|r| (r.order_date, *r.order_id.0.as_uuid().as_bytes()));
        records
    }

    /// A requester's delivered orders in delivery order - the valuation
    /// input, where "oldest delivery first" decides which lines consumption
    /// is subtracted from.
    pub fn delivered(&self, org_id: OrgId) -> Vec<OrderRecord> {
        let mut records: Vec<_> = self
            .store
            .list(org_id)
            .into_iter()
            .filter(|r| r.status == OrderStatus::Delivered)
            .collect();
        records.sort_by_key(|r| (r.delivered_at, *r.order_id.0.as_uuid().as_bytes()));
        records
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let org_id = envelope.org_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(org_id, aggregate_id, seq)? {
            CursorCheck::Duplicate => return Ok(()),
            CursorCheck::Apply => {}
        }

        let ev: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_org, order_id) = match &ev {
            OrderEvent::OrderPlaced(e) => (e.org_id, e.order_id),
            OrderEvent::DeliveryRequested(e) => (e.org_id, e.order_id),
            OrderEvent::OrderRejected(e) => (e.org_id, e.order_id),
            OrderEvent::OrderDispatched(e) => (e.org_id, e.order_id),
            OrderEvent::OrderDelivered(e) => (e.org_id, e.order_id),
        };

        if event_org != org_id {
            return Err(ProjectionError::OrgIsolation(
                "event org_id does not match envelope org_id".to_string(),
            ));
        }
        if order_id.0 != aggregate_id {
            return Err(ProjectionError::OrgIsolation(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            OrderEvent::OrderPlaced(e) => {
                self.store.upsert(
                    org_id,
                    e.order_id,
                    OrderRecord {
                        order_id: e.order_id,
                        requester_kind: e.requester_kind,
                        requester_name: e.requester_name,
                        vendor_id: e.vendor_id,
                        medicine_id: e.medicine_id,
                        quantity: e.quantity,
                        unit_price_snapshot: e.unit_price_snapshot,
                        total_value: (e.quantity as u64).saturating_mul(e.unit_price_snapshot),
                        order_date: e.occurred_at,
                        delivery_date: e.delivery_date,
                        delivered_at: None,
                        status: OrderStatus::Pending,
                        dispatched_batches: Vec::new(),
                    },
                );
            }
            OrderEvent::DeliveryRequested(e) => {
                if let Some(mut record) = self.store.get(org_id, &e.order_id) {
                    record.status = OrderStatus::RequestedForDelivery;
                    self.store.upsert(org_id, e.order_id, record);
                }
            }
            OrderEvent::OrderRejected(e) => {
                if let Some(mut record) = self.store.get(org_id, &e.order_id) {
                    record.status = OrderStatus::Rejected;
                    self.store.upsert(org_id, e.order_id, record);
                }
            }
            OrderEvent::OrderDispatched(e) => {
                if let Some(mut record) = self.store.get(org_id, &e.order_id) {
                    record.status = OrderStatus::OutForDelivery;
                    record.dispatched_batches = e.batches;
                    record.total_value = e.total_price;
                    self.store.upsert(org_id, e.order_id, record);
                }
            }
            OrderEvent::OrderDelivered(e) => {
                if let Some(mut record) = self.store.get(org_id, &e.order_id) {
                    record.status = OrderStatus::Delivered;
                    record.delivered_at = Some(e.delivered_at);
                    self.store.upsert(org_id, e.order_id, record);
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
