//! Fulfillment application service.
//!
//! The write-side surface the surrounding system calls into: vendors
//! register medicines and batches, requesters place orders and record
//! consumption, and dispatch runs the allocate → commit → annotate pipeline.
//!
//! Concurrency protocol for dispatch:
//!
//! 1. the order is loaded and its status checked (only one dispatch may
//!    ever pass this gate - the aggregate re-checks under its own
//!    optimistic append);
//! 2. a fresh stock snapshot is allocated and committed; a commit that lost
//!    a concurrent race is retried against a fresh snapshot, at most
//!    [`MAX_DISPATCH_ATTEMPTS`] times;
//! 3. the committed batches are recorded on the order. If that record loses
//!    a double-dispatch race, the already-committed stock is released again,
//!    so no unit stays reserved for an order that was never dispatched.
//!
//! Every failure path leaves both the order and the stock in the state a
//! caller observed before the call (allocation + release cancel out).

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;

use rxflow_catalog::{Medicine, MedicineCommand, RegisterMedicine, UpdateMedicinePrices};
use rxflow_core::{AggregateId, BatchId, MedicineId, OrgId};
use rxflow_events::{EventBus, EventEnvelope};
use rxflow_orders::{
    ConfirmDelivered, DispatchedBatch, Order, OrderCommand, OrderId, OrderStatus, PlaceOrder,
    RecordDispatch, RejectOrder, RequestDelivery, RequesterKind,
};
use rxflow_stock::{
    AllocationPlan, CommitAllocation, RegisterBatch, ReleaseAllocation, StockCommand, StockId,
    VendorStock, allocate,
};
use rxflow_usage::{RecordUsage, UsageCommand, UsageKind, UsageLog, UsageLogId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::CatalogProjection;
use crate::projections::medicine_catalog::MEDICINE_AGGREGATE_TYPE;
use crate::projections::order_history::ORDER_AGGREGATE_TYPE;
use crate::projections::usage_totals::USAGE_AGGREGATE_TYPE;
use crate::projections::vendor_stock::STOCK_AGGREGATE_TYPE;

/// How many times a dispatch re-runs allocation after losing a stock-commit
/// race before the conflict is surfaced to the caller.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 3;

/// Application service for the fulfillment core.
///
/// Holds the command dispatcher (write side) plus the catalog read model it
/// needs to resolve a medicine's owning vendor and price at placement time.
pub struct FulfillmentService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    catalog: Arc<CatalogProjection>,
}

impl<S, B> FulfillmentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, catalog: Arc<CatalogProjection>) -> Self {
        Self {
            dispatcher,
            catalog,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Register a medicine in the vendor's catalog.
    pub fn register_medicine(
        &self,
        vendor_id: OrgId,
        brand_name: impl Into<String>,
        generic_name: impl Into<String>,
        unit_price: u64,
        list_price: u64,
    ) -> Result<MedicineId, DispatchError> {
        let medicine_id = MedicineId::new();
        let cmd = RegisterMedicine {
            vendor_id,
            medicine_id,
            brand_name: brand_name.into(),
            generic_name: generic_name.into(),
            unit_price,
            list_price,
            occurred_at: Utc::now(),
        };

        self.dispatcher.dispatch(
            vendor_id,
            AggregateId::from_uuid(*medicine_id.as_uuid()),
            MEDICINE_AGGREGATE_TYPE,
            MedicineCommand::RegisterMedicine(cmd),
            |_, id| Medicine::empty(MedicineId::from_uuid(*id.as_uuid())),
        )?;

        tracing::info!("registered medicine {medicine_id} for vendor {vendor_id}");
        Ok(medicine_id)
    }

    /// Update a medicine's offer/list prices.
    pub fn update_medicine_prices(
        &self,
        vendor_id: OrgId,
        medicine_id: MedicineId,
        unit_price: u64,
        list_price: u64,
    ) -> Result<(), DispatchError> {
        let cmd = UpdateMedicinePrices {
            vendor_id,
            medicine_id,
            unit_price,
            list_price,
            occurred_at: Utc::now(),
        };

        self.dispatcher.dispatch(
            vendor_id,
            AggregateId::from_uuid(*medicine_id.as_uuid()),
            MEDICINE_AGGREGATE_TYPE,
            MedicineCommand::UpdateMedicinePrices(cmd),
            |_, id| Medicine::empty(MedicineId::from_uuid(*id.as_uuid())),
        )?;

        Ok(())
    }

    /// Register a new batch of stock for a medicine the vendor owns.
    pub fn register_batch(
        &self,
        vendor_id: OrgId,
        medicine_id: MedicineId,
        batch_number: impl Into<String>,
        quantity: i64,
        unit_price: u64,
        list_price: u64,
        manufacturing_date: NaiveDate,
        expiry_date: NaiveDate,
    ) -> Result<BatchId, DispatchError> {
        // The vendor's own medicine stream is strongly consistent, so the
        // unknown-medicine check does not depend on projection lag.
        let (medicine, _) = self.dispatcher.load_aggregate(
            vendor_id,
            AggregateId::from_uuid(*medicine_id.as_uuid()),
            |_, id| Medicine::empty(MedicineId::from_uuid(*id.as_uuid())),
        )?;
        if medicine.vendor_id() != Some(vendor_id) {
            return Err(DispatchError::Validation("unknown medicine".to_string()));
        }

        let batch_id = BatchId::new();
        let cmd = RegisterBatch {
            vendor_id,
            medicine_id,
            batch_id,
            batch_number: batch_number.into(),
            quantity,
            unit_price,
            list_price,
            manufacturing_date,
            expiry_date,
            occurred_at: Utc::now(),
        };

        self.dispatcher.dispatch(
            vendor_id,
            StockId::for_medicine(medicine_id).0,
            STOCK_AGGREGATE_TYPE,
            StockCommand::RegisterBatch(cmd),
            |_, id| VendorStock::empty(StockId::new(id)),
        )?;

        tracing::info!("registered batch {batch_id} ({quantity} units) of medicine {medicine_id}");
        Ok(batch_id)
    }

    /// Place an order for a medicine; the owning vendor and the price
    /// snapshot are resolved through the catalog. Returns the new order in
    /// `Pending` state - no stock is touched yet.
    pub fn place_order(
        &self,
        org_id: OrgId,
        requester_kind: RequesterKind,
        requester_name: impl Into<String>,
        medicine_id: MedicineId,
        quantity: i64,
        delivery_date: NaiveDate,
    ) -> Result<OrderId, DispatchError> {
        let medicine = self
            .catalog
            .get(medicine_id)
            .ok_or_else(|| DispatchError::Validation("unknown medicine".to_string()))?;

        let order_id = OrderId::new(AggregateId::new());
        let cmd = PlaceOrder {
            org_id,
            order_id,
            requester_kind,
            requester_name: requester_name.into(),
            vendor_id: medicine.vendor_id,
            medicine_id,
            quantity,
            unit_price_snapshot: medicine.unit_price,
            delivery_date,
            occurred_at: Utc::now(),
        };

        self.dispatcher.dispatch(
            org_id,
            order_id.0,
            ORDER_AGGREGATE_TYPE,
            OrderCommand::PlaceOrder(cmd),
            |_, id| Order::empty(OrderId::new(id)),
        )?;

        tracing::info!("order {order_id} placed: {quantity} units of medicine {medicine_id}");
        Ok(order_id)
    }

    /// Requester asks for their pending order to be delivered.
    pub fn request_delivery(&self, org_id: OrgId, order_id: OrderId) -> Result<(), DispatchError> {
        let cmd = RequestDelivery {
            org_id,
            order_id,
            occurred_at: Utc::now(),
        };
        self.dispatcher.dispatch(
            org_id,
            order_id.0,
            ORDER_AGGREGATE_TYPE,
            OrderCommand::RequestDelivery(cmd),
            |_, id| Order::empty(OrderId::new(id)),
        )?;
        Ok(())
    }

    /// Vendor declines a pending order. No stock was reserved for it.
    pub fn reject_order(&self, org_id: OrgId, order_id: OrderId) -> Result<(), DispatchError> {
        let cmd = RejectOrder {
            org_id,
            order_id,
            occurred_at: Utc::now(),
        };
        self.dispatcher.dispatch(
            org_id,
            order_id.0,
            ORDER_AGGREGATE_TYPE,
            OrderCommand::RejectOrder(cmd),
            |_, id| Order::empty(OrderId::new(id)),
        )?;
        Ok(())
    }

    /// Dispatch an order: allocate batches first-expire-first-out, commit the
    /// decrement, and record the chosen batches on the order.
    ///
    /// On `InsufficientStock` the order stays in `RequestedForDelivery`,
    /// nothing is decremented, and the operator can retry after restock.
    pub fn dispatch_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<Vec<DispatchedBatch>, DispatchError> {
        let (order, _) = self
            .dispatcher
            .load_aggregate(org_id, order_id.0, |_, id| Order::empty(OrderId::new(id)))?;

        let (Some(vendor_id), Some(medicine_id)) = (order.vendor_id(), order.medicine_id()) else {
            return Err(DispatchError::NotFound);
        };
        if order.status() != OrderStatus::RequestedForDelivery {
            return Err(DispatchError::InvalidTransition {
                from: order.status().to_string(),
                action: "dispatch".to_string(),
            });
        }

        let plan = self.allocate_and_commit(vendor_id, medicine_id, order_id, order.quantity())?;

        let batches: Vec<DispatchedBatch> = plan
            .lines
            .iter()
            .map(|l| DispatchedBatch {
                batch_id: l.batch_id,
                quantity: l.quantity,
                unit_price: l.unit_price,
                expiry_date: l.expiry_date,
            })
            .collect();

        let record = RecordDispatch {
            org_id,
            order_id,
            batches: batches.clone(),
            total_price: plan.total_price,
            occurred_at: Utc::now(),
        };
        match self.dispatcher.dispatch(
            org_id,
            order_id.0,
            ORDER_AGGREGATE_TYPE,
            OrderCommand::RecordDispatch(record),
            |_, id| Order::empty(OrderId::new(id)),
        ) {
            Ok(_) => {
                tracing::info!(
                    "order {order_id} dispatched from {} batch(es), total {}",
                    batches.len(),
                    plan.total_price
                );
                Ok(batches)
            }
            Err(err) => {
                // A concurrent dispatch won the order append after our stock
                // commit. Put the units back; the winner's allocation stands.
                self.release_allocation(vendor_id, medicine_id, order_id, &plan);
                Err(err)
            }
        }
    }

    /// Confirm receipt of an out-for-delivery order. Stamps the explicit
    /// delivery time used for punctuality reporting.
    pub fn confirm_delivered(&self, org_id: OrgId, order_id: OrderId) -> Result<(), DispatchError> {
        let now = Utc::now();
        let cmd = ConfirmDelivered {
            org_id,
            order_id,
            delivered_at: now,
            occurred_at: now,
        };
        self.dispatcher.dispatch(
            org_id,
            order_id.0,
            ORDER_AGGREGATE_TYPE,
            OrderCommand::ConfirmDelivered(cmd),
            |_, id| Order::empty(OrderId::new(id)),
        )?;
        Ok(())
    }

    /// Pharmacy sold units over the counter.
    pub fn record_sale(
        &self,
        org_id: OrgId,
        medicine_id: MedicineId,
        quantity: i64,
    ) -> Result<(), DispatchError> {
        self.record_usage(org_id, medicine_id, UsageKind::Sale, quantity)
    }

    /// Hospital dispensed units to patients.
    pub fn record_dispense(
        &self,
        org_id: OrgId,
        medicine_id: MedicineId,
        quantity: i64,
    ) -> Result<(), DispatchError> {
        self.record_usage(org_id, medicine_id, UsageKind::Dispense, quantity)
    }

    fn record_usage(
        &self,
        org_id: OrgId,
        medicine_id: MedicineId,
        kind: UsageKind,
        quantity: i64,
    ) -> Result<(), DispatchError> {
        let cmd = RecordUsage {
            org_id,
            medicine_id,
            kind,
            quantity,
            occurred_at: Utc::now(),
        };
        self.dispatcher.dispatch(
            org_id,
            UsageLogId::for_org(org_id).0,
            USAGE_AGGREGATE_TYPE,
            UsageCommand::RecordUsage(cmd),
            |_, id| UsageLog::empty(UsageLogId::new(id)),
        )?;
        Ok(())
    }

    /// The read-validate-write retry loop: allocate from a fresh snapshot,
    /// try to commit, and re-run on a lost race. Bounded - an order is never
    /// silently retried forever.
    fn allocate_and_commit(
        &self,
        vendor_id: OrgId,
        medicine_id: MedicineId,
        order_id: OrderId,
        quantity: i64,
    ) -> Result<AllocationPlan, DispatchError> {
        let stock_aggregate = StockId::for_medicine(medicine_id).0;

        for attempt in 1..=MAX_DISPATCH_ATTEMPTS {
            let (stock, _) = self
                .dispatcher
                .load_aggregate(vendor_id, stock_aggregate, |_, id| {
                    VendorStock::empty(StockId::new(id))
                })?;

            let now = Utc::now();
            let plan = allocate(stock.batches(), quantity, now.date_naive())
                .map_err(DispatchError::from)?;

            let commit = CommitAllocation {
                vendor_id,
                medicine_id,
                order_id: order_id.0,
                plan: plan.clone(),
                occurred_at: now,
            };
            match self.dispatcher.dispatch(
                vendor_id,
                stock_aggregate,
                STOCK_AGGREGATE_TYPE,
                StockCommand::CommitAllocation(commit),
                |_, id| VendorStock::empty(StockId::new(id)),
            ) {
                Ok(_) => return Ok(plan),
                Err(err) if err.is_retryable() && attempt < MAX_DISPATCH_ATTEMPTS => {
                    tracing::warn!(
                        "stock commit for order {order_id} lost a race (attempt {attempt}), reallocating"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("loop either returns a plan or an error")
    }

    /// Undo a committed allocation whose order-side record failed. The
    /// release itself can lose races against other commits on the stream, so
    /// it retries with the same bound.
    fn release_allocation(
        &self,
        vendor_id: OrgId,
        medicine_id: MedicineId,
        order_id: OrderId,
        plan: &AllocationPlan,
    ) {
        let stock_aggregate = StockId::for_medicine(medicine_id).0;

        for attempt in 1..=MAX_DISPATCH_ATTEMPTS {
            let release = ReleaseAllocation {
                vendor_id,
                medicine_id,
                order_id: order_id.0,
                lines: plan.lines.clone(),
                occurred_at: Utc::now(),
            };
            match self.dispatcher.dispatch(
                vendor_id,
                stock_aggregate,
                STOCK_AGGREGATE_TYPE,
                StockCommand::ReleaseAllocation(release),
                |_, id| VendorStock::empty(StockId::new(id)),
            ) {
                Ok(_) => {
                    tracing::warn!("released allocation for order {order_id} after lost dispatch race");
                    return;
                }
                Err(err) if err.is_retryable() && attempt < MAX_DISPATCH_ATTEMPTS => {}
                Err(err) => {
                    tracing::error!(
                        "failed to release allocation for order {order_id}: {err:?}"
                    );
                    return;
                }
            }
        }
    }
}
