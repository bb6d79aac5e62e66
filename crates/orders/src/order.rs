use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxflow_core::{
    Aggregate, AggregateId, AggregateRoot, BatchId, DomainError, MedicineId, OrgId, ValueObject,
};
use rxflow_events::Event;

/// Order identifier (org-scoped via `org_id` fields in events/commands; the
/// owning organization is the requester).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Who placed the order. Determines which consumption log the valuation
/// side subtracts: pharmacies log sales, hospitals log dispenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequesterKind {
    Hospital,
    Pharmacy,
}

/// Order status lifecycle.
///
/// ```text
/// Pending → RequestedForDelivery → OutForDelivery → Delivered
///    └────→ Rejected
/// ```
///
/// `Delivered` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    RequestedForDelivery,
    OutForDelivery,
    Delivered,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Rejected)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::RequestedForDelivery => "requested for delivery",
            OrderStatus::OutForDelivery => "out for delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

/// One batch slice dispatched against an order: which lot, how many units,
/// at what committed price, expiring when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedBatch {
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_price: u64,
    pub expiry_date: NaiveDate,
}

impl ValueObject for DispatchedBatch {}

/// Aggregate root: Order - one request for one medicine by one requester.
///
/// Orders are the audit trail: they are never deleted, and once the
/// dispatched batches are recorded they are immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    org_id: Option<OrgId>,
    requester_kind: RequesterKind,
    requester_name: String,
    vendor_id: Option<OrgId>,
    medicine_id: Option<MedicineId>,
    quantity: i64,
    /// Catalog offer price per unit at placement time.
    unit_price_snapshot: u64,
    /// Placement estimate until dispatch; then fixed from the committed
    /// plan's total.
    total_value: u64,
    order_date: DateTime<Utc>,
    /// Target delivery date agreed at placement.
    delivery_date: NaiveDate,
    /// Set exactly once, on confirmation. Kept separate from any record
    /// bookkeeping timestamps so punctuality reporting is trustworthy.
    delivered_at: Option<DateTime<Utc>>,
    status: OrderStatus,
    dispatched_batches: Vec<DispatchedBatch>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            org_id: None,
            requester_kind: RequesterKind::Hospital,
            requester_name: String::new(),
            vendor_id: None,
            medicine_id: None,
            quantity: 0,
            unit_price_snapshot: 0,
            total_value: 0,
            order_date: DateTime::<Utc>::MIN_UTC,
            delivery_date: NaiveDate::MIN,
            delivered_at: None,
            status: OrderStatus::Pending,
            dispatched_batches: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn org_id(&self) -> Option<OrgId> {
        self.org_id
    }

    pub fn requester_kind(&self) -> RequesterKind {
        self.requester_kind
    }

    pub fn requester_name(&self) -> &str {
        &self.requester_name
    }

    pub fn vendor_id(&self) -> Option<OrgId> {
        self.vendor_id
    }

    pub fn medicine_id(&self) -> Option<MedicineId> {
        self.medicine_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price_snapshot(&self) -> u64 {
        self.unit_price_snapshot
    }

    pub fn total_value(&self) -> u64 {
        self.total_value
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn delivery_date(&self) -> NaiveDate {
        self.delivery_date
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn dispatched_batches(&self) -> &[DispatchedBatch] {
        &self.dispatched_batches
    }

    /// Whether the order arrived by its target date. `None` until delivered.
    pub fn delivered_on_time(&self) -> Option<bool> {
        self.delivered_at
            .map(|at| at.date_naive() <= self.delivery_date)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub requester_kind: RequesterKind,
    pub requester_name: String,
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub unit_price_snapshot: u64,
    pub delivery_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestDelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDelivery {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectOrder (vendor declines a pending order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOrder {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDispatch - annotate the order with the committed batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDispatch {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub batches: Vec<DispatchedBatch>,
    pub total_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDelivered {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub delivered_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    RequestDelivery(RequestDelivery),
    RejectOrder(RejectOrder),
    RecordDispatch(RecordDispatch),
    ConfirmDelivered(ConfirmDelivered),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub requester_kind: RequesterKind,
    pub requester_name: String,
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub unit_price_snapshot: u64,
    pub delivery_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequested {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejected {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDispatched {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub batches: Vec<DispatchedBatch>,
    pub total_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub delivered_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    DeliveryRequested(DeliveryRequested),
    OrderRejected(OrderRejected),
    OrderDispatched(OrderDispatched),
    OrderDelivered(OrderDelivered),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::DeliveryRequested(_) => "orders.order.delivery_requested",
            OrderEvent::OrderRejected(_) => "orders.order.rejected",
            OrderEvent::OrderDispatched(_) => "orders.order.dispatched",
            OrderEvent::OrderDelivered(_) => "orders.order.delivered",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::DeliveryRequested(e) => e.occurred_at,
            OrderEvent::OrderRejected(e) => e.occurred_at,
            OrderEvent::OrderDispatched(e) => e.occurred_at,
            OrderEvent::OrderDelivered(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.org_id = Some(e.org_id);
                self.requester_kind = e.requester_kind;
                self.requester_name = e.requester_name.clone();
                self.vendor_id = Some(e.vendor_id);
                self.medicine_id = Some(e.medicine_id);
                self.quantity = e.quantity;
                self.unit_price_snapshot = e.unit_price_snapshot;
                self.total_value =
                    (e.quantity as u64).saturating_mul(e.unit_price_snapshot);
                self.order_date = e.occurred_at;
                self.delivery_date = e.delivery_date;
                self.status = OrderStatus::Pending;
                self.created = true;
            }
            OrderEvent::DeliveryRequested(_) => {
                self.status = OrderStatus::RequestedForDelivery;
            }
            OrderEvent::OrderRejected(_) => {
                self.status = OrderStatus::Rejected;
            }
            OrderEvent::OrderDispatched(e) => {
                self.status = OrderStatus::OutForDelivery;
                self.dispatched_batches = e.batches.clone();
                self.total_value = e.total_price;
            }
            OrderEvent::OrderDelivered(e) => {
                self.status = OrderStatus::Delivered;
                self.delivered_at = Some(e.delivered_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::RequestDelivery(cmd) => self.handle_request_delivery(cmd),
            OrderCommand::RejectOrder(cmd) => self.handle_reject(cmd),
            OrderCommand::RecordDispatch(cmd) => self.handle_record_dispatch(cmd),
            OrderCommand::ConfirmDelivered(cmd) => self.handle_confirm_delivered(cmd),
        }
    }
}

impl Order {
    fn ensure_org(&self, org_id: OrgId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.org_id != Some(org_id) {
            return Err(DomainError::invariant("org_id mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: OrderStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(
                self.status.to_string(),
                action,
            ));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.requester_name.trim().is_empty() {
            return Err(DomainError::validation("requester name cannot be empty"));
        }
        if cmd.delivery_date < cmd.occurred_at.date_naive() {
            return Err(DomainError::validation(
                "target delivery date cannot be in the past",
            ));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            org_id: cmd.org_id,
            order_id: cmd.order_id,
            requester_kind: cmd.requester_kind,
            requester_name: cmd.requester_name.clone(),
            vendor_id: cmd.vendor_id,
            medicine_id: cmd.medicine_id,
            quantity: cmd.quantity,
            unit_price_snapshot: cmd.unit_price_snapshot,
            delivery_date: cmd.delivery_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_delivery(
        &self,
        cmd: &RequestDelivery,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_org(cmd.org_id)?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_status(OrderStatus::Pending, "request delivery for")?;

        Ok(vec![OrderEvent::DeliveryRequested(DeliveryRequested {
            org_id: cmd.org_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_org(cmd.org_id)?;
        self.ensure_order_id(cmd.order_id)?;
        // Rejection is only an alternative to the Pending branch; anything
        // later is already committed work.
        self.ensure_status(OrderStatus::Pending, "reject")?;

        Ok(vec![OrderEvent::OrderRejected(OrderRejected {
            org_id: cmd.org_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_dispatch(&self, cmd: &RecordDispatch) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_org(cmd.org_id)?;
        self.ensure_order_id(cmd.order_id)?;
        // This is the double-dispatch guard: once the order has left
        // RequestedForDelivery, a second dispatch attempt cannot pass.
        self.ensure_status(OrderStatus::RequestedForDelivery, "dispatch")?;

        if cmd.batches.is_empty() {
            return Err(DomainError::validation("dispatch carries no batches"));
        }
        let dispatched: i64 = cmd.batches.iter().map(|b| b.quantity).sum();
        if dispatched != self.quantity {
            return Err(DomainError::invariant(format!(
                "dispatched quantity {} does not match ordered quantity {}",
                dispatched, self.quantity
            )));
        }

        Ok(vec![OrderEvent::OrderDispatched(OrderDispatched {
            org_id: cmd.org_id,
            order_id: cmd.order_id,
            batches: cmd.batches.clone(),
            total_price: cmd.total_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_delivered(
        &self,
        cmd: &ConfirmDelivered,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_org(cmd.org_id)?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_status(OrderStatus::OutForDelivery, "confirm delivery of")?;

        Ok(vec![OrderEvent::OrderDelivered(OrderDelivered {
            org_id: cmd.org_id,
            order_id: cmd.order_id,
            delivered_at: cmd.delivered_at,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_org_id() -> OrgId {
        OrgId::new()
    }

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        "2024-12-01T10:00:00Z".parse().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn place_cmd(org_id: OrgId, order_id: OrderId) -> PlaceOrder {
        PlaceOrder {
            org_id,
            order_id,
            requester_kind: RequesterKind::Pharmacy,
            requester_name: "Greenfield Pharmacy".to_string(),
            vendor_id: OrgId::new(),
            medicine_id: MedicineId::new(),
            quantity: 60,
            unit_price_snapshot: 10,
            delivery_date: date(2024, 12, 15),
            occurred_at: test_time(),
        }
    }

    fn dispatched_batches() -> Vec<DispatchedBatch> {
        vec![
            DispatchedBatch {
                batch_id: BatchId::new(),
                quantity: 50,
                unit_price: 10,
                expiry_date: date(2025, 1, 1),
            },
            DispatchedBatch {
                batch_id: BatchId::new(),
                quantity: 10,
                unit_price: 12,
                expiry_date: date(2025, 2, 1),
            },
        ]
    }

    /// Drive an order up to the given status.
    fn order_at(org_id: OrgId, order_id: OrderId, status: OrderStatus) -> Order {
        let mut order = Order::empty(order_id);
        let steps: Vec<OrderCommand> = vec![
            OrderCommand::PlaceOrder(place_cmd(org_id, order_id)),
            OrderCommand::RequestDelivery(RequestDelivery {
                org_id,
                order_id,
                occurred_at: test_time(),
            }),
            OrderCommand::RecordDispatch(RecordDispatch {
                org_id,
                order_id,
                batches: dispatched_batches(),
                total_price: 620,
                occurred_at: test_time(),
            }),
            OrderCommand::ConfirmDelivered(ConfirmDelivered {
                org_id,
                order_id,
                delivered_at: test_time(),
                occurred_at: test_time(),
            }),
        ];

        for cmd in steps {
            if order.created && order.status() == status {
                break;
            }
            let events = order.handle(&cmd).unwrap();
            for event in &events {
                order.apply(event);
            }
        }
        assert_eq!(order.status(), status);
        order
    }

    #[test]
    fn place_order_starts_pending_with_no_batches() {
        let mut order = Order::empty(test_order_id());
        let org_id = test_org_id();
        let order_id = test_order_id();

        let events = order
            .handle(&OrderCommand::PlaceOrder(place_cmd(org_id, order_id)))
            .unwrap();
        assert_eq!(events.len(), 1);
        order.apply(&events[0]);

        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(order.dispatched_batches().is_empty());
        assert_eq!(order.total_value(), 600);
        assert_eq!(order.delivered_at(), None);
    }

    #[test]
    fn place_order_rejects_bad_input() {
        let order = Order::empty(test_order_id());
        let org_id = test_org_id();
        let order_id = test_order_id();

        let mut cmd = place_cmd(org_id, order_id);
        cmd.quantity = 0;
        assert!(matches!(
            order
                .handle(&OrderCommand::PlaceOrder(cmd.clone()))
                .unwrap_err(),
            DomainError::Validation(_)
        ));

        cmd.quantity = 60;
        cmd.delivery_date = date(2024, 11, 1);
        assert!(matches!(
            order.handle(&OrderCommand::PlaceOrder(cmd)).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn full_lifecycle_reaches_delivered() {
        let org_id = test_org_id();
        let order_id = test_order_id();
        let order = order_at(org_id, order_id, OrderStatus::Delivered);

        assert_eq!(order.dispatched_batches().len(), 2);
        assert_eq!(order.total_value(), 620);
        assert!(order.delivered_at().is_some());
        assert_eq!(order.delivered_on_time(), Some(true));
    }

    #[test]
    fn rejection_is_only_possible_while_pending() {
        let org_id = test_org_id();
        let order_id = test_order_id();

        let mut pending = order_at(org_id, order_id, OrderStatus::Pending);
        let events = pending
            .handle(&OrderCommand::RejectOrder(RejectOrder {
                org_id,
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        pending.apply(&events[0]);
        assert_eq!(pending.status(), OrderStatus::Rejected);
        assert!(pending.status().is_terminal());

        let requested = order_at(test_org_id(), test_order_id(), OrderStatus::RequestedForDelivery);
        let err = requested
            .handle(&OrderCommand::RejectOrder(RejectOrder {
                org_id: requested.org_id().unwrap(),
                order_id: requested.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn cannot_dispatch_before_delivery_is_requested() {
        let org_id = test_org_id();
        let order_id = test_order_id();
        let order = order_at(org_id, order_id, OrderStatus::Pending);

        let err = order
            .handle(&OrderCommand::RecordDispatch(RecordDispatch {
                org_id,
                order_id,
                batches: dispatched_batches(),
                total_price: 620,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn second_dispatch_is_blocked() {
        let org_id = test_org_id();
        let order_id = test_order_id();
        let order = order_at(org_id, order_id, OrderStatus::OutForDelivery);

        let err = order
            .handle(&OrderCommand::RecordDispatch(RecordDispatch {
                org_id,
                order_id,
                batches: dispatched_batches(),
                total_price: 620,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn dispatch_quantity_must_match_order_quantity() {
        let org_id = test_org_id();
        let order_id = test_order_id();
        let order = order_at(org_id, order_id, OrderStatus::RequestedForDelivery);

        let mut short = dispatched_batches();
        short.pop();
        let err = order
            .handle(&OrderCommand::RecordDispatch(RecordDispatch {
                org_id,
                order_id,
                batches: short,
                total_price: 500,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn confirming_delivery_twice_is_rejected_and_changes_nothing() {
        let org_id = test_org_id();
        let order_id = test_order_id();
        let order = order_at(org_id, order_id, OrderStatus::Delivered);
        let before = order.clone();

        let err = order
            .handle(&OrderCommand::ConfirmDelivered(ConfirmDelivered {
                org_id,
                order_id,
                delivered_at: test_time(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(order, before);
    }

    #[test]
    fn late_delivery_is_flagged() {
        let org_id = test_org_id();
        let order_id = test_order_id();
        let mut order = order_at(org_id, order_id, OrderStatus::OutForDelivery);

        let events = order
            .handle(&OrderCommand::ConfirmDelivered(ConfirmDelivered {
                org_id,
                order_id,
                delivered_at: "2024-12-20T08:00:00Z".parse().unwrap(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);

        // Target was 2024-12-15; arrival on the 20th is late.
        assert_eq!(order.delivered_on_time(), Some(false));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let org_id = test_org_id();
        let order_id = test_order_id();
        let order = order_at(org_id, order_id, OrderStatus::RequestedForDelivery);
        let before = order.clone();

        let _ = order
            .handle(&OrderCommand::RecordDispatch(RecordDispatch {
                org_id,
                order_id,
                batches: dispatched_batches(),
                total_price: 620,
                occurred_at: test_time(),
            }))
            .unwrap();

        assert_eq!(order, before);
    }
}
