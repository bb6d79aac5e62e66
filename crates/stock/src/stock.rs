use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxflow_core::{Aggregate, AggregateId, AggregateRoot, BatchId, DomainError, MedicineId, OrgId};
use rxflow_events::Event;

use crate::allocation::{AllocationLine, AllocationPlan};
use crate::batch::Batch;

/// Vendor stock identifier (org-scoped via `vendor_id` fields in events/commands).
///
/// One stock stream exists per vendor + medicine; by convention its aggregate
/// id reuses the medicine's UUID, so the stream is addressable without a
/// lookup table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockId(pub AggregateId);

impl StockId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_medicine(medicine_id: MedicineId) -> Self {
        Self(AggregateId::from_uuid(*medicine_id.as_uuid()))
    }
}

impl core::fmt::Display for StockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: VendorStock - all batches of one medicine at one vendor.
///
/// The batch list is the only shared mutable resource in the fulfillment
/// core. Commits re-validate availability against current state (the
/// event-store append supplies the per-stream critical section), so two
/// concurrent allocations can never both consume the same unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorStock {
    id: StockId,
    vendor_id: Option<OrgId>,
    medicine_id: Option<MedicineId>,
    /// Registration order; allocation sorts a snapshot, never this list.
    batches: Vec<Batch>,
    version: u64,
    created: bool,
}

impl VendorStock {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockId) -> Self {
        Self {
            id,
            vendor_id: None,
            medicine_id: None,
            batches: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockId {
        self.id
    }

    pub fn vendor_id(&self) -> Option<OrgId> {
        self.vendor_id
    }

    pub fn medicine_id(&self) -> Option<MedicineId> {
        self.medicine_id
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, batch_id: BatchId) -> Option<&Batch> {
        self.batches.iter().find(|b| b.batch_id == batch_id)
    }

    /// Total units allocatable as of the given date (non-expired only).
    pub fn available(&self, as_of: NaiveDate) -> i64 {
        self.batches
            .iter()
            .filter(|b| b.is_allocatable(as_of))
            .map(|b| b.quantity_on_hand)
            .sum()
    }
}

impl AggregateRoot for VendorStock {
    type Id = StockId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterBatch. The first registration opens the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBatch {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub batch_id: BatchId,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub list_price: u64,
    pub manufacturing_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CommitAllocation - apply a previously computed plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAllocation {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    /// The order this allocation fulfills.
    pub order_id: AggregateId,
    pub plan: AllocationPlan,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseAllocation - compensating restore of a committed plan
/// whose order-side dispatch record lost its race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAllocation {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub order_id: AggregateId,
    pub lines: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    RegisterBatch(RegisterBatch),
    CommitAllocation(CommitAllocation),
    ReleaseAllocation(ReleaseAllocation),
}

/// Event: BatchRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRegistered {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub batch_id: BatchId,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub list_price: u64,
    pub manufacturing_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAllocated - every line decremented in one atomic step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAllocated {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub order_id: AggregateId,
    pub lines: Vec<AllocationLine>,
    pub total_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationReleased - exact inverse of a committed allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReleased {
    pub vendor_id: OrgId,
    pub medicine_id: MedicineId,
    pub order_id: AggregateId,
    pub lines: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    BatchRegistered(BatchRegistered),
    StockAllocated(StockAllocated),
    AllocationReleased(AllocationReleased),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::BatchRegistered(_) => "stock.batch.registered",
            StockEvent::StockAllocated(_) => "stock.allocated",
            StockEvent::AllocationReleased(_) => "stock.allocation_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::BatchRegistered(e) => e.occurred_at,
            StockEvent::StockAllocated(e) => e.occurred_at,
            StockEvent::AllocationReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for VendorStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::BatchRegistered(e) => {
                self.vendor_id = Some(e.vendor_id);
                self.medicine_id = Some(e.medicine_id);
                self.batches.push(Batch {
                    batch_id: e.batch_id,
                    batch_number: e.batch_number.clone(),
                    manufacturing_date: e.manufacturing_date,
                    expiry_date: e.expiry_date,
                    quantity_on_hand: e.quantity,
                    unit_price: e.unit_price,
                    list_price: e.list_price,
                });
                self.created = true;
            }
            StockEvent::StockAllocated(e) => {
                for line in &e.lines {
                    if let Some(batch) = self.batches.iter_mut().find(|b| b.batch_id == line.batch_id)
                    {
                        batch.quantity_on_hand -= line.quantity;
                    }
                }
            }
            StockEvent::AllocationReleased(e) => {
                for line in &e.lines {
                    if let Some(batch) = self.batches.iter_mut().find(|b| b.batch_id == line.batch_id)
                    {
                        batch.quantity_on_hand += line.quantity;
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::RegisterBatch(cmd) => self.handle_register(cmd),
            StockCommand::CommitAllocation(cmd) => self.handle_commit(cmd),
            StockCommand::ReleaseAllocation(cmd) => self.handle_release(cmd),
        }
    }
}

impl VendorStock {
    fn ensure_scope(&self, vendor_id: OrgId, medicine_id: MedicineId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.vendor_id != Some(vendor_id) {
            return Err(DomainError::invariant("vendor_id mismatch"));
        }
        if self.medicine_id != Some(medicine_id) {
            return Err(DomainError::invariant("medicine_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterBatch) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_scope(cmd.vendor_id, cmd.medicine_id)?;

        if cmd.batch_number.trim().is_empty() {
            return Err(DomainError::validation("batch number cannot be empty"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_price > cmd.list_price {
            return Err(DomainError::validation(
                "offer price cannot exceed list price",
            ));
        }
        if cmd.expiry_date <= cmd.manufacturing_date {
            return Err(DomainError::validation(
                "expiry date must be after manufacturing date",
            ));
        }
        if self.batch(cmd.batch_id).is_some() {
            return Err(DomainError::conflict("batch already registered"));
        }

        Ok(vec![StockEvent::BatchRegistered(BatchRegistered {
            vendor_id: cmd.vendor_id,
            medicine_id: cmd.medicine_id,
            batch_id: cmd.batch_id,
            batch_number: cmd.batch_number.clone(),
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            list_price: cmd.list_price,
            manufacturing_date: cmd.manufacturing_date,
            expiry_date: cmd.expiry_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Commit-time re-validation: the plan was computed against a snapshot
    /// that may be stale by now. Every batch must still exist, still be
    /// unexpired, and still hold at least the planned quantity - otherwise
    /// the whole commit is rejected and the caller re-allocates.
    fn handle_commit(&self, cmd: &CommitAllocation) -> Result<Vec<StockEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_scope(cmd.vendor_id, cmd.medicine_id)?;

        if cmd.plan.lines.is_empty() {
            return Err(DomainError::validation("allocation plan has no lines"));
        }

        let as_of = cmd.occurred_at.date_naive();
        for line in &cmd.plan.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(
                    "allocation line quantity must be positive",
                ));
            }
            let batch = self
                .batch(line.batch_id)
                .ok_or(DomainError::BatchNotFound(line.batch_id))?;
            if batch.is_expired(as_of) {
                return Err(DomainError::conflict(format!(
                    "batch {} expired before commit",
                    batch.batch_number
                )));
            }
            if batch.quantity_on_hand < line.quantity {
                return Err(DomainError::conflict(format!(
                    "batch {} has {} on hand, allocation needs {}",
                    batch.batch_number, batch.quantity_on_hand, line.quantity
                )));
            }
        }

        Ok(vec![StockEvent::StockAllocated(StockAllocated {
            vendor_id: cmd.vendor_id,
            medicine_id: cmd.medicine_id,
            order_id: cmd.order_id,
            lines: cmd.plan.lines.clone(),
            total_price: cmd.plan.total_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseAllocation) -> Result<Vec<StockEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_scope(cmd.vendor_id, cmd.medicine_id)?;

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("nothing to release"));
        }
        for line in &cmd.lines {
            if self.batch(line.batch_id).is_none() {
                return Err(DomainError::BatchNotFound(line.batch_id));
            }
        }

        Ok(vec![StockEvent::AllocationReleased(AllocationReleased {
            vendor_id: cmd.vendor_id,
            medicine_id: cmd.medicine_id,
            order_id: cmd.order_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::allocate;

    fn test_vendor_id() -> OrgId {
        OrgId::new()
    }

    fn test_medicine_id() -> MedicineId {
        MedicineId::new()
    }

    fn test_time() -> DateTime<Utc> {
        "2024-12-01T10:00:00Z".parse().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn register_cmd(
        vendor_id: OrgId,
        medicine_id: MedicineId,
        qty: i64,
        expiry: NaiveDate,
        unit_price: u64,
    ) -> RegisterBatch {
        RegisterBatch {
            vendor_id,
            medicine_id,
            batch_id: BatchId::new(),
            batch_number: format!("LOT-{qty}"),
            quantity: qty,
            unit_price,
            list_price: unit_price + 50,
            manufacturing_date: date(2024, 1, 1),
            expiry_date: expiry,
            occurred_at: test_time(),
        }
    }

    /// Build a stock aggregate with the two batches used throughout:
    /// 50 units expiring 2025-01-01 at 10, 30 units expiring 2025-02-01 at 12.
    fn stock_with_two_batches(vendor_id: OrgId, medicine_id: MedicineId) -> VendorStock {
        let mut stock = VendorStock::empty(StockId::for_medicine(medicine_id));
        for cmd in [
            register_cmd(vendor_id, medicine_id, 50, date(2025, 1, 1), 10),
            register_cmd(vendor_id, medicine_id, 30, date(2025, 2, 1), 12),
        ] {
            let events = stock.handle(&StockCommand::RegisterBatch(cmd)).unwrap();
            stock.apply(&events[0]);
        }
        stock
    }

    #[test]
    fn register_batch_emits_event_and_opens_stream() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let stock = VendorStock::empty(StockId::for_medicine(medicine_id));

        let cmd = register_cmd(vendor_id, medicine_id, 50, date(2025, 1, 1), 10);
        let events = stock.handle(&StockCommand::RegisterBatch(cmd.clone())).unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            StockEvent::BatchRegistered(e) => {
                assert_eq!(e.vendor_id, vendor_id);
                assert_eq!(e.batch_id, cmd.batch_id);
                assert_eq!(e.quantity, 50);
            }
            _ => panic!("Expected BatchRegistered event"),
        }
    }

    #[test]
    fn register_rejects_bad_input() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let stock = VendorStock::empty(StockId::for_medicine(medicine_id));

        let mut cmd = register_cmd(vendor_id, medicine_id, 0, date(2025, 1, 1), 10);
        assert!(matches!(
            stock
                .handle(&StockCommand::RegisterBatch(cmd.clone()))
                .unwrap_err(),
            DomainError::Validation(_)
        ));

        cmd.quantity = 10;
        cmd.expiry_date = date(2023, 1, 1);
        assert!(matches!(
            stock
                .handle(&StockCommand::RegisterBatch(cmd))
                .unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn duplicate_batch_id_is_a_conflict() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let mut stock = VendorStock::empty(StockId::for_medicine(medicine_id));

        let cmd = register_cmd(vendor_id, medicine_id, 50, date(2025, 1, 1), 10);
        let events = stock.handle(&StockCommand::RegisterBatch(cmd.clone())).unwrap();
        stock.apply(&events[0]);

        let err = stock
            .handle(&StockCommand::RegisterBatch(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn committed_plan_decrements_every_batch_atomically() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let mut stock = stock_with_two_batches(vendor_id, medicine_id);

        let plan = allocate(stock.batches(), 60, date(2024, 12, 1)).unwrap();
        assert_eq!(plan.total_price, 620);

        let commit = CommitAllocation {
            vendor_id,
            medicine_id,
            order_id: AggregateId::new(),
            plan,
            occurred_at: test_time(),
        };
        let events = stock.handle(&StockCommand::CommitAllocation(commit)).unwrap();
        stock.apply(&events[0]);

        assert_eq!(stock.batches()[0].quantity_on_hand, 0);
        assert_eq!(stock.batches()[1].quantity_on_hand, 20);
        assert_eq!(stock.available(date(2024, 12, 1)), 20);
    }

    #[test]
    fn stale_plan_is_rejected_with_conflict() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let mut stock = stock_with_two_batches(vendor_id, medicine_id);

        // Plan computed against the current snapshot...
        let stale_plan = allocate(stock.batches(), 60, date(2024, 12, 1)).unwrap();

        // ...then a concurrent allocation drains the first batch.
        let winner = allocate(stock.batches(), 50, date(2024, 12, 1)).unwrap();
        let events = stock
            .handle(&StockCommand::CommitAllocation(CommitAllocation {
                vendor_id,
                medicine_id,
                order_id: AggregateId::new(),
                plan: winner,
                occurred_at: test_time(),
            }))
            .unwrap();
        stock.apply(&events[0]);

        let err = stock
            .handle(&StockCommand::CommitAllocation(CommitAllocation {
                vendor_id,
                medicine_id,
                order_id: AggregateId::new(),
                plan: stale_plan,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        // The failed commit changed nothing.
        assert_eq!(stock.batches()[0].quantity_on_hand, 0);
        assert_eq!(stock.batches()[1].quantity_on_hand, 30);
    }

    #[test]
    fn commit_referencing_unknown_batch_is_fatal() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let stock = stock_with_two_batches(vendor_id, medicine_id);

        let ghost = BatchId::new();
        let plan = AllocationPlan {
            lines: vec![AllocationLine {
                batch_id: ghost,
                quantity: 5,
                unit_price: 10,
                expiry_date: date(2025, 1, 1),
            }],
            total_price: 50,
        };

        let err = stock
            .handle(&StockCommand::CommitAllocation(CommitAllocation {
                vendor_id,
                medicine_id,
                order_id: AggregateId::new(),
                plan,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::BatchNotFound(ghost));
    }

    #[test]
    fn release_restores_committed_quantities_exactly() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let mut stock = stock_with_two_batches(vendor_id, medicine_id);
        let order_id = AggregateId::new();

        let plan = allocate(stock.batches(), 60, date(2024, 12, 1)).unwrap();
        let lines = plan.lines.clone();
        let events = stock
            .handle(&StockCommand::CommitAllocation(CommitAllocation {
                vendor_id,
                medicine_id,
                order_id,
                plan,
                occurred_at: test_time(),
            }))
            .unwrap();
        stock.apply(&events[0]);

        let events = stock
            .handle(&StockCommand::ReleaseAllocation(ReleaseAllocation {
                vendor_id,
                medicine_id,
                order_id,
                lines,
                occurred_at: test_time(),
            }))
            .unwrap();
        stock.apply(&events[0]);

        assert_eq!(stock.batches()[0].quantity_on_hand, 50);
        assert_eq!(stock.batches()[1].quantity_on_hand, 30);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let vendor_id = test_vendor_id();
        let medicine_id = test_medicine_id();
        let stock = stock_with_two_batches(vendor_id, medicine_id);
        let before = stock.clone();

        let plan = allocate(stock.batches(), 60, date(2024, 12, 1)).unwrap();
        let _ = stock
            .handle(&StockCommand::CommitAllocation(CommitAllocation {
                vendor_id,
                medicine_id,
                order_id: AggregateId::new(),
                plan,
                occurred_at: test_time(),
            }))
            .unwrap();

        assert_eq!(stock, before);
    }
}
