use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, MedicineId, OrgId};
use rxflow_events::Event;

/// Usage log identifier.
///
/// One log exists per requester organization; its aggregate id reuses the
/// org's UUID so the stream is addressable without a lookup table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageLogId(pub AggregateId);

impl UsageLogId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_org(org_id: OrgId) -> Self {
        Self(AggregateId::from_uuid(*org_id.as_uuid()))
    }
}

impl core::fmt::Display for UsageLogId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What kind of consumption was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    /// Pharmacy sold units over the counter.
    Sale,
    /// Hospital dispensed units to patients.
    Dispense,
}

/// Running per-medicine totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub sold: i64,
    pub dispensed: i64,
}

impl UsageTotals {
    pub fn for_kind(&self, kind: UsageKind) -> i64 {
        match kind {
            UsageKind::Sale => self.sold,
            UsageKind::Dispense => self.dispensed,
        }
    }
}

/// Aggregate root: UsageLog - one requester's consumption history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageLog {
    id: UsageLogId,
    org_id: Option<OrgId>,
    totals: HashMap<MedicineId, UsageTotals>,
    version: u64,
    created: bool,
}

impl UsageLog {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: UsageLogId) -> Self {
        Self {
            id,
            org_id: None,
            totals: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> UsageLogId {
        self.id
    }

    pub fn org_id(&self) -> Option<OrgId> {
        self.org_id
    }

    pub fn totals(&self, medicine_id: MedicineId) -> UsageTotals {
        self.totals.get(&medicine_id).copied().unwrap_or_default()
    }
}

impl AggregateRoot for UsageLog {
    type Id = UsageLogId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordUsage. The first record opens the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUsage {
    pub org_id: OrgId,
    pub medicine_id: MedicineId,
    pub kind: UsageKind,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageCommand {
    RecordUsage(RecordUsage),
}

/// Event: UsageRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecorded {
    pub org_id: OrgId,
    pub medicine_id: MedicineId,
    pub kind: UsageKind,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageEvent {
    UsageRecorded(UsageRecorded),
}

impl Event for UsageEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UsageEvent::UsageRecorded(_) => "usage.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UsageEvent::UsageRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for UsageLog {
    type Command = UsageCommand;
    type Event = UsageEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UsageEvent::UsageRecorded(e) => {
                self.org_id = Some(e.org_id);
                let entry = self.totals.entry(e.medicine_id).or_default();
                match e.kind {
                    UsageKind::Sale => entry.sold += e.quantity,
                    UsageKind::Dispense => entry.dispensed += e.quantity,
                }
                self.created = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UsageCommand::RecordUsage(cmd) => self.handle_record(cmd),
        }
    }
}

impl UsageLog {
    fn handle_record(&self, cmd: &RecordUsage) -> Result<Vec<UsageEvent>, DomainError> {
        if self.created && self.org_id != Some(cmd.org_id) {
            return Err(DomainError::invariant("org_id mismatch"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        Ok(vec![UsageEvent::UsageRecorded(UsageRecorded {
            org_id: cmd.org_id,
            medicine_id: cmd.medicine_id,
            kind: cmd.kind,
            quantity: cmd.quantity,
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

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn records_accumulate_per_medicine_and_kind() {
        let org_id = test_org_id();
        let mut log = UsageLog::empty(UsageLogId::for_org(org_id));
        let paracetamol = MedicineId::new();
        let ibuprofen = MedicineId::new();

        for (medicine_id, kind, quantity) in [
            (paracetamol, UsageKind::Sale, 5),
            (paracetamol, UsageKind::Sale, 7),
            (paracetamol, UsageKind::Dispense, 2),
            (ibuprofen, UsageKind::Sale, 3),
        ] {
            let events = log
                .handle(&UsageCommand::RecordUsage(RecordUsage {
                    org_id,
                    medicine_id,
                    kind,
                    quantity,
                    occurred_at: test_time(),
                }))
                .unwrap();
            log.apply(&events[0]);
        }

        assert_eq!(log.totals(paracetamol).sold, 12);
        assert_eq!(log.totals(paracetamol).dispensed, 2);
        assert_eq!(log.totals(ibuprofen).sold, 3);
        assert_eq!(log.totals(ibuprofen).for_kind(UsageKind::Dispense), 0);
        assert_eq!(log.version(), 4);
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let org_id = test_org_id();
        let log = UsageLog::empty(UsageLogId::for_org(org_id));

        let err = log
            .handle(&UsageCommand::RecordUsage(RecordUsage {
                org_id,
                medicine_id: MedicineId::new(),
                kind: UsageKind::Sale,
                quantity: 0,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn records_for_another_org_are_rejected() {
        let org_id = test_org_id();
        let mut log = UsageLog::empty(UsageLogId::for_org(org_id));

        let events = log
            .handle(&UsageCommand::RecordUsage(RecordUsage {
                org_id,
                medicine_id: MedicineId::new(),
                kind: UsageKind::Dispense,
                quantity: 4,
                occurred_at: test_time(),
            }))
            .unwrap();
        log.apply(&events[0]);

        let err = log
            .handle(&UsageCommand::RecordUsage(RecordUsage {
                org_id: test_org_id(),
                medicine_id: MedicineId::new(),
                kind: UsageKind::Dispense,
                quantity: 4,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
