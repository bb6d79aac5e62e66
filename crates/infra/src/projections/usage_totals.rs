//! Per-requester consumption totals: what pharmacies sold and hospitals
//! dispensed, per medicine. The subtraction source for inventory views.

use serde_json::Value as JsonValue;

use rxflow_core::{MedicineId, OrgId};
use rxflow_events::EventEnvelope;
use rxflow_usage::{UsageEvent, UsageKind, UsageLogId};

use crate::read_model::OrgStore;

use super::{CursorCheck, ProjectionError, StreamCursors};

pub const USAGE_AGGREGATE_TYPE: &str = "usage.log";

/// Running consumption totals for one requester + medicine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageTotalsRecord {
    pub medicine_id: MedicineId,
    pub sold: i64,
    pub dispensed: i64,
}

impl UsageTotalsRecord {
    pub fn for_kind(&self, kind: UsageKind) -> i64 {
        match kind {
            UsageKind::Sale => self.sold,
            UsageKind::Dispense => self.dispensed,
        }
    }
}

/// Usage totals projection.
///
/// Consumes published envelopes (JSON payloads) and maintains an org-isolated
/// read model keyed by medicine. Disposable and rebuildable from the event
/// stream.
#[derive(Debug)]
pub struct UsageTotalsProjection<S>
where
    S: OrgStore<MedicineId, UsageTotalsRecord>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> UsageTotalsProjection<S>
where
    S: OrgStore<MedicineId, UsageTotalsRecord>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    /// Totals for one requester + medicine (zero if nothing recorded).
    pub fn get(&self, org_id: OrgId, medicine_id: MedicineId) -> UsageTotalsRecord {
        self.store
            .get(org_id, &medicine_id)
            .unwrap_or(UsageTotalsRecord {
                medicine_id,
                sold: 0,
                dispensed: 0,
            })
    }

    /// List all recorded totals for a requester.
    pub fn list(&self, org_id: OrgId) -> Vec<UsageTotalsRecord> {
        let mut records = self.store.list(org_id);
        records.sort_by_key(|r| *r.medicine_id.as_uuid().as_bytes());
        records
    }

    /// Apply a published envelope into the projection.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != USAGE_AGGREGATE_TYPE {
            return Ok(());
        }

        let org_id = envelope.org_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(org_id, aggregate_id, seq)? {
            CursorCheck::Duplicate => return Ok(()),
            CursorCheck::Apply => {}
        }

        let ev: UsageEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let UsageEvent::UsageRecorded(e) = &ev;

        if e.org_id != org_id {
            return Err(ProjectionError::OrgIsolation(
                "event org_id does not match envelope org_id".to_string(),
            ));
        }
        if UsageLogId::for_org(e.org_id).0 != aggregate_id {
            return Err(ProjectionError::OrgIsolation(
                "event org_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut record = self.get(org_id, e.medicine_id);
        match e.kind {
            UsageKind::Sale => record.sold += e.quantity,
            UsageKind::Dispense => record.dispensed += e.quantity,
        }
        self.store.upsert(org_id, e.medicine_id, record);

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
