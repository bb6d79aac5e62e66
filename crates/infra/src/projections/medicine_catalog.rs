//! Medicine catalog read model.
//!
//! Unlike the org-scoped read models, the catalog is a cross-org index:
//! requesters browse every vendor's medicines, and order placement resolves
//! a medicine's owning vendor and current offer price through it.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use rxflow_catalog::MedicineEvent;
use rxflow_core::{AggregateId, MedicineId, OrgId};
use rxflow_events::EventEnvelope;

use super::{CursorCheck, ProjectionError, StreamCursors};

pub const MEDICINE_AGGREGATE_TYPE: &str = "catalog.medicine";

/// Queryable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedicineRecord {
    pub medicine_id: MedicineId,
    pub vendor_id: OrgId,
    pub brand_name: String,
    pub generic_name: String,
    pub unit_price: u64,
    pub list_price: u64,
}

/// Medicine catalog projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a global
/// medicine index. Disposable and rebuildable from the event stream.
#[derive(Debug, Default)]
pub struct CatalogProjection {
    records: RwLock<HashMap<MedicineId, MedicineRecord>>,
    cursors: StreamCursors,
}

impl CatalogProjection {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            cursors: StreamCursors::new(),
        }
    }

    /// Look up one medicine by id.
    pub fn get(&self, medicine_id: MedicineId) -> Option<MedicineRecord> {
        self.records
            .read()
            .ok()
            .and_then(|map| map.get(&medicine_id).cloned())
    }

    /// List one vendor's catalog.
    pub fn list_for_vendor(&self, vendor_id: OrgId) -> Vec<MedicineRecord> {
        let map = match self.records.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut records: Vec<_> = map
            .values()
            .filter(|r| r.vendor_id == vendor_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| *r.medicine_id.as_uuid().as_bytes());
        records
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Ignores envelopes for other aggregate types
    /// - Enforces org consistency between envelope and event
    /// - Idempotent for at-least-once delivery
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != MEDICINE_AGGREGATE_TYPE {
            return Ok(());
        }

        let org_id = envelope.org_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(org_id, aggregate_id, seq)? {
            CursorCheck::Duplicate => return Ok(()),
            CursorCheck::Apply => {}
        }

        let ev: MedicineEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_vendor, medicine_id) = match &ev {
            MedicineEvent::MedicineRegistered(e) => (e.vendor_id, e.medicine_id),
            MedicineEvent::MedicinePricesUpdated(e) => (e.vendor_id, e.medicine_id),
        };

        if event_vendor != org_id {
            return Err(ProjectionError::OrgIsolation(
                "event vendor_id does not match envelope org_id".to_string(),
            ));
        }
        if AggregateId::from_uuid(*medicine_id.as_uuid()) != aggregate_id {
            return Err(ProjectionError::OrgIsolation(
                "event medicine_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            MedicineEvent::MedicineRegistered(e) => {
                if let Ok(mut map) = self.records.write() {
                    map.insert(
                        e.medicine_id,
                        MedicineRecord {
                            medicine_id: e.medicine_id,
                            vendor_id: e.vendor_id,
                            brand_name: e.brand_name,
                            generic_name: e.generic_name,
                            unit_price: e.unit_price,
                            list_price: e.list_price,
                        },
                    );
                }
            }
            MedicineEvent::MedicinePricesUpdated(e) => {
                if let Ok(mut map) = self.records.write() {
                    if let Some(record) = map.get_mut(&e.medicine_id) {
                        record.unit_price = e.unit_price;
                        record.list_price = e.list_price;
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

        // Clear the vendors present in the replay set before rebuilding.
        {
            let mut vendors = envs.iter().map(|e| e.org_id()).collect::<Vec<_>>();
            vendors.sort_by_key(|o| *o.as_uuid().as_bytes());
            vendors.dedup();
            for vendor in vendors {
                if let Ok(mut map) = self.records.write() {
                    map.retain(|_, r| r.vendor_id != vendor);
                }
                self.cursors.clear_org(vendor);
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
