//! Command execution pipeline (application-level orchestration).
//!
//! This module implements the command dispatch pattern for event-sourced
//! aggregates. It orchestrates the full lifecycle:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (org-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (for projections, reporting views, etc.)
//! ```
//!
//! The execution pattern is the same for every aggregate, so it lives here
//! rather than being duplicated per handler. Org isolation, optimistic
//! concurrency, and event ordering are enforced in this one place.
//!
//! This module contains no IO itself; it composes the `EventStore` and
//! `EventBus` traits, so it runs identically against in-memory
//! implementations (tests/dev) and real backends.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use rxflow_core::{Aggregate, AggregateId, BatchId, DomainError, ExpectedVersion, OrgId};
use rxflow_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version or a
    /// stock commit that lost its race). Retrying against a fresh snapshot
    /// is sensible.
    Concurrency(String),
    /// Org isolation violation (cross-org or cross-aggregate stream mixing).
    OrgIsolation(String),
    /// Domain validation failure (deterministic; never retried).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Requested quantity exceeds available non-expired stock. Retrying only
    /// helps after restock.
    InsufficientStock { requested: i64, available: i64 },
    /// A lifecycle transition the order's current status does not permit.
    InvalidTransition { from: String, action: String },
    /// A batch referenced by an allocation no longer exists.
    BatchNotFound(BatchId),
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl DispatchError {
    /// Whether an immediate retry against a fresh snapshot can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::OrgIsolation(msg) => DispatchError::OrgIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => DispatchError::InsufficientStock {
                requested,
                available,
            },
            DomainError::InvalidTransition { from, action } => {
                DispatchError::InvalidTransition { from, action }
            }
            DomainError::BatchNotFound(batch_id) => DispatchError::BatchNotFound(batch_id),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Sits between the application service and the infrastructure layer and
/// provides a consistent execution model for all commands while keeping
/// domain code pure.
///
/// ## Execution guarantees
///
/// - **Atomicity**: events are persisted before publication; if append fails,
///   nothing is published
/// - **Consistency**: org isolation and optimistic concurrency are enforced
/// - **Isolation**: each command operates on a single aggregate stream
///
/// ## Concurrency
///
/// Dispatch uses **optimistic concurrency control**: it loads the current
/// stream version and expects exactly that version when appending. If a
/// concurrent dispatch won the race, the append fails with
/// `DispatchError::Concurrency` and the caller retries from a fresh load (or
/// surfaces the conflict). This is the mutual exclusion point for stock
/// commits - two commits against the same stream serialize here, while
/// commits against disjoint streams proceed in parallel.
///
/// ## At-least-once publication
///
/// If publication fails after a successful append, the error is surfaced but
/// the events are already durable; consumers are idempotent, so republishing
/// is safe.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without dispatching anything.
    ///
    /// Returns the aggregate plus the stream version it was rehydrated at.
    /// Useful for read-your-writes service logic (status prechecks,
    /// allocation snapshots); the returned state is a snapshot and may be
    /// stale by the time a follow-up command dispatches - the optimistic
    /// append catches that.
    pub fn load_aggregate<A>(
        &self,
        org_id: OrgId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(OrgId, AggregateId) -> A,
    ) -> Result<(A, u64), DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(org_id, aggregate_id)?;
        validate_loaded_stream(org_id, aggregate_id, &history)?;
        let version = stream_version(&history);

        let mut aggregate = make_aggregate(org_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        Ok((aggregate, version))
    }

    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// 1. **Load**: retrieve all events for the aggregate (org-scoped)
    /// 2. **Validate**: org isolation and event ordering (defense in depth)
    /// 3. **Rehydrate**: apply history to rebuild current state
    /// 4. **Decide**: `aggregate.handle(command)` produces new events (pure)
    /// 5. **Persist**: append with optimistic concurrency check
    /// 6. **Publish**: hand committed events to the bus for consumers
    ///
    /// The `make_aggregate` closure lets the dispatcher work with any
    /// aggregate type without knowing how to construct it (e.g.
    /// `|_, id| VendorStock::empty(StockId::new(id))`).
    ///
    /// Returns the committed `StoredEvent`s (with assigned sequence numbers)
    /// on success.
    pub fn dispatch<A>(
        &self,
        org_id: OrgId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(OrgId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: rxflow_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (org-scoped)
        let history = self.store.load_stream(org_id, aggregate_id)?;
        validate_loaded_stream(org_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(org_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    org_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    org_id: OrgId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce org isolation even if a buggy backend returns cross-org data.
    // Also ensure the stream is monotonically increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.org_id != org_id {
            return Err(DispatchError::OrgIsolation(format!(
                "loaded stream contains wrong org_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::OrgIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
