//! Command execution pipeline (application-level orchestration).
//!
//! Every write in the system goes through the same five steps:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply history)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to the bus (projections, SSE ticker)
//! ```
//!
//! Centralizing this keeps tenant isolation, ordering validation, and error
//! mapping out of the HTTP handlers and the domain crates. Publication
//! failures after a successful append surface as `DispatchError::Publish`;
//! the events are already durable, so retrying is safe (at-least-once).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use rateforge_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use rateforge_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    Concurrency(String),
    /// Tenant isolation violation (cross-tenant or cross-aggregate stream mixing).
    TenantIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Domain authorization failure.
    Unauthorized,
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
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
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run against the in-memory pair and
/// deployments swap in Postgres + Redis without touching domain code.
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
    /// Dispatch a command through the full pipeline.
    ///
    /// The `make_aggregate` factory produces a fresh instance for rehydration
    /// (e.g. `Currency::empty(CurrencyId::new(aggregate_id))`), keeping the
    /// dispatcher ignorant of aggregate construction.
    ///
    /// Returns the committed `StoredEvent`s with assigned sequence numbers.
    /// On a version race the append fails with `DispatchError::Concurrency`;
    /// callers retry by re-executing the command.
    pub async fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: rateforge_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id).await?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
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
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected).await?;

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
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant
    // data, and require a strictly increasing sequence.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use rateforge_events::InMemoryEventBus;
    use rateforge_rates::{
        Currency, CurrencyCommand, CurrencyId, RateSource, RecordRate, RegisterCurrency,
    };

    use crate::event_store::InMemoryEventStore;

    type TestDispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> (TestDispatcher, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>) {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(store, bus.clone()), bus)
    }

    fn register_cmd(tenant_id: TenantId, currency_id: CurrencyId) -> CurrencyCommand {
        CurrencyCommand::RegisterCurrency(RegisterCurrency {
            tenant_id,
            currency_id,
            code: "USD".to_string(),
            name: "US Dollar".to_string(),
            unit_symbol: "$".to_string(),
            history_limit: Some(5),
            occurred_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn dispatch_persists_and_publishes() {
        let (dispatcher, bus) = dispatcher();
        let sub = bus.subscribe();

        let tenant_id = TenantId::new();
        let agg = AggregateId::new();
        let currency_id = CurrencyId::new(agg);

        let committed = dispatcher
            .dispatch::<Currency>(
                tenant_id,
                agg,
                "rates.currency",
                register_cmd(tenant_id, currency_id),
                |_t, aggregate_id| Currency::empty(CurrencyId::new(aggregate_id)),
            )
            .await
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[0].event_type, "rates.currency.registered");

        let published = sub.try_recv().unwrap();
        assert_eq!(published.sequence_number(), 1);
        assert_eq!(published.aggregate_type(), "rates.currency");
    }

    #[tokio::test]
    async fn dispatch_rehydrates_between_commands() {
        let (dispatcher, _bus) = dispatcher();
        let tenant_id = TenantId::new();
        let agg = AggregateId::new();
        let currency_id = CurrencyId::new(agg);

        dispatcher
            .dispatch::<Currency>(
                tenant_id,
                agg,
                "rates.currency",
                register_cmd(tenant_id, currency_id),
                |_t, id| Currency::empty(CurrencyId::new(id)),
            )
            .await
            .unwrap();

        let committed = dispatcher
            .dispatch::<Currency>(
                tenant_id,
                agg,
                "rates.currency",
                CurrencyCommand::RecordRate(RecordRate {
                    tenant_id,
                    currency_id,
                    value: 42.0,
                    source: RateSource::Manual,
                    observed_at: Utc::now(),
                    occurred_at: Utc::now(),
                }),
                |_t, id| Currency::empty(CurrencyId::new(id)),
            )
            .await
            .unwrap();

        assert_eq!(committed[0].sequence_number, 2);
    }

    #[tokio::test]
    async fn domain_errors_map_to_dispatch_errors() {
        let (dispatcher, _bus) = dispatcher();
        let tenant_id = TenantId::new();
        let agg = AggregateId::new();
        let currency_id = CurrencyId::new(agg);

        // Recording against an unregistered currency is NotFound.
        let err = dispatcher
            .dispatch::<Currency>(
                tenant_id,
                agg,
                "rates.currency",
                CurrencyCommand::RecordRate(RecordRate {
                    tenant_id,
                    currency_id,
                    value: 42.0,
                    source: RateSource::Manual,
                    observed_at: Utc::now(),
                    occurred_at: Utc::now(),
                }),
                |_t, id| Currency::empty(CurrencyId::new(id)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));

        // Registering twice is a concurrency-style conflict.
        dispatcher
            .dispatch::<Currency>(
                tenant_id,
                agg,
                "rates.currency",
                register_cmd(tenant_id, currency_id),
                |_t, id| Currency::empty(CurrencyId::new(id)),
            )
            .await
            .unwrap();
        let err = dispatcher
            .dispatch::<Currency>(
                tenant_id,
                agg,
                "rates.currency",
                register_cmd(tenant_id, currency_id),
                |_t, id| Currency::empty(CurrencyId::new(id)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }
}
