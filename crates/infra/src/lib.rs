//! `rateforge-infra` — infrastructure composition for the pricing domain.
//!
//! Contains the append-only event store (in-memory + Postgres), the command
//! dispatch pipeline, tenant-scoped read models and their projections (rate
//! board, formula directory, product catalog, order book), the price quote
//! service, and the Redis Streams event bus (behind the `redis` feature).

pub mod command_dispatcher;
pub mod event_bus;
pub mod event_store;
pub mod projections;
pub mod quotes;
pub mod read_model;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore,
    StoredEvent, UncommittedEvent};
pub use quotes::{PriceQuote, PriceQuoter, QuoteError};
pub use read_model::{InMemoryTenantStore, TenantStore};
