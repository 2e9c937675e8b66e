use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use rateforge_catalog::ProductId;
use rateforge_core::{AggregateId, DomainError, TenantId};
use rateforge_events::{EventBus, EventEnvelope, InMemoryEventBus};
use rateforge_formulas::FormulaId;
use rateforge_infra::{
    CommandDispatcher, DispatchError, InMemoryEventStore, InMemoryTenantStore, PriceQuote,
    PriceQuoter, QuoteError, StoredEvent,
    projections::{
        CurrencyReadModel, FormulaDirectoryProjection, FormulaReadModel, OrderBookProjection,
        OrderReadModel, ProductCatalogProjection, ProductReadModel, RateBoardProjection,
    },
};
use rateforge_orders::PricingOrderId;
use rateforge_rates::CurrencyId;

#[cfg(feature = "redis")]
use rateforge_infra::{PostgresEventStore, event_bus::RedisStreamsEventBus};
#[cfg(feature = "redis")]
use sqlx::PgPool;

/// Realtime message broadcasted via SSE (the rate ticker).
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: serde_json::Value,
}

type CurrencyStore = Arc<InMemoryTenantStore<CurrencyId, CurrencyReadModel>>;
type FormulaStore = Arc<InMemoryTenantStore<FormulaId, FormulaReadModel>>;
type ProductStore = Arc<InMemoryTenantStore<ProductId, ProductReadModel>>;
type OrderStore = Arc<InMemoryTenantStore<PricingOrderId, OrderReadModel>>;

type RateBoard = Arc<RateBoardProjection<CurrencyStore>>;
type FormulaDirectory = Arc<FormulaDirectoryProjection<FormulaStore>>;
type ProductCatalog = Arc<ProductCatalogProjection<ProductStore>>;
type OrderBook = Arc<OrderBookProjection<OrderStore>>;
type Quoter = Arc<PriceQuoter<CurrencyStore, FormulaStore, ProductStore>>;

// Type-erased dispatcher for in-memory implementations
type InMemoryDispatcher = CommandDispatcher<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>,
>;

// Type-erased dispatcher for persistent implementations
#[cfg(feature = "redis")]
type PersistentDispatcher = CommandDispatcher<Arc<PostgresEventStore>, Arc<RedisStreamsEventBus>>;

/// Projections shared by both wiring variants.
#[derive(Clone)]
pub struct ProjectionSet {
    pub rate_board: RateBoard,
    pub formula_directory: FormulaDirectory,
    pub product_catalog: ProductCatalog,
    pub order_book: OrderBook,
}

impl ProjectionSet {
    fn new() -> Self {
        Self {
            rate_board: Arc::new(RateBoardProjection::new(Arc::new(InMemoryTenantStore::new()))),
            formula_directory: Arc::new(FormulaDirectoryProjection::new(Arc::new(
                InMemoryTenantStore::new(),
            ))),
            product_catalog: Arc::new(ProductCatalogProjection::new(Arc::new(
                InMemoryTenantStore::new(),
            ))),
            order_book: Arc::new(OrderBookProjection::new(Arc::new(InMemoryTenantStore::new()))),
        }
    }

    /// Route an envelope to the projection(s) responsible for its stream.
    fn apply(&self, env: &EventEnvelope<serde_json::Value>) -> Result<(), String> {
        match env.aggregate_type() {
            "rates.currency" => self.rate_board.apply_envelope(env).map_err(|e| e.to_string()),
            "formulas.formula" => self
                .formula_directory
                .apply_envelope(env)
                .map_err(|e| e.to_string()),
            "catalog.product" => self
                .product_catalog
                .apply_envelope(env)
                .map_err(|e| e.to_string()),
            "orders.order" => self.order_book.apply_envelope(env).map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        dispatcher: Arc<InMemoryDispatcher>,
        event_store: Arc<InMemoryEventStore>,
        projections: ProjectionSet,
        quoter: Quoter,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
    #[cfg(feature = "redis")]
    Persistent {
        dispatcher: Arc<PersistentDispatcher>,
        event_store: Arc<PostgresEventStore>,
        projections: ProjectionSet,
        quoter: Quoter,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
        bus: Arc<RedisStreamsEventBus>,
    },
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services().await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
            return build_in_memory_services();
        }
    }

    build_in_memory_services()
}

fn spawn_projection_worker(
    sub: rateforge_events::Subscription<EventEnvelope<serde_json::Value>>,
    projections: ProjectionSet,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) {
    // Background subscriber: bus -> projections -> ticker broadcast.
    tokio::task::spawn_blocking(move || {
        loop {
            match sub.recv() {
                Ok(env) => {
                    if let Err(e) = projections.apply(&env) {
                        tracing::warn!("projection apply failed: {e}");
                        continue;
                    }

                    // Broadcast projection update (lossy; no backpressure on core).
                    let at = env.aggregate_type().to_string();
                    let _ = realtime_tx.send(RealtimeMessage {
                        tenant_id: env.tenant_id(),
                        topic: format!("{at}.projection_updated"),
                        payload: serde_json::json!({
                            "kind": "projection_update",
                            "aggregate_type": at,
                            "aggregate_id": env.aggregate_id().to_string(),
                            "sequence_number": env.sequence_number(),
                        }),
                    });
                }
                Err(_) => break,
            }
        }
    });
}

fn build_in_memory_services() -> AppServices {
    // In-memory infra wiring (dev/test): store + bus + projections.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
        Arc::new(InMemoryEventBus::new());

    let projections = ProjectionSet::new();
    let quoter: Quoter = Arc::new(PriceQuoter::new(
        projections.rate_board.clone(),
        projections.formula_directory.clone(),
        projections.product_catalog.clone(),
    ));

    // Realtime channel (SSE): lossy broadcast, tenant-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(bus.subscribe(), projections.clone(), realtime_tx.clone());

    let dispatcher: Arc<InMemoryDispatcher> =
        Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));

    AppServices::InMemory {
        dispatcher,
        event_store: store,
        projections,
        quoter,
        realtime_tx,
    }
}

#[cfg(feature = "redis")]
async fn build_persistent_services() -> AppServices {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let store = Arc::new(PostgresEventStore::new(pool));
    store.ensure_schema().await.expect("Failed to ensure event schema");

    let bus = Arc::new(
        RedisStreamsEventBus::new(&redis_url, None).expect("Failed to create Redis Streams bus"),
    );
    bus.ensure_consumer_group("rateforge.projections")
        .expect("Failed to create consumer group");

    let projections = ProjectionSet::new();
    let quoter: Quoter = Arc::new(PriceQuoter::new(
        projections.rate_board.clone(),
        projections.formula_directory.clone(),
        projections.product_catalog.clone(),
    ));

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    let sub = bus.subscribe_with_group(
        "rateforge.projections",
        &format!("consumer-{}", uuid::Uuid::now_v7()),
    );
    spawn_projection_worker(sub, projections.clone(), realtime_tx.clone());

    let dispatcher: Arc<PersistentDispatcher> =
        Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));

    AppServices::Persistent {
        dispatcher,
        event_store: store,
        projections,
        quoter,
        realtime_tx,
        bus,
    }
}

impl AppServices {
    fn projections(&self) -> &ProjectionSet {
        match self {
            AppServices::InMemory { projections, .. } => projections,
            #[cfg(feature = "redis")]
            AppServices::Persistent { projections, .. } => projections,
        }
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        match self {
            AppServices::InMemory { realtime_tx, .. } => realtime_tx,
            #[cfg(feature = "redis")]
            AppServices::Persistent { realtime_tx, .. } => realtime_tx,
        }
    }

    pub async fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: rateforge_core::Aggregate<Error = DomainError>,
        A::Event: rateforge_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        match self {
            AppServices::InMemory { dispatcher, .. } => {
                dispatcher
                    .dispatch::<A>(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)
                    .await
            }
            #[cfg(feature = "redis")]
            AppServices::Persistent { dispatcher, .. } => {
                dispatcher
                    .dispatch::<A>(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)
                    .await
            }
        }
    }

    pub fn currencies_get(
        &self,
        tenant_id: TenantId,
        currency_id: &CurrencyId,
    ) -> Option<CurrencyReadModel> {
        self.projections().rate_board.get(tenant_id, currency_id)
    }

    pub fn currencies_list(&self, tenant_id: TenantId) -> Vec<CurrencyReadModel> {
        self.projections().rate_board.list(tenant_id)
    }

    pub fn currencies_find_by_code(
        &self,
        tenant_id: TenantId,
        code: &str,
    ) -> Option<CurrencyReadModel> {
        self.projections().rate_board.find_by_code(tenant_id, code)
    }

    pub fn formulas_get(&self, tenant_id: TenantId, formula_id: &FormulaId) -> Option<FormulaReadModel> {
        self.projections().formula_directory.get(tenant_id, formula_id)
    }

    pub fn formulas_list(&self, tenant_id: TenantId) -> Vec<FormulaReadModel> {
        self.projections().formula_directory.list(tenant_id)
    }

    pub fn products_get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.projections().product_catalog.get(tenant_id, product_id)
    }

    pub fn products_list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        self.projections().product_catalog.list(tenant_id)
    }

    pub fn orders_get(&self, tenant_id: TenantId, order_id: &PricingOrderId) -> Option<OrderReadModel> {
        self.projections().order_book.get(tenant_id, order_id)
    }

    pub fn orders_list(&self, tenant_id: TenantId) -> Vec<OrderReadModel> {
        self.projections().order_book.list(tenant_id)
    }

    pub fn quote(&self, tenant_id: TenantId, product_id: &ProductId) -> Result<PriceQuote, QuoteError> {
        match self {
            AppServices::InMemory { quoter, .. } => quoter.quote(tenant_id, product_id),
            #[cfg(feature = "redis")]
            AppServices::Persistent { quoter, .. } => quoter.quote(tenant_id, product_id),
        }
    }
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
