//! Order book: queryable view of orders and their frozen totals.

use serde_json::Value as JsonValue;

use rateforge_core::TenantId;
use rateforge_events::EventEnvelope;
use rateforge_orders::{OrderLine, PricingOrderEvent, PricingOrderId, PricingOrderStatus};

use super::ProjectionError;
use super::cursors::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "orders.order";

/// Queryable order read model.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReadModel {
    pub order_id: PricingOrderId,
    pub status: PricingOrderStatus,
    pub lines: Vec<OrderLine>,
    pub total: f64,
}

impl OrderReadModel {
    fn skeleton(order_id: PricingOrderId) -> Self {
        Self {
            order_id,
            status: PricingOrderStatus::Draft,
            lines: Vec::new(),
            total: 0.0,
        }
    }

    fn recompute_total(&mut self) {
        self.total = self.lines.iter().map(OrderLine::line_total).sum();
    }
}

#[derive(Debug)]
pub struct OrderBookProjection<S>
where
    S: TenantStore<PricingOrderId, OrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrderBookProjection<S>
where
    S: TenantStore<PricingOrderId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, order_id: &PricingOrderId) -> Option<OrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<OrderReadModel> {
        self.store.list(tenant_id)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq)? {
            CursorCheck::Skip => return Ok(()),
            CursorCheck::Apply => {}
        }

        let ev: PricingOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, order_id) = match &ev {
            PricingOrderEvent::OrderOpened(e) => (e.tenant_id, e.order_id),
            PricingOrderEvent::QuotedLineAdded(e) => (e.tenant_id, e.order_id),
            PricingOrderEvent::OrderPriced(e) => (e.tenant_id, e.order_id),
            PricingOrderEvent::OrderClosed(e) => (e.tenant_id, e.order_id),
        };

        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if order_id.0 != aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut rm = self
            .store
            .get(tenant_id, &order_id)
            .unwrap_or_else(|| OrderReadModel::skeleton(order_id));

        match ev {
            PricingOrderEvent::OrderOpened(_) => {
                rm.status = PricingOrderStatus::Draft;
                rm.lines.clear();
                rm.total = 0.0;
            }
            PricingOrderEvent::QuotedLineAdded(e) => {
                rm.lines.push(OrderLine {
                    line_no: e.line_no,
                    product_id: e.product_id,
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                    rate_snapshot: e.rate_snapshot,
                });
                rm.recompute_total();
            }
            PricingOrderEvent::OrderPriced(_) => {
                rm.status = PricingOrderStatus::Priced;
            }
            PricingOrderEvent::OrderClosed(_) => {
                rm.status = PricingOrderStatus::Closed;
            }
        }

        self.store.upsert(tenant_id, order_id, rm);
        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
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
