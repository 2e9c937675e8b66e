//! Product catalog: queryable view of products and their pricing profiles.

use serde_json::Value as JsonValue;

use rateforge_catalog::{PricingProfile, ProductEvent, ProductId, ProductStatus};
use rateforge_core::TenantId;
use rateforge_events::EventEnvelope;

use super::ProjectionError;
use super::cursors::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "catalog.product";

/// Queryable product read model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub status: ProductStatus,
    pub pricing: PricingProfile,
}

impl ProductReadModel {
    fn skeleton(product_id: ProductId) -> Self {
        Self {
            product_id,
            sku: String::new(),
            name: String::new(),
            status: ProductStatus::Draft,
            pricing: PricingProfile::default(),
        }
    }
}

#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
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

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, product_id) = match &ev {
            ProductEvent::ProductCreated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductActivated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductArchived(e) => (e.tenant_id, e.product_id),
            ProductEvent::PricingProfileSet(e) => (e.tenant_id, e.product_id),
        };

        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if product_id.0 != aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut rm = self
            .store
            .get(tenant_id, &product_id)
            .unwrap_or_else(|| ProductReadModel::skeleton(product_id));

        match ev {
            ProductEvent::ProductCreated(e) => {
                rm.sku = e.sku;
                rm.name = e.name;
                rm.status = ProductStatus::Draft;
                rm.pricing = e.pricing;
            }
            ProductEvent::ProductActivated(_) => {
                rm.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                rm.status = ProductStatus::Archived;
            }
            ProductEvent::PricingProfileSet(e) => {
                rm.pricing = e.pricing;
            }
        }

        self.store.upsert(tenant_id, product_id, rm);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use rateforge_catalog::{PricingProfileSet, ProductCreated};
    use rateforge_core::AggregateId;
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;

    type TestStore = Arc<InMemoryTenantStore<ProductId, ProductReadModel>>;

    fn projection() -> ProductCatalogProjection<TestStore> {
        ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()))
    }

    fn envelope(
        tenant_id: TenantId,
        product_id: ProductId,
        seq: u64,
        ev: &ProductEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            product_id.0,
            AGGREGATE_TYPE,
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    #[test]
    fn projects_creation_and_profile_changes() {
        let projection = projection();
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());

        projection
            .apply_envelope(&envelope(
                tenant_id,
                product_id,
                1,
                &ProductEvent::ProductCreated(ProductCreated {
                    tenant_id,
                    product_id,
                    sku: "SKU-1".to_string(),
                    name: "Ring".to_string(),
                    pricing: PricingProfile::default(),
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        let profile = PricingProfile {
            base_quantity: 3.5,
            ..PricingProfile::default()
        };
        projection
            .apply_envelope(&envelope(
                tenant_id,
                product_id,
                2,
                &ProductEvent::PricingProfileSet(PricingProfileSet {
                    tenant_id,
                    product_id,
                    pricing: profile,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        let rm = projection.get(tenant_id, &product_id).unwrap();
        assert_eq!(rm.sku, "SKU-1");
        assert_eq!(rm.pricing.base_quantity, 3.5);
    }
}
