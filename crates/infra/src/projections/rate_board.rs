//! Rate board: the queryable view of every registered currency.
//!
//! This is the projection the public surfaces read: current value, trend,
//! and the capped observation history per currency, plus a code index so the
//! ingest path can route feed entries (`"USD": 42.1`) to currency streams.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use rateforge_core::TenantId;
use rateforge_events::EventEnvelope;
use rateforge_rates::{CurrencyEvent, CurrencyId, RateObservation, RateTrend};

use super::ProjectionError;
use super::cursors::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "rates.currency";

/// Queryable currency read model.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyReadModel {
    pub currency_id: CurrencyId,
    pub code: String,
    pub name: String,
    pub unit_symbol: String,
    pub history_limit: usize,
    pub current_value: Option<f64>,
    pub previous_value: Option<f64>,
    pub trend: RateTrend,
    /// Capped mirror of the aggregate's observation window, oldest first.
    pub history: Vec<RateObservation>,
    pub updated_at: Option<DateTime<Utc>>,
    pub retired: bool,
}

impl CurrencyReadModel {
    fn skeleton(currency_id: CurrencyId) -> Self {
        Self {
            currency_id,
            code: String::new(),
            name: String::new(),
            unit_symbol: String::new(),
            history_limit: rateforge_rates::DEFAULT_HISTORY_LIMIT,
            current_value: None,
            previous_value: None,
            trend: RateTrend::Flat,
            history: Vec::new(),
            updated_at: None,
            retired: false,
        }
    }

    fn enforce_cap(&mut self) {
        if self.history.len() > self.history_limit {
            let excess = self.history.len() - self.history_limit;
            self.history.drain(0..excess);
        }
    }
}

#[derive(Debug)]
pub struct RateBoardProjection<S>
where
    S: TenantStore<CurrencyId, CurrencyReadModel>,
{
    store: S,
    cursors: StreamCursors,
    codes: RwLock<HashMap<(TenantId, String), CurrencyId>>,
}

impl<S> RateBoardProjection<S>
where
    S: TenantStore<CurrencyId, CurrencyReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
            codes: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, currency_id: &CurrencyId) -> Option<CurrencyReadModel> {
        self.store.get(tenant_id, currency_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<CurrencyReadModel> {
        self.store.list(tenant_id)
    }

    /// Resolve a currency by its feed code (case-insensitive).
    pub fn find_by_code(&self, tenant_id: TenantId, code: &str) -> Option<CurrencyReadModel> {
        let code = code.trim().to_ascii_uppercase();
        let currency_id = *self.codes.read().ok()?.get(&(tenant_id, code))?;
        self.store.get(tenant_id, &currency_id)
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

        let ev: CurrencyEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, currency_id) = match &ev {
            CurrencyEvent::CurrencyRegistered(e) => (e.tenant_id, e.currency_id),
            CurrencyEvent::RateRecorded(e) => (e.tenant_id, e.currency_id),
            CurrencyEvent::CurrencySettingsUpdated(e) => (e.tenant_id, e.currency_id),
            CurrencyEvent::CurrencyRetired(e) => (e.tenant_id, e.currency_id),
        };

        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if currency_id.0 != aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event currency_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            CurrencyEvent::CurrencyRegistered(e) => {
                let mut rm = CurrencyReadModel::skeleton(e.currency_id);
                rm.code = e.code.clone();
                rm.name = e.name;
                rm.unit_symbol = e.unit_symbol;
                rm.history_limit = e.history_limit;
                self.store.upsert(tenant_id, e.currency_id, rm);

                if let Ok(mut codes) = self.codes.write() {
                    codes.insert((tenant_id, e.code), e.currency_id);
                }
            }
            CurrencyEvent::RateRecorded(e) => {
                let mut rm = self
                    .store
                    .get(tenant_id, &e.currency_id)
                    .unwrap_or_else(|| CurrencyReadModel::skeleton(e.currency_id));
                rm.previous_value = rm.current_value;
                rm.current_value = Some(e.value);
                rm.trend = RateTrend::from_change(e.previous_value, e.value);
                rm.history.push(RateObservation {
                    value: e.value,
                    source: e.source,
                    observed_at: e.observed_at,
                });
                rm.enforce_cap();
                rm.updated_at = Some(e.occurred_at);
                self.store.upsert(tenant_id, e.currency_id, rm);
            }
            CurrencyEvent::CurrencySettingsUpdated(e) => {
                let mut rm = self
                    .store
                    .get(tenant_id, &e.currency_id)
                    .unwrap_or_else(|| CurrencyReadModel::skeleton(e.currency_id));
                if let Some(name) = e.name {
                    rm.name = name;
                }
                if let Some(limit) = e.history_limit {
                    rm.history_limit = limit;
                    rm.enforce_cap();
                }
                self.store.upsert(tenant_id, e.currency_id, rm);
            }
            CurrencyEvent::CurrencyRetired(e) => {
                let mut rm = self
                    .store
                    .get(tenant_id, &e.currency_id)
                    .unwrap_or_else(|| CurrencyReadModel::skeleton(e.currency_id));
                rm.retired = true;
                self.store.upsert(tenant_id, e.currency_id, rm);
            }
        }

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
                if let Ok(mut codes) = self.codes.write() {
                    codes.retain(|(tenant, _), _| *tenant != t);
                }
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
