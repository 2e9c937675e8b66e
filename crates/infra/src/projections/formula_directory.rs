//! Formula directory: queryable view of defined formulas.

use serde_json::Value as JsonValue;

use rateforge_core::TenantId;
use rateforge_events::EventEnvelope;
use rateforge_formulas::{FormulaEvent, FormulaId, FormulaVariable};
use rateforge_pricing::VariableBindings;

use super::ProjectionError;
use super::cursors::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "formulas.formula";

/// Queryable formula read model.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaReadModel {
    pub formula_id: FormulaId,
    pub name: String,
    pub expression: String,
    pub variables: Vec<FormulaVariable>,
    pub archived: bool,
}

impl FormulaReadModel {
    fn skeleton(formula_id: FormulaId) -> Self {
        Self {
            formula_id,
            name: String::new(),
            expression: String::new(),
            variables: Vec::new(),
            archived: false,
        }
    }

    /// Bindings for evaluation: each variable contributes `unit * value`.
    pub fn bindings(&self) -> VariableBindings {
        self.variables
            .iter()
            .map(|v| (v.code.as_str(), v.resolved()))
            .collect()
    }
}

#[derive(Debug)]
pub struct FormulaDirectoryProjection<S>
where
    S: TenantStore<FormulaId, FormulaReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> FormulaDirectoryProjection<S>
where
    S: TenantStore<FormulaId, FormulaReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, formula_id: &FormulaId) -> Option<FormulaReadModel> {
        self.store.get(tenant_id, formula_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<FormulaReadModel> {
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

        let ev: FormulaEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, formula_id) = match &ev {
            FormulaEvent::FormulaDefined(e) => (e.tenant_id, e.formula_id),
            FormulaEvent::ExpressionUpdated(e) => (e.tenant_id, e.formula_id),
            FormulaEvent::VariableUpserted(e) => (e.tenant_id, e.formula_id),
            FormulaEvent::VariableRemoved(e) => (e.tenant_id, e.formula_id),
            FormulaEvent::FormulaArchived(e) => (e.tenant_id, e.formula_id),
        };

        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if formula_id.0 != aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event formula_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut rm = self
            .store
            .get(tenant_id, &formula_id)
            .unwrap_or_else(|| FormulaReadModel::skeleton(formula_id));

        match ev {
            FormulaEvent::FormulaDefined(e) => {
                rm.name = e.name;
                rm.expression = e.expression;
                rm.variables = e.variables;
                rm.archived = false;
            }
            FormulaEvent::ExpressionUpdated(e) => {
                rm.expression = e.expression;
            }
            FormulaEvent::VariableUpserted(e) => {
                match rm.variables.iter().position(|v| v.code == e.variable.code) {
                    Some(idx) => rm.variables[idx] = e.variable,
                    None => rm.variables.push(e.variable),
                }
            }
            FormulaEvent::VariableRemoved(e) => {
                rm.variables.retain(|v| v.code != e.code);
            }
            FormulaEvent::FormulaArchived(_) => {
                rm.archived = true;
            }
        }

        self.store.upsert(tenant_id, formula_id, rm);
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
