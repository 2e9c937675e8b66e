use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rateforge_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, ValueObject};
use rateforge_events::Event;
use rateforge_pricing::{VariableBindings, validate_expression};

/// Formula identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormulaId(pub AggregateId);

impl FormulaId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for FormulaId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Display grouping for a variable. Purely presentational; the engine treats
/// every variable the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableRole {
    Profit,
    Charge,
    Weight,
    #[default]
    Other,
}

/// A named formula input. Binds to `unit * value` during evaluation
/// (e.g. unit = price of one gram, value = grams).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaVariable {
    /// Referenced from expressions as `[code]`. Stored lowercased.
    pub code: String,
    pub name: String,
    pub unit: f64,
    pub value: f64,
    #[serde(default)]
    pub role: VariableRole,
}

impl FormulaVariable {
    pub fn resolved(&self) -> f64 {
        self.unit * self.value
    }
}

impl ValueObject for FormulaVariable {}

/// Normalize and validate a variable code: lowercase, `a-z0-9_`, 1..=32 chars.
pub fn normalize_variable_code(raw: &str) -> Result<String, DomainError> {
    let code = raw.trim().to_ascii_lowercase();
    if code.is_empty() {
        return Err(DomainError::validation("variable code cannot be empty"));
    }
    if code.len() > 32 {
        return Err(DomainError::validation("variable code exceeds 32 characters"));
    }
    if !code.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(DomainError::validation(
            "variable code may only contain letters, digits, and underscores",
        ));
    }
    Ok(code)
}

fn validate_variable(var: &FormulaVariable) -> Result<FormulaVariable, DomainError> {
    let code = normalize_variable_code(&var.code)?;
    if var.name.trim().is_empty() {
        return Err(DomainError::validation("variable name cannot be empty"));
    }
    if !var.unit.is_finite() || !var.value.is_finite() {
        return Err(DomainError::validation("variable unit and value must be finite"));
    }
    Ok(FormulaVariable {
        code,
        name: var.name.trim().to_string(),
        unit: var.unit,
        value: var.value,
        role: var.role,
    })
}

fn bindings_of(variables: &[FormulaVariable]) -> VariableBindings {
    variables.iter().map(|v| (v.code.as_str(), v.resolved())).collect()
}

fn check_expression(expression: &str, variables: &[FormulaVariable]) -> Result<(), DomainError> {
    if expression.trim().is_empty() {
        return Err(DomainError::validation("expression cannot be empty"));
    }
    validate_expression(expression, &bindings_of(variables))
        .map_err(|e| DomainError::validation(format!("invalid expression: {e}")))
}

/// Aggregate root: Formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    id: FormulaId,
    tenant_id: Option<TenantId>,
    name: String,
    expression: String,
    variables: Vec<FormulaVariable>,
    archived: bool,
    version: u64,
    created: bool,
}

impl Formula {
    /// Create an empty, not-yet-defined aggregate instance for rehydration.
    pub fn empty(id: FormulaId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            expression: String::new(),
            variables: Vec::new(),
            archived: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> FormulaId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn variables(&self) -> &[FormulaVariable] {
        &self.variables
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    /// Bindings for evaluation: each variable contributes `unit * value`.
    pub fn bindings(&self) -> VariableBindings {
        bindings_of(&self.variables)
    }

    fn variable_index(&self, code: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.code == code)
    }
}

impl AggregateRoot for Formula {
    type Id = FormulaId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: DefineFormula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefineFormula {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub name: String,
    pub expression: String,
    pub variables: Vec<FormulaVariable>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateExpression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateExpression {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub expression: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpsertVariable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertVariable {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub variable: FormulaVariable,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveVariable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveVariable {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveFormula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFormula {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormulaCommand {
    DefineFormula(DefineFormula),
    UpdateExpression(UpdateExpression),
    UpsertVariable(UpsertVariable),
    RemoveVariable(RemoveVariable),
    ArchiveFormula(ArchiveFormula),
}

/// Event: FormulaDefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaDefined {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub name: String,
    pub expression: String,
    pub variables: Vec<FormulaVariable>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpressionUpdated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionUpdated {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub expression: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariableUpserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableUpserted {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub variable: FormulaVariable,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariableRemoved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRemoved {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FormulaArchived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaArchived {
    pub tenant_id: TenantId,
    pub formula_id: FormulaId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormulaEvent {
    FormulaDefined(FormulaDefined),
    ExpressionUpdated(ExpressionUpdated),
    VariableUpserted(VariableUpserted),
    VariableRemoved(VariableRemoved),
    FormulaArchived(FormulaArchived),
}

impl Event for FormulaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FormulaEvent::FormulaDefined(_) => "formulas.formula.defined",
            FormulaEvent::ExpressionUpdated(_) => "formulas.formula.expression_updated",
            FormulaEvent::VariableUpserted(_) => "formulas.formula.variable_upserted",
            FormulaEvent::VariableRemoved(_) => "formulas.formula.variable_removed",
            FormulaEvent::FormulaArchived(_) => "formulas.formula.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            FormulaEvent::FormulaDefined(e) => e.occurred_at,
            FormulaEvent::ExpressionUpdated(e) => e.occurred_at,
            FormulaEvent::VariableUpserted(e) => e.occurred_at,
            FormulaEvent::VariableRemoved(e) => e.occurred_at,
            FormulaEvent::FormulaArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Formula {
    type Command = FormulaCommand;
    type Event = FormulaEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            FormulaEvent::FormulaDefined(e) => {
                self.id = e.formula_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.expression = e.expression.clone();
                self.variables = e.variables.clone();
                self.archived = false;
                self.created = true;
            }
            FormulaEvent::ExpressionUpdated(e) => {
                self.expression = e.expression.clone();
            }
            FormulaEvent::VariableUpserted(e) => {
                match self.variable_index(&e.variable.code) {
                    Some(idx) => self.variables[idx] = e.variable.clone(),
                    None => self.variables.push(e.variable.clone()),
                }
            }
            FormulaEvent::VariableRemoved(e) => {
                self.variables.retain(|v| v.code != e.code);
            }
            FormulaEvent::FormulaArchived(_) => {
                self.archived = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            FormulaCommand::DefineFormula(cmd) => self.handle_define(cmd),
            FormulaCommand::UpdateExpression(cmd) => self.handle_update_expression(cmd),
            FormulaCommand::UpsertVariable(cmd) => self.handle_upsert_variable(cmd),
            FormulaCommand::RemoveVariable(cmd) => self.handle_remove_variable(cmd),
            FormulaCommand::ArchiveFormula(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Formula {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_formula_id(&self, formula_id: FormulaId) -> Result<(), DomainError> {
        if self.id != formula_id {
            return Err(DomainError::invariant("formula_id mismatch"));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.archived {
            return Err(DomainError::invariant("archived formulas cannot be edited"));
        }
        Ok(())
    }

    fn handle_define(&self, cmd: &DefineFormula) -> Result<Vec<FormulaEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("formula already defined"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let mut variables = Vec::with_capacity(cmd.variables.len());
        for var in &cmd.variables {
            let normalized = validate_variable(var)?;
            if variables.iter().any(|v: &FormulaVariable| v.code == normalized.code) {
                return Err(DomainError::validation(format!(
                    "duplicate variable code '{}'",
                    normalized.code
                )));
            }
            variables.push(normalized);
        }

        check_expression(&cmd.expression, &variables)?;

        Ok(vec![FormulaEvent::FormulaDefined(FormulaDefined {
            tenant_id: cmd.tenant_id,
            formula_id: cmd.formula_id,
            name: cmd.name.trim().to_string(),
            expression: cmd.expression.trim().to_string(),
            variables,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_expression(
        &self,
        cmd: &UpdateExpression,
    ) -> Result<Vec<FormulaEvent>, DomainError> {
        self.ensure_editable()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_formula_id(cmd.formula_id)?;

        check_expression(&cmd.expression, &self.variables)?;

        Ok(vec![FormulaEvent::ExpressionUpdated(ExpressionUpdated {
            tenant_id: cmd.tenant_id,
            formula_id: cmd.formula_id,
            expression: cmd.expression.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_upsert_variable(
        &self,
        cmd: &UpsertVariable,
    ) -> Result<Vec<FormulaEvent>, DomainError> {
        self.ensure_editable()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_formula_id(cmd.formula_id)?;

        let variable = validate_variable(&cmd.variable)?;

        Ok(vec![FormulaEvent::VariableUpserted(VariableUpserted {
            tenant_id: cmd.tenant_id,
            formula_id: cmd.formula_id,
            variable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_variable(
        &self,
        cmd: &RemoveVariable,
    ) -> Result<Vec<FormulaEvent>, DomainError> {
        self.ensure_editable()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_formula_id(cmd.formula_id)?;

        let code = normalize_variable_code(&cmd.code)?;
        if self.variable_index(&code).is_none() {
            return Err(DomainError::not_found());
        }

        // The current expression must stay resolvable without the variable.
        let remaining: Vec<FormulaVariable> = self
            .variables
            .iter()
            .filter(|v| v.code != code)
            .cloned()
            .collect();
        check_expression(&self.expression, &remaining).map_err(|_| {
            DomainError::invariant(format!("expression still references '[{code}]'"))
        })?;

        Ok(vec![FormulaEvent::VariableRemoved(VariableRemoved {
            tenant_id: cmd.tenant_id,
            formula_id: cmd.formula_id,
            code,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveFormula) -> Result<Vec<FormulaEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_formula_id(cmd.formula_id)?;

        if self.archived {
            return Err(DomainError::conflict("formula is already archived"));
        }

        Ok(vec![FormulaEvent::FormulaArchived(FormulaArchived {
            tenant_id: cmd.tenant_id,
            formula_id: cmd.formula_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rateforge_core::AggregateId;
    use rateforge_events::execute;
    use rateforge_pricing::evaluate_or_zero;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_formula_id() -> FormulaId {
        FormulaId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn gold_variables() -> Vec<FormulaVariable> {
        vec![
            FormulaVariable {
                code: "Gold_18K".to_string(),
                name: "18k gold per gram".to_string(),
                unit: 4_250.0,
                value: 1.0,
                role: VariableRole::Other,
            },
            FormulaVariable {
                code: "profit".to_string(),
                name: "Margin percent".to_string(),
                unit: 1.0,
                value: 12.0,
                role: VariableRole::Profit,
            },
            FormulaVariable {
                code: "charge".to_string(),
                name: "Making charge".to_string(),
                unit: 1.0,
                value: 150.0,
                role: VariableRole::Charge,
            },
        ]
    }

    fn defined_formula() -> (Formula, TenantId, FormulaId) {
        let tenant_id = test_tenant_id();
        let formula_id = test_formula_id();
        let mut formula = Formula::empty(formula_id);
        execute(
            &mut formula,
            &FormulaCommand::DefineFormula(DefineFormula {
                tenant_id,
                formula_id,
                name: "18k gold".to_string(),
                expression: "[gold_18k] * (1 + [profit] / 100) + [charge]".to_string(),
                variables: gold_variables(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        (formula, tenant_id, formula_id)
    }

    #[test]
    fn define_normalizes_variable_codes() {
        let (formula, _, _) = defined_formula();
        assert_eq!(formula.variables()[0].code, "gold_18k");
    }

    #[test]
    fn defined_formula_evaluates_with_its_bindings() {
        let (formula, _, _) = defined_formula();
        let value = evaluate_or_zero(formula.expression(), &formula.bindings());
        let expected = 4_250.0 * 1.12 + 150.0;
        assert!((value - expected).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn define_rejects_expressions_referencing_unknown_variables() {
        let formula = Formula::empty(test_formula_id());
        let cmd = FormulaCommand::DefineFormula(DefineFormula {
            tenant_id: test_tenant_id(),
            formula_id: formula.id_typed(),
            name: "bad".to_string(),
            expression: "[nope] * 2".to_string(),
            variables: vec![],
            occurred_at: test_time(),
        });
        assert!(matches!(formula.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn define_rejects_forbidden_characters() {
        let formula = Formula::empty(test_formula_id());
        let cmd = FormulaCommand::DefineFormula(DefineFormula {
            tenant_id: test_tenant_id(),
            formula_id: formula.id_typed(),
            name: "bad".to_string(),
            expression: "1 + 2; exec".to_string(),
            variables: vec![],
            occurred_at: test_time(),
        });
        assert!(matches!(formula.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn define_rejects_duplicate_variable_codes() {
        let formula = Formula::empty(test_formula_id());
        let mut variables = gold_variables();
        variables.push(FormulaVariable {
            code: "GOLD_18K".to_string(),
            name: "duplicate".to_string(),
            unit: 1.0,
            value: 1.0,
            role: VariableRole::Other,
        });
        let cmd = FormulaCommand::DefineFormula(DefineFormula {
            tenant_id: test_tenant_id(),
            formula_id: formula.id_typed(),
            name: "dup".to_string(),
            expression: "[gold_18k]".to_string(),
            variables,
            occurred_at: test_time(),
        });
        assert!(matches!(formula.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn upsert_replaces_an_existing_variable() {
        let (mut formula, tenant_id, formula_id) = defined_formula();
        execute(
            &mut formula,
            &FormulaCommand::UpsertVariable(UpsertVariable {
                tenant_id,
                formula_id,
                variable: FormulaVariable {
                    code: "profit".to_string(),
                    name: "Margin percent".to_string(),
                    unit: 1.0,
                    value: 20.0,
                    role: VariableRole::Profit,
                },
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(formula.variables().len(), 3);
        assert_eq!(formula.bindings().get("profit"), Some(20.0));
    }

    #[test]
    fn remove_variable_still_referenced_by_expression_is_rejected() {
        let (formula, tenant_id, formula_id) = defined_formula();
        let cmd = FormulaCommand::RemoveVariable(RemoveVariable {
            tenant_id,
            formula_id,
            code: "charge".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            formula.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn remove_unreferenced_variable_succeeds() {
        let (mut formula, tenant_id, formula_id) = defined_formula();
        execute(
            &mut formula,
            &FormulaCommand::UpdateExpression(UpdateExpression {
                tenant_id,
                formula_id,
                expression: "[gold_18k] * (1 + [profit] / 100)".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        execute(
            &mut formula,
            &FormulaCommand::RemoveVariable(RemoveVariable {
                tenant_id,
                formula_id,
                code: "charge".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(formula.variables().len(), 2);
    }

    #[test]
    fn remove_unknown_variable_is_not_found() {
        let (formula, tenant_id, formula_id) = defined_formula();
        let cmd = FormulaCommand::RemoveVariable(RemoveVariable {
            tenant_id,
            formula_id,
            code: "ghost".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(formula.handle(&cmd), Err(DomainError::NotFound)));
    }

    #[test]
    fn update_expression_is_validated_against_current_variables() {
        let (formula, tenant_id, formula_id) = defined_formula();
        let cmd = FormulaCommand::UpdateExpression(UpdateExpression {
            tenant_id,
            formula_id,
            expression: "[unknown] + 1".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(formula.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn archived_formulas_reject_edits() {
        let (mut formula, tenant_id, formula_id) = defined_formula();
        execute(
            &mut formula,
            &FormulaCommand::ArchiveFormula(ArchiveFormula {
                tenant_id,
                formula_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(formula.is_archived());

        let cmd = FormulaCommand::UpdateExpression(UpdateExpression {
            tenant_id,
            formula_id,
            expression: "1".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            formula.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn apply_is_deterministic() {
        let (formula, _, formula_id) = defined_formula();

        let events = {
            let mut f = Formula::empty(formula_id);
            let evs = f
                .handle(&FormulaCommand::DefineFormula(DefineFormula {
                    tenant_id: formula.tenant_id().unwrap(),
                    formula_id,
                    name: "18k gold".to_string(),
                    expression: "[gold_18k] * (1 + [profit] / 100) + [charge]".to_string(),
                    variables: gold_variables(),
                    occurred_at: test_time(),
                }))
                .unwrap();
            evs
        };

        let mut a = Formula::empty(formula_id);
        let mut b = Formula::empty(formula_id);
        for ev in &events {
            a.apply(ev);
            b.apply(ev);
        }
        assert_eq!(a, b);
    }
}
