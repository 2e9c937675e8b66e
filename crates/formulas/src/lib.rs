//! `rateforge-formulas` — user-authored pricing formulas.
//!
//! A `Formula` aggregate owns an arithmetic expression plus the named
//! variables it references. Expressions are validated structurally at command
//! time (whitelist + parse via `rateforge-pricing`); arithmetic failures are
//! a quote-time concern and degrade to zero there.

pub mod formula;

pub use formula::{
    ArchiveFormula, DefineFormula, Formula, FormulaArchived, FormulaCommand, FormulaDefined,
    FormulaEvent, FormulaId, FormulaVariable, RemoveVariable, UpdateExpression, UpsertVariable,
    VariableRemoved, VariableRole, VariableUpserted,
};
