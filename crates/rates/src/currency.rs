use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rateforge_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, ValueObject};
use rateforge_events::Event;

/// Currency identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyId(pub AggregateId);

impl CurrencyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// History window applied when registration does not specify one.
pub const DEFAULT_HISTORY_LIMIT: usize = 30;

/// Hard upper bound for the per-currency history window.
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Where a rate observation came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RateSource {
    /// Pushed by an external feed through the ingest endpoint.
    Ingest { provider: String },
    /// Entered by an operator.
    Manual,
}

/// A single observed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub value: f64,
    pub source: RateSource,
    pub observed_at: DateTime<Utc>,
}

impl ValueObject for RateObservation {}

/// Direction of the latest rate change, for board/ticker display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateTrend {
    Up,
    Down,
    Flat,
}

impl RateTrend {
    pub fn from_change(previous: Option<f64>, current: f64) -> Self {
        match previous {
            Some(prev) if current > prev => RateTrend::Up,
            Some(prev) if current < prev => RateTrend::Down,
            _ => RateTrend::Flat,
        }
    }
}

/// Aggregate root: Currency.
///
/// Holds the capped observation window; the cap is enforced on every apply so
/// rehydrated state can never exceed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Currency {
    id: CurrencyId,
    tenant_id: Option<TenantId>,
    code: String,
    name: String,
    unit_symbol: String,
    history_limit: usize,
    history: VecDeque<RateObservation>,
    previous_value: Option<f64>,
    retired: bool,
    version: u64,
    created: bool,
}

impl Currency {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: CurrencyId) -> Self {
        Self {
            id,
            tenant_id: None,
            code: String::new(),
            name: String::new(),
            unit_symbol: String::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            history: VecDeque::new(),
            previous_value: None,
            retired: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CurrencyId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_symbol(&self) -> &str {
        &self.unit_symbol
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn history(&self) -> impl Iterator<Item = &RateObservation> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn current_value(&self) -> Option<f64> {
        self.history.back().map(|obs| obs.value)
    }

    pub fn previous_value(&self) -> Option<f64> {
        self.previous_value
    }

    /// A currency quotes while it is registered, not retired, and has at
    /// least one observation.
    pub fn can_quote(&self) -> bool {
        self.created && !self.retired && !self.history.is_empty()
    }

    fn enforce_cap(&mut self) {
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }
}

impl AggregateRoot for Currency {
    type Id = CurrencyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Normalize and validate a currency code: uppercase, `A-Z0-9_`, 1..=16 chars.
pub fn normalize_code(raw: &str) -> Result<String, DomainError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(DomainError::validation("currency code cannot be empty"));
    }
    if code.len() > 16 {
        return Err(DomainError::validation("currency code exceeds 16 characters"));
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        return Err(DomainError::validation(
            "currency code may only contain letters, digits, and underscores",
        ));
    }
    Ok(code)
}

fn clamp_history_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_HISTORY_LIMIT)
}

/// Command: RegisterCurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterCurrency {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub code: String,
    pub name: String,
    pub unit_symbol: String,
    pub history_limit: Option<usize>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordRate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRate {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub value: f64,
    pub source: RateSource,
    pub observed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateCurrencySettings (partial update).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCurrencySettings {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub name: Option<String>,
    pub history_limit: Option<usize>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetireCurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetireCurrency {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CurrencyCommand {
    RegisterCurrency(RegisterCurrency),
    RecordRate(RecordRate),
    UpdateCurrencySettings(UpdateCurrencySettings),
    RetireCurrency(RetireCurrency),
}

/// Event: CurrencyRegistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRegistered {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub code: String,
    pub name: String,
    pub unit_symbol: String,
    pub history_limit: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RateRecorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecorded {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub value: f64,
    /// Value in effect before this recording (trend computation downstream).
    pub previous_value: Option<f64>,
    pub source: RateSource,
    pub observed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CurrencySettingsUpdated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencySettingsUpdated {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub name: Option<String>,
    pub history_limit: Option<usize>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CurrencyRetired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRetired {
    pub tenant_id: TenantId,
    pub currency_id: CurrencyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CurrencyEvent {
    CurrencyRegistered(CurrencyRegistered),
    RateRecorded(RateRecorded),
    CurrencySettingsUpdated(CurrencySettingsUpdated),
    CurrencyRetired(CurrencyRetired),
}

impl Event for CurrencyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CurrencyEvent::CurrencyRegistered(_) => "rates.currency.registered",
            CurrencyEvent::RateRecorded(_) => "rates.currency.rate_recorded",
            CurrencyEvent::CurrencySettingsUpdated(_) => "rates.currency.settings_updated",
            CurrencyEvent::CurrencyRetired(_) => "rates.currency.retired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CurrencyEvent::CurrencyRegistered(e) => e.occurred_at,
            CurrencyEvent::RateRecorded(e) => e.occurred_at,
            CurrencyEvent::CurrencySettingsUpdated(e) => e.occurred_at,
            CurrencyEvent::CurrencyRetired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Currency {
    type Command = CurrencyCommand;
    type Event = CurrencyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CurrencyEvent::CurrencyRegistered(e) => {
                self.id = e.currency_id;
                self.tenant_id = Some(e.tenant_id);
                self.code = e.code.clone();
                self.name = e.name.clone();
                self.unit_symbol = e.unit_symbol.clone();
                self.history_limit = clamp_history_limit(e.history_limit);
                self.history.clear();
                self.previous_value = None;
                self.retired = false;
                self.created = true;
            }
            CurrencyEvent::RateRecorded(e) => {
                self.previous_value = self.current_value();
                self.history.push_back(RateObservation {
                    value: e.value,
                    source: e.source.clone(),
                    observed_at: e.observed_at,
                });
                self.enforce_cap();
            }
            CurrencyEvent::CurrencySettingsUpdated(e) => {
                if let Some(name) = &e.name {
                    self.name = name.clone();
                }
                if let Some(limit) = e.history_limit {
                    self.history_limit = clamp_history_limit(limit);
                    // Shrinking the window drops the oldest observations.
                    self.enforce_cap();
                }
            }
            CurrencyEvent::CurrencyRetired(_) => {
                self.retired = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CurrencyCommand::RegisterCurrency(cmd) => self.handle_register(cmd),
            CurrencyCommand::RecordRate(cmd) => self.handle_record_rate(cmd),
            CurrencyCommand::UpdateCurrencySettings(cmd) => self.handle_update_settings(cmd),
            CurrencyCommand::RetireCurrency(cmd) => self.handle_retire(cmd),
        }
    }
}

impl Currency {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_currency_id(&self, currency_id: CurrencyId) -> Result<(), DomainError> {
        if self.id != currency_id {
            return Err(DomainError::invariant("currency_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterCurrency) -> Result<Vec<CurrencyEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("currency already registered"));
        }

        let code = normalize_code(&cmd.code)?;

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let history_limit = clamp_history_limit(cmd.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT));

        Ok(vec![CurrencyEvent::CurrencyRegistered(CurrencyRegistered {
            tenant_id: cmd.tenant_id,
            currency_id: cmd.currency_id,
            code,
            name: cmd.name.trim().to_string(),
            unit_symbol: cmd.unit_symbol.trim().to_string(),
            history_limit,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_rate(&self, cmd: &RecordRate) -> Result<Vec<CurrencyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_currency_id(cmd.currency_id)?;

        if self.retired {
            return Err(DomainError::invariant(
                "retired currencies cannot record rates",
            ));
        }

        if !cmd.value.is_finite() || cmd.value <= 0.0 {
            return Err(DomainError::validation("rate value must be finite and positive"));
        }

        Ok(vec![CurrencyEvent::RateRecorded(RateRecorded {
            tenant_id: cmd.tenant_id,
            currency_id: cmd.currency_id,
            value: cmd.value,
            previous_value: self.current_value(),
            source: cmd.source.clone(),
            observed_at: cmd.observed_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_settings(
        &self,
        cmd: &UpdateCurrencySettings,
    ) -> Result<Vec<CurrencyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_currency_id(cmd.currency_id)?;

        if self.retired {
            return Err(DomainError::invariant("retired currencies cannot be updated"));
        }

        if cmd.name.is_none() && cmd.history_limit.is_none() {
            return Err(DomainError::validation("settings update contains no changes"));
        }

        if let Some(name) = &cmd.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }

        if let Some(limit) = cmd.history_limit {
            if limit == 0 {
                return Err(DomainError::validation("history limit must be at least 1"));
            }
        }

        Ok(vec![CurrencyEvent::CurrencySettingsUpdated(
            CurrencySettingsUpdated {
                tenant_id: cmd.tenant_id,
                currency_id: cmd.currency_id,
                name: cmd.name.as_ref().map(|n| n.trim().to_string()),
                history_limit: cmd.history_limit.map(clamp_history_limit),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_retire(&self, cmd: &RetireCurrency) -> Result<Vec<CurrencyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_currency_id(cmd.currency_id)?;

        if self.retired {
            return Err(DomainError::conflict("currency is already retired"));
        }

        Ok(vec![CurrencyEvent::CurrencyRetired(CurrencyRetired {
            tenant_id: cmd.tenant_id,
            currency_id: cmd.currency_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
