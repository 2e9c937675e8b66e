//! `rateforge-rates` — currency/commodity rate streams.
//!
//! One `Currency` aggregate per registered symbol. Every rate that arrives
//! (from the ingest feed or a manual recording) is an immutable
//! `RateRecorded` event; the aggregate keeps a capped window of recent
//! observations for the rate board.

pub mod currency;

pub use currency::{
    Currency, CurrencyCommand, CurrencyEvent, CurrencyId, CurrencyRegistered, CurrencyRetired,
    CurrencySettingsUpdated, RateObservation, RateRecorded, RateSource, RateTrend, RecordRate,
    RegisterCurrency, RetireCurrency, UpdateCurrencySettings, DEFAULT_HISTORY_LIMIT,
    MAX_HISTORY_LIMIT,
};
