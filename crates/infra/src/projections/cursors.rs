//! Per-stream sequence cursors shared by all projections.

use std::collections::HashMap;
use std::sync::RwLock;

use rateforge_core::{AggregateId, TenantId};

use super::ProjectionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Outcome of a cursor check for an incoming envelope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    /// First unseen sequence number; apply the event.
    Apply,
    /// Already processed (at-least-once redelivery); skip silently.
    Skip,
}

/// In-memory per-stream cursor table.
///
/// Tracks the last applied sequence number per `(tenant, aggregate)` so
/// projections stay idempotent under redelivery and detect gaps.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `sequence_number` against the stream cursor.
    ///
    /// - `0` is never a valid sequence number
    /// - at or below the cursor: duplicate, skip
    /// - exactly cursor + 1 (or the first event seen): apply
    /// - anything else: a gap, surfaced as an error
    pub fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<CursorCheck, ProjectionError> {
        let last = self.get(tenant_id, aggregate_id);
        if sequence_number == 0 {
            return Err(ProjectionError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }
        if sequence_number <= last {
            return Ok(CursorCheck::Skip);
        }
        if sequence_number != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence {
                last,
                found: sequence_number,
            });
        }
        Ok(CursorCheck::Apply)
    }

    pub fn get(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.inner.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey {
                    tenant_id,
                    aggregate_id,
                })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    pub fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                sequence_number,
            );
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_applies_then_duplicates_skip() {
        let cursors = StreamCursors::new();
        let tenant = TenantId::new();
        let agg = AggregateId::new();

        assert_eq!(cursors.check(tenant, agg, 1).unwrap(), CursorCheck::Apply);
        cursors.advance(tenant, agg, 1);
        assert_eq!(cursors.check(tenant, agg, 1).unwrap(), CursorCheck::Skip);
        assert_eq!(cursors.check(tenant, agg, 2).unwrap(), CursorCheck::Apply);
    }

    #[test]
    fn gaps_are_errors() {
        let cursors = StreamCursors::new();
        let tenant = TenantId::new();
        let agg = AggregateId::new();

        cursors.advance(tenant, agg, 1);
        assert!(matches!(
            cursors.check(tenant, agg, 3),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 3 })
        ));
    }

    #[test]
    fn sequence_zero_is_always_an_error() {
        let cursors = StreamCursors::new();
        assert!(cursors.check(TenantId::new(), AggregateId::new(), 0).is_err());
    }

    #[test]
    fn mid_stream_subscription_is_tolerated() {
        // A projection attaching late sees its first envelope at seq > 1.
        let cursors = StreamCursors::new();
        let tenant = TenantId::new();
        let agg = AggregateId::new();
        assert_eq!(cursors.check(tenant, agg, 7).unwrap(), CursorCheck::Apply);
    }
}
