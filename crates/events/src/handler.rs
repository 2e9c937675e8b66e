//! Inline aggregate execution helper.

/// Execute an aggregate command deterministically (no IO, no async).
///
/// Combines the two halves of the aggregate lifecycle in one step:
///
/// 1. **Decide**: `aggregate.handle(command)` produces events (no mutation)
/// 2. **Evolve**: each event is applied via `aggregate.apply(event)`
///
/// Useful for unit tests and inline processing that does not need the full
/// dispatcher pipeline (persistence, publication, concurrency checks). For
/// production paths prefer `CommandDispatcher::dispatch()`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: rateforge_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
