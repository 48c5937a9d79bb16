/// Execute an aggregate command in place: decide, then apply each event.
///
/// Useful for unit tests and inline processing. Persistence, publication and
/// per-stream serialization are the job of the infrastructure dispatcher.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
) -> Result<Vec<A::Event>, A::Error>
where
    A: bankbook_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
