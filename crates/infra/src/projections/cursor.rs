//! Per-stream projection cursors.

use std::collections::HashMap;
use std::sync::RwLock;

use bankbook_core::AggregateId;

use super::ProjectionError;

/// Outcome of checking an envelope against its stream cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    /// Next in line; apply it, then advance.
    Apply,
    /// Already applied (replay or duplicate delivery).
    Duplicate,
}

/// Last applied sequence number per stream.
#[derive(Debug, Default)]
pub struct StreamCursors {
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, aggregate_id: AggregateId) -> Result<u64, ProjectionError> {
        let cursors = self.cursors.read().map_err(|_| poisoned())?;
        Ok(cursors.get(&aggregate_id).copied().unwrap_or(0))
    }

    pub fn check(&self, aggregate_id: AggregateId, seq: u64) -> Result<CursorCheck, ProjectionError> {
        let last = self.position(aggregate_id)?;

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorCheck::Duplicate);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(CursorCheck::Apply)
    }

    pub fn advance(&self, aggregate_id: AggregateId, seq: u64) -> Result<(), ProjectionError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), ProjectionError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        cursors.clear();
        Ok(())
    }
}

fn poisoned() -> ProjectionError {
    ProjectionError::Poisoned("stream cursors")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let id = AggregateId::new();

        assert_eq!(cursors.check(id, 1), Ok(CursorCheck::Apply));
        cursors.advance(id, 1).unwrap();

        assert_eq!(cursors.check(id, 1), Ok(CursorCheck::Duplicate));
        assert_eq!(cursors.check(id, 2), Ok(CursorCheck::Apply));
        assert_eq!(
            cursors.check(id, 4),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 4 })
        );
        assert!(cursors.check(id, 0).is_err());
    }

    #[test]
    fn streams_are_tracked_independently() {
        let cursors = StreamCursors::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        cursors.advance(a, 3).unwrap();
        assert_eq!(cursors.position(a), Ok(3));
        assert_eq!(cursors.position(b), Ok(0));
        cursors.clear().unwrap();
        assert_eq!(cursors.position(a), Ok(0));
    }

    #[test]
    fn poisoned_cursors_are_reported_not_skipped() {
        let cursors = Arc::new(StreamCursors::new());
        let id = AggregateId::new();

        let holder = Arc::clone(&cursors);
        let _ = std::thread::spawn(move || {
            let _guard = holder.cursors.write().unwrap();
            panic!("writer died holding the cursor lock");
        })
        .join();

        assert_eq!(cursors.advance(id, 1), Err(poisoned()));
        assert_eq!(cursors.check(id, 1), Err(poisoned()));
        assert_eq!(cursors.clear(), Err(poisoned()));
    }
}
