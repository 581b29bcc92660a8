use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

const DEFAULT_CAPACITY: usize = 100;

/// One recorded state transition, kept for postmortem diagnostics dumps.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub at: DateTime<Utc>,
    pub from_state: String,
    pub to_state: String,
    pub trigger: String,
}

impl TransitionRecord {
    pub fn new(
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            at: Utc::now(),
            from_state: from_state.into(),
            to_state: to_state.into(),
            trigger: trigger.into(),
        }
    }
}

/// Bounded ring buffer of a single state machine's recent transitions.
///
/// Every PMSM and the Mode Warden keep one of these; the Graveyard snapshots
/// it into the discarded entry so a diagnostics dump can show how a
/// terminated machine actually got there.
#[derive(Debug, Clone, Default)]
pub struct TransitionLog {
    capacity: usize,
    entries: VecDeque<TransitionRecord>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: TransitionRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<TransitionRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_past_capacity() {
        let mut log = TransitionLog::with_capacity(2);
        log.push(TransitionRecord::new("a", "b", "t1"));
        log.push(TransitionRecord::new("b", "c", "t2"));
        log.push(TransitionRecord::new("c", "d", "t3"));

        let snap = log.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].trigger, "t2");
        assert_eq!(snap[1].trigger, "t3");
    }
}
