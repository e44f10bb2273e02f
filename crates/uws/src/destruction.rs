//! Destruction deadlines as a lazily re-keyed min-heap.
//!
//! Changing a job's destruction time just pushes a fresh heap entry; a
//! popped entry is validated against the job's current deadline and
//! silently dropped (or re-pushed) when stale.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Default)]
pub struct DestructionManager {
    heap: Mutex<BinaryHeap<Reverse<(DateTime<Utc>, String)>>>,
}

impl DestructionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or move) a job's destruction deadline.
    pub fn schedule(&self, job_id: &str, at: DateTime<Utc>) {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.push(Reverse((at, job_id.to_string())));
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Pop every job whose deadline has passed.
    ///
    /// `current` reports the job's present destruction time (`None` when
    /// the job no longer exists, `Some(None)` when it no longer expires).
    /// Entries out of step with it are stale: dropped, or re-pushed under
    /// the actual deadline.
    pub fn due(
        &self,
        now: DateTime<Utc>,
        current: impl Fn(&str) -> Option<Option<DateTime<Utc>>>,
    ) -> Vec<String> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        while let Some(Reverse((at, _))) = heap.peek() {
            if *at > now {
                break;
            }
            let Reverse((_, job_id)) = heap.pop().expect("peeked entry pops");
            match current(&job_id) {
                None | Some(None) => {}
                Some(Some(actual)) if actual <= now => due.push(job_id),
                Some(Some(actual)) => heap.push(Reverse((actual, job_id))),
            }
        }
        due
    }
}
