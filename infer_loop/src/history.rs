//! Bounded history of delivered results.
//!
use std::{
    collections::VecDeque,
    time::{SystemTime, UNIX_EPOCH},
};

use common::protocol::{InferenceResult, ResultMsg};

/// Number of results kept for display.
pub const HISTORY_LEN: usize = 5;

/// Ring of the most recent results, newest first.
#[derive(Debug)]
pub struct ResultHistory {
    entries: VecDeque<ResultMsg>,
    capacity: usize,
}

impl Default for ResultHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_LEN)
    }
}

impl ResultHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `result` with the current time, evicting the oldest entry when full.
    pub fn push(&mut self, result: InferenceResult) -> &ResultMsg {
        self.push_msg(ResultMsg {
            timestamp_ms: now_ms(),
            result,
        })
    }

    pub fn push_msg(&mut self, msg: ResultMsg) -> &ResultMsg {
        self.entries.push_front(msg);
        self.entries.truncate(self.capacity.max(1));
        &self.entries[0]
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ResultMsg> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use common::protocol::Classification;

    use super::*;

    fn labelled(label: &str) -> InferenceResult {
        InferenceResult::Classifications(vec![Classification {
            label: label.into(),
            probability: 0.5,
        }])
    }

    #[test]
    fn keeps_newest_five() {
        let mut history = ResultHistory::default();
        for i in 0..7 {
            history.push(labelled(&format!("entry-{i}")));
        }

        assert_eq!(history.len(), HISTORY_LEN);
        let labels: Vec<_> = history
            .iter()
            .map(|msg| match &msg.result {
                InferenceResult::Classifications(items) => items[0].label.clone(),
                other => panic!("unexpected {}", other.kind()),
            })
            .collect();
        assert_eq!(
            labels,
            vec!["entry-6", "entry-5", "entry-4", "entry-3", "entry-2"]
        );
    }

    #[test]
    fn clear_empties_history() {
        let mut history = ResultHistory::default();
        history.push(labelled("a"));
        assert!(history.iter().next().unwrap().timestamp_ms > 0);

        history.clear();
        assert!(history.is_empty());
    }
}
