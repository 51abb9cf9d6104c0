use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use model_registry::Predictions;
use parking_lot::RwLock;
use serde::Serialize;

/// How many records a history read returns at most, and how many are kept per user.
pub const HISTORY_LIMIT: usize = 20;

/// One served prediction.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub user_id: String,
    pub image_url: Option<String>,
    pub result: Predictions,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(user_id: impl Into<String>, image_url: Option<String>, result: Predictions) -> Self {
        Self {
            user_id: user_id.into(),
            image_url,
            result,
            timestamp: Utc::now(),
        }
    }
}

/// In-memory prediction history, keeping the most recent records of every user.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    records: RwLock<HashMap<String, VecDeque<HistoryRecord>>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::with_capacity(HISTORY_LIMIT)
    }
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `HistoryStore` keeping at most `capacity` records per user.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `record`, dropping the user's oldest one past the capacity.
    pub fn push(&self, record: HistoryRecord) {
        let mut records = self.records.write();
        let user = records.entry(record.user_id.clone()).or_default();
        user.push_back(record);
        while user.len() > self.capacity {
            user.pop_front();
        }
    }

    /// The most recent records of `user_id`, newest first.
    ///
    /// # Arguments
    /// * `user_id` - The caller.
    /// * `limit` - How many records to return at most.
    pub fn recent(&self, user_id: &str, limit: usize) -> Vec<HistoryRecord> {
        self.records
            .read()
            .get(user_id)
            .map(|records| records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// The amount of stored records, every user included.
    pub fn len(&self) -> usize {
        self.records.read().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
