use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

/// Fixed-window request limiter: each key gets `limit` requests per UTC day.
/// Counters live in memory and reset on restart.
#[derive(Clone)]
pub struct DailyRateLimiter {
    limit: u32,
    counters: Arc<Mutex<HashMap<String, (NaiveDate, u32)>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Exceeded,
}

impl DailyRateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one request for `key` on `today`.
    pub fn check(&self, key: &str, today: NaiveDate) -> RateDecision {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = counters.entry(key.to_string()).or_insert((today, 0));
        if entry.0 != today {
            *entry = (today, 0);
        }

        if entry.1 >= self.limit {
            return RateDecision::Exceeded;
        }

        entry.1 += 1;
        RateDecision::Allowed {
            remaining: self.limit - entry.1,
        }
    }
}
