//! Static Key Gate
//!
//! In-process [`AccessGate`] backed by the configured API key list and an
//! optional per-key daily call ceiling. Counters roll over at UTC midnight.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

use crate::application::ports::{AccessGate, GateError};
use crate::infrastructure::config::ApiKeys;

#[derive(Debug, Clone, Copy)]
struct Usage {
    day: NaiveDate,
    calls: u64,
}

/// Gate over a fixed key set.
#[derive(Debug)]
pub struct StaticKeyGate {
    keys: ApiKeys,
    daily_limit: Option<u64>,
    usage: Mutex<HashMap<String, Usage>>,
}

impl StaticKeyGate {
    /// Accept `keys`, allowing at most `daily_limit` calls per key per day.
    #[must_use]
    pub fn new(keys: ApiKeys, daily_limit: Option<u64>) -> Self {
        Self {
            keys,
            daily_limit,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Calls recorded today for `api_key`.
    #[must_use]
    pub fn calls_today(&self, api_key: &str) -> u64 {
        let today = Utc::now().date_naive();
        self.usage
            .lock()
            .get(api_key)
            .filter(|usage| usage.day == today)
            .map_or(0, |usage| usage.calls)
    }

    fn record_on(&self, api_key: &str, day: NaiveDate) -> Result<(), GateError> {
        let mut usage = self.usage.lock();
        let entry = usage
            .entry(api_key.to_string())
            .or_insert(Usage { day, calls: 0 });
        if entry.day != day {
            *entry = Usage { day, calls: 0 };
        }

        match self.daily_limit {
            Some(limit) if entry.calls >= limit => {
                return Err(GateError::QuotaExceeded { limit });
            }
            _ => {}
        }

        entry.calls += 1;
        Ok(())
    }
}

#[async_trait]
impl AccessGate for StaticKeyGate {
    async fn verify(&self, api_key: &str) -> Result<bool, GateError> {
        Ok(self.keys.contains(api_key))
    }

    async fn record_call(&self, api_key: &str) -> Result<(), GateError> {
        self.record_on(api_key, Utc::now().date_naive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(limit: Option<u64>) -> StaticKeyGate {
        StaticKeyGate::new(ApiKeys::parse("alpha,beta"), limit)
    }

    #[tokio::test]
    async fn verify_checks_membership() {
        let gate = gate(None);
        assert!(gate.verify("alpha").await.unwrap());
        assert!(!gate.verify("gamma").await.unwrap());
        assert!(!gate.verify("").await.unwrap());
    }

    #[tokio::test]
    async fn unlimited_gate_counts_calls() {
        let gate = gate(None);
        for _ in 0..5 {
            gate.record_call("alpha").await.unwrap();
        }
        assert_eq!(gate.calls_today("alpha"), 5);
        assert_eq!(gate.calls_today("beta"), 0);
    }

    #[tokio::test]
    async fn ceiling_is_per_key() {
        let gate = gate(Some(2));
        gate.record_call("alpha").await.unwrap();
        gate.record_call("alpha").await.unwrap();
        assert_eq!(
            gate.record_call("alpha").await,
            Err(GateError::QuotaExceeded { limit: 2 })
        );
        assert!(gate.record_call("beta").await.is_ok());
        assert_eq!(gate.calls_today("alpha"), 2);
    }

    #[test]
    fn counters_roll_over_daily() {
        let gate = gate(Some(1));
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        gate.record_on("alpha", monday).unwrap();
        assert!(gate.record_on("alpha", monday).is_err());
        assert!(gate.record_on("alpha", tuesday).is_ok());
    }
}
