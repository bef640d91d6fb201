use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::engine::Projection;
use super::types::{Expense, ProjectionParameters, Recurrence, ValidityWindow};

#[derive(Serialize)]
struct ExpenseFingerprint<'a> {
    description: &'a str,
    amount: f64,
    recurrence: &'a Recurrence,
    validity: &'a ValidityWindow,
}

#[derive(Serialize)]
struct Fingerprint<'a> {
    expenses: Vec<ExpenseFingerprint<'a>>,
    parameters: &'a ProjectionParameters,
}

/// Stable, value-based key for a projection request. Expense ids and
/// categories do not influence the ledger and are left out.
pub fn fingerprint(expenses: &[Expense], parameters: &ProjectionParameters) -> String {
    let value = Fingerprint {
        expenses: expenses
            .iter()
            .map(|expense| ExpenseFingerprint {
                description: expense.display_name(),
                amount: expense.effective_amount(),
                recurrence: &expense.recurrence,
                validity: &expense.validity,
            })
            .collect(),
        parameters,
    };
    let encoded = serde_json::to_vec(&value).unwrap_or_else(|_| {
        format!("{:?}|{:?}", expenses, parameters).into_bytes()
    });
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Arc<Projection>>,
    order: VecDeque<String>,
}

pub struct ProjectionCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ProjectionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the cached projection for `key`, computing and storing it on a
    /// miss. The lock is held across `compute` so concurrent callers with the
    /// same key compute once.
    pub fn get_or_compute<F>(&self, key: String, compute: F) -> Arc<Projection>
    where
        F: FnOnce() -> Projection,
    {
        let short_key = key.get(..12).unwrap_or(&key);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = state.entries.get(&key) {
            debug!(key = short_key, "projection cache hit");
            return Arc::clone(hit);
        }

        debug!(key = short_key, "projection cache miss");
        let projection = Arc::new(compute());
        while state.entries.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }
        state.order.push_back(key.clone());
        state.entries.insert(key, Arc::clone(&projection));
        projection
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.clear();
        state.order.clear();
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::run_projection;
    use crate::core::types::EnginePolicy;
    use chrono::NaiveDate;

    fn parameters(target_balance: f64) -> ProjectionParameters {
        ProjectionParameters {
            starting_balance: 1_000.0,
            target_balance,
            horizon_months: 12,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date"),
        }
    }

    fn projection() -> Projection {
        run_projection(&[], &parameters(500.0), &EnginePolicy::default())
    }

    #[test]
    fn fingerprint_ignores_ids_but_not_amounts() {
        let expenses = vec![Expense::monthly("a", "Gym", 30.0)];
        let renamed = vec![Expense::monthly("b", "Gym", 30.0).with_category("Sport")];
        let pricier = vec![Expense::monthly("a", "Gym", 35.0)];

        let base = fingerprint(&expenses, &parameters(500.0));
        assert_eq!(base.len(), 64);
        assert_eq!(base, fingerprint(&renamed, &parameters(500.0)));
        assert_ne!(base, fingerprint(&pricier, &parameters(500.0)));
        assert_ne!(base, fingerprint(&expenses, &parameters(600.0)));
    }

    #[test]
    fn get_or_compute_only_computes_on_miss() {
        let cache = ProjectionCache::new(4);
        let mut calls = 0;
        let first = cache.get_or_compute("k".to_string(), || {
            calls += 1;
            projection()
        });
        let second = cache.get_or_compute("k".to_string(), || {
            calls += 1;
            projection()
        });
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn non_ascii_keys_are_accepted() {
        let cache = ProjectionCache::new(2);
        let key = "Überweisun€g-Miete".to_string();
        let first = cache.get_or_compute(key.clone(), projection);
        let second = cache.get_or_compute(key, projection);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let cache = ProjectionCache::new(2);
        for key in ["a", "b", "c"] {
            cache.get_or_compute(key.to_string(), projection);
        }
        assert_eq!(cache.len(), 2);

        let mut recomputed = false;
        cache.get_or_compute("a".to_string(), || {
            recomputed = true;
            projection()
        });
        assert!(recomputed);

        cache.clear();
        assert!(cache.is_empty());
    }
}
