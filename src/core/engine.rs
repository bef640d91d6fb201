use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cache::{ProjectionCache, fingerprint};
use super::dates::month_label;
use super::periods::{check_cover, partition};
use super::schedule::{Horizon, bucketize, expand_all};
use super::solver::{
    Correction, Verification, apply_single_correction, is_below, monthly_rates, solve_rates,
    verify,
};
use super::types::{
    EnginePolicy, Expense, LedgerEntry, MAX_AMOUNT, MonthlyExpenseBucket, Period,
    ProjectionParameters,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub parameters: ProjectionParameters,
    pub periods: Vec<Period>,
    pub verification: Verification,
    pub correction: Option<Correction>,
    pub ledger: Vec<LedgerEntry>,
}

impl Projection {
    pub fn first_period_rate(&self) -> f64 {
        self.periods.first().map_or(0.0, |p| p.rate)
    }

    pub fn months_below_target(&self) -> usize {
        self.ledger.iter().filter(|e| e.below_target).count()
    }

    pub fn lowest_balance(&self) -> Option<f64> {
        self.ledger.iter().map(|e| e.end_balance).reduce(f64::min)
    }

    pub fn terminal_balance(&self) -> Option<f64> {
        self.ledger.last().map(|e| e.end_balance)
    }
}

/// Target balance actually used: values `<= 0` (or non-finite) fall back to
/// a share of the starting balance, never below the policy floor.
pub fn resolve_target(starting_balance: f64, target_balance: f64, policy: &EnginePolicy) -> f64 {
    if target_balance.is_finite() && target_balance > 0.0 {
        return target_balance.min(MAX_AMOUNT);
    }
    let share = if starting_balance.is_finite() {
        starting_balance * policy.default_target_ratio
    } else {
        0.0
    };
    share.clamp(policy.default_target_floor, MAX_AMOUNT.max(policy.default_target_floor))
}

pub fn horizon_months(adjustment_cycle_years: i32, policy: &EnginePolicy) -> u32 {
    if adjustment_cycle_years <= 0 {
        return 0;
    }
    (adjustment_cycle_years as i64 * 12).min(policy.horizon_cap_months as i64) as u32
}

fn normalize(parameters: &ProjectionParameters, policy: &EnginePolicy) -> ProjectionParameters {
    let starting_balance = if parameters.starting_balance.is_finite() {
        parameters.starting_balance.clamp(-MAX_AMOUNT, MAX_AMOUNT)
    } else {
        warn!(
            "starting balance {} is not finite; using 0",
            parameters.starting_balance
        );
        0.0
    };
    ProjectionParameters {
        starting_balance,
        target_balance: resolve_target(starting_balance, parameters.target_balance, policy),
        horizon_months: parameters.horizon_months.min(policy.horizon_cap_months),
        start_date: parameters.start_date,
    }
}

pub fn build_ledger(
    periods: &[Period],
    buckets: &[MonthlyExpenseBucket],
    starting_balance: f64,
    target_balance: f64,
) -> Vec<LedgerEntry> {
    let mut balance = starting_balance;
    buckets
        .iter()
        .zip(monthly_rates(periods))
        .map(|(bucket, (period_index, rate))| {
            let start_balance = balance;
            let end_balance = start_balance + rate - bucket.total;
            balance = end_balance;
            LedgerEntry {
                month_index: bucket.month_index,
                label: month_label(bucket.month_start),
                start_balance,
                monthly_saving: rate,
                expense_descriptions: bucket.descriptions.clone(),
                total_expenses: bucket.total,
                end_balance,
                has_one_off: bucket.has_one_off,
                has_recurring: bucket.has_recurring,
                below_target: is_below(end_balance, target_balance),
                period_index,
            }
        })
        .collect()
}

pub fn run_projection(
    expenses: &[Expense],
    parameters: &ProjectionParameters,
    policy: &EnginePolicy,
) -> Projection {
    let parameters = normalize(parameters, policy);
    let start = parameters.starting_balance;
    let target = parameters.target_balance;

    let horizon = Horizon::new(parameters.start_date, parameters.horizon_months);
    let occurrences = expand_all(expenses, &horizon, policy);
    let buckets = bucketize(&occurrences, &horizon);

    let mut periods = partition(&buckets);
    debug_assert_eq!(check_cover(&periods, buckets.len()), Ok(()));
    solve_rates(&mut periods, &buckets, start, target, policy);

    let verification = verify(&periods, &buckets, start, target);
    let correction = apply_single_correction(&mut periods, &verification, target, policy);
    let ledger = build_ledger(&periods, &buckets, start, target);

    let projection = Projection {
        parameters,
        periods,
        verification,
        correction,
        ledger,
    };

    let below = projection.months_below_target();
    if below > 0 {
        warn!(
            months_below_target = below,
            first_month = ?projection.ledger.iter().position(|e| e.below_target),
            target,
            "projection stays below target after correction pass"
        );
    }
    debug!(
        months = projection.ledger.len(),
        periods = projection.periods.len(),
        corrected = projection.correction.is_some(),
        "projection complete"
    );
    projection
}

pub struct ProjectionEngine {
    policy: EnginePolicy,
    cache: ProjectionCache,
}

impl Default for ProjectionEngine {
    fn default() -> Self {
        Self::new(EnginePolicy::default())
    }
}

impl ProjectionEngine {
    pub fn new(policy: EnginePolicy) -> Self {
        let policy = policy.sanitized();
        info!(
            horizon_cap_months = policy.horizon_cap_months,
            cache_capacity = policy.cache_capacity,
            "projection engine ready"
        );
        Self {
            cache: ProjectionCache::new(policy.cache_capacity),
            policy,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn parameters(
        &self,
        starting_balance: f64,
        target_balance: f64,
        adjustment_cycle_years: i32,
        start_date: NaiveDate,
    ) -> ProjectionParameters {
        normalize(
            &ProjectionParameters {
                starting_balance,
                target_balance,
                horizon_months: horizon_months(adjustment_cycle_years, &self.policy),
                start_date,
            },
            &self.policy,
        )
    }

    pub fn project(
        &self,
        expenses: &[Expense],
        starting_balance: f64,
        target_balance: f64,
        adjustment_cycle_years: i32,
    ) -> Vec<LedgerEntry> {
        let parameters = self.parameters(
            starting_balance,
            target_balance,
            adjustment_cycle_years,
            Local::now().date_naive(),
        );
        self.project_at(expenses, &parameters).ledger.clone()
    }

    pub fn project_at(&self, expenses: &[Expense], parameters: &ProjectionParameters) -> Arc<Projection> {
        let parameters = normalize(parameters, &self.policy);
        let key = fingerprint(expenses, &parameters);
        self.cache
            .get_or_compute(key, || run_projection(expenses, &parameters, &self.policy))
    }

    pub fn first_period_rate(
        &self,
        expenses: &[Expense],
        starting_balance: f64,
        target_balance: f64,
        adjustment_cycle_years: i32,
    ) -> f64 {
        let parameters = self.parameters(
            starting_balance,
            target_balance,
            adjustment_cycle_years,
            Local::now().date_naive(),
        );
        self.first_period_rate_at(expenses, &parameters)
    }

    pub fn first_period_rate_at(&self, expenses: &[Expense], parameters: &ProjectionParameters) -> f64 {
        self.project_at(expenses, parameters).first_period_rate()
    }

    pub fn clear_cache(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!(dropped, "projection cache cleared");
    }

    pub fn cached_projections(&self) -> usize {
        self.cache.len()
    }
}
