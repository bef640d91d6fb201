use serde::Serialize;
use tracing::debug;

use super::types::{EnginePolicy, MonthlyExpenseBucket, Period, PeriodKind};

pub const VERIFY_ITERATION_CAP: usize = 200;

const BALANCE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub months_checked: usize,
    pub min_balance: f64,
    pub min_balance_month: Option<usize>,
    pub first_violation: Option<usize>,
    pub final_balance: f64,
}

impl Verification {
    pub fn is_violated(&self) -> bool {
        self.first_violation.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    pub violating_month: usize,
    pub violating_period: usize,
    pub shortfall: f64,
    pub top_up: f64,
    pub adjusted_periods: usize,
}

// NaN counts as below.
pub(crate) fn is_below(balance: f64, target: f64) -> bool {
    !(balance >= target - BALANCE_TOLERANCE)
}

fn safety_margin(
    kind: PeriodKind,
    window: &[MonthlyExpenseBucket],
    one_off_amount: f64,
    target: f64,
    policy: &EnginePolicy,
) -> f64 {
    match kind {
        PeriodKind::Preparation => target
            .max(one_off_amount * policy.one_off_margin_ratio)
            .max(policy.safety_margin_floor),
        PeriodKind::Final => {
            let months = window.len().max(1) as f64;
            let total: f64 = window.iter().map(|b| b.total).sum();
            let largest = window.iter().map(|b| b.total).fold(0.0, f64::max);
            target
                .max(policy.final_average_multiplier * total / months)
                .max(policy.final_max_multiplier * largest)
                .max(policy.safety_margin_floor)
        }
    }
}

pub fn required_end_balance(
    period: &Period,
    buckets: &[MonthlyExpenseBucket],
    target: f64,
    policy: &EnginePolicy,
) -> f64 {
    let window = &buckets[period.start..=period.end];
    let one_off_amount = period.boundary_one_off.map_or(0.0, |b| b.amount);
    let margin = safety_margin(period.kind, window, one_off_amount, target, policy);
    match period.kind {
        PeriodKind::Preparation => one_off_amount + target + margin,
        PeriodKind::Final => target + margin,
    }
}

/// Solves one constant monthly rate per period, front to back, carrying the
/// simulated balance into the next period. One algebraic step per period.
pub fn solve_rates(
    periods: &mut [Period],
    buckets: &[MonthlyExpenseBucket],
    starting_balance: f64,
    target: f64,
    policy: &EnginePolicy,
) {
    let mut balance = starting_balance;
    for period in periods.iter_mut() {
        let window = &buckets[period.start..=period.end];
        let period_expenses: f64 = window.iter().map(|b| b.total).sum();
        let months = period.len() as f64;
        let required = required_end_balance(period, buckets, target, policy);
        let rate = ((required - balance + period_expenses) / months).max(policy.min_rate_floor);

        period.entering_balance = balance;
        period.required_end_balance = required;
        period.rate = rate;
        for bucket in window {
            balance = balance + rate - bucket.total;
        }

        debug!(
            period = period.index,
            start = period.start,
            end = period.end,
            kind = ?period.kind,
            rate,
            required,
            "solved period rate"
        );
    }
}

pub fn monthly_rates(periods: &[Period]) -> Vec<(usize, f64)> {
    periods
        .iter()
        .flat_map(|period| std::iter::repeat_n((period.index, period.rate), period.len()))
        .collect()
}

pub fn verify(
    periods: &[Period],
    buckets: &[MonthlyExpenseBucket],
    starting_balance: f64,
    target: f64,
) -> Verification {
    let rates = monthly_rates(periods);
    let mut balance = starting_balance;
    let mut min_balance = starting_balance;
    let mut min_balance_month = None;
    let mut first_violation = None;
    let mut months_checked = 0;

    for (month, (bucket, (_, rate))) in buckets
        .iter()
        .zip(rates.iter())
        .take(VERIFY_ITERATION_CAP)
        .enumerate()
    {
        balance = balance + rate - bucket.total;
        months_checked += 1;
        if min_balance_month.is_none() || balance < min_balance {
            min_balance = balance;
            min_balance_month = Some(month);
        }
        if first_violation.is_none() && is_below(balance, target) {
            first_violation = Some(month);
        }
    }

    Verification {
        months_checked,
        min_balance,
        min_balance_month,
        first_violation,
        final_balance: balance,
    }
}

/// One additive top-up for the period owning the first violation and every
/// period before it. Never re-verifies.
pub fn apply_single_correction(
    periods: &mut [Period],
    verification: &Verification,
    target: f64,
    policy: &EnginePolicy,
) -> Option<Correction> {
    let violating_month = verification.first_violation?;
    let violating_period = periods.iter().position(|p| p.contains(violating_month))?;

    let shortfall = (target - verification.min_balance).max(0.0);
    let length = periods[violating_period].len() as f64;
    let top_up = (2.0 * shortfall / length).ceil() + policy.correction_buffer;

    for period in periods.iter_mut().take(violating_period + 1) {
        period.rate += top_up;
    }

    debug!(
        violating_month,
        violating_period, shortfall, top_up, "applied single correction pass"
    );
    Some(Correction {
        violating_month,
        violating_period,
        shortfall,
        top_up,
        adjusted_periods: violating_period + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::periods::partition;
    use chrono::NaiveDate;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn buckets(totals: &[(f64, bool)]) -> Vec<MonthlyExpenseBucket> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date");
        totals
            .iter()
            .enumerate()
            .map(|(month_index, &(total, one_off))| MonthlyExpenseBucket {
                month_index,
                month_start: start,
                total,
                one_off_total: if one_off { total } else { 0.0 },
                recurring_total: if one_off { 0.0 } else { total },
                has_one_off: one_off && total > 0.0,
                has_recurring: !one_off && total > 0.0,
                descriptions: Vec::new(),
            })
            .collect()
    }

    fn single_one_off_buckets() -> Vec<MonthlyExpenseBucket> {
        let mut totals = vec![(0.0, false); 12];
        totals[5] = (11_000.0, true);
        buckets(&totals)
    }

    #[test]
    fn preparation_period_targets_one_off_plus_target_plus_margin() {
        let policy = EnginePolicy::default();
        let b = single_one_off_buckets();
        let mut periods = partition(&b);
        solve_rates(&mut periods, &b, 3_100.57, 1_000.0, &policy);

        assert_eq!(periods.len(), 2);
        assert_approx(periods[0].required_end_balance, 13_000.0);
        assert_approx(periods[0].rate, (13_000.0 - 3_100.57) / 5.0);
        assert_approx(periods[1].entering_balance, 13_000.0);
        // final margin is 1.5 x the 11k month
        assert_approx(periods[1].required_end_balance, 1_000.0 + 16_500.0);
        assert_approx(periods[1].rate, (17_500.0 - 13_000.0 + 11_000.0) / 7.0);
    }

    #[test]
    fn rate_never_drops_below_floor_when_overfunded() {
        let policy = EnginePolicy::default();
        let b = buckets(&[(0.0, false); 12]);
        let mut periods = partition(&b);
        solve_rates(&mut periods, &b, 1_000_000.0, 1_000.0, &policy);
        assert_approx(periods[0].rate, policy.min_rate_floor);
    }

    #[test]
    fn verify_reports_first_violation_and_minimum() {
        let b = buckets(&[(0.0, false), (500.0, false), (0.0, false)]);
        let mut periods = partition(&b);
        periods[0].rate = 100.0;
        let verification = verify(&periods, &b, 1_000.0, 900.0);
        assert_eq!(verification.months_checked, 3);
        assert_approx(verification.min_balance, 700.0);
        assert_eq!(verification.min_balance_month, Some(1));
        assert_eq!(verification.first_violation, Some(1));
        assert_approx(verification.final_balance, 800.0);
    }

    #[test]
    fn nan_balance_is_a_violation() {
        assert!(is_below(f64::NAN, 500.0));
        assert!(!is_below(500.0, 500.0));
        let b = buckets(&[(f64::NAN, false), (0.0, false)]);
        let mut periods = partition(&b);
        periods[0].rate = 100.0;
        let verification = verify(&periods, &b, 1_000.0, 500.0);
        assert_eq!(verification.first_violation, Some(0));
    }

    #[test]
    fn verify_is_capped() {
        let b = buckets(&vec![(0.0, false); VERIFY_ITERATION_CAP + 50]);
        let periods = partition(&b);
        let verification = verify(&periods, &b, 0.0, 0.0);
        assert_eq!(verification.months_checked, VERIFY_ITERATION_CAP);
    }

    #[test]
    fn correction_tops_up_violating_and_earlier_periods_only() {
        let policy = EnginePolicy::default();
        let mut totals = vec![(0.0, false); 12];
        totals[4] = (1_000.0, true);
        totals[8] = (1_000.0, true);
        let b = buckets(&totals);
        let mut periods = partition(&b);
        for period in periods.iter_mut() {
            period.rate = 100.0;
        }
        let verification = Verification {
            months_checked: 12,
            min_balance: 400.0,
            min_balance_month: Some(5),
            first_violation: Some(5),
            final_balance: 900.0,
        };

        let correction =
            apply_single_correction(&mut periods, &verification, 1_000.0, &policy).expect("fires");
        // period 1 spans months 4..=7
        assert_eq!(correction.violating_period, 1);
        assert_approx(correction.shortfall, 600.0);
        assert_approx(correction.top_up, 300.0 + policy.correction_buffer);
        assert_approx(periods[0].rate, 450.0);
        assert_approx(periods[1].rate, 450.0);
        assert_approx(periods[2].rate, 100.0);
    }

    #[test]
    fn correction_does_nothing_without_violation() {
        let b = buckets(&[(0.0, false); 6]);
        let mut periods = partition(&b);
        let verification = verify(&periods, &b, 5_000.0, 1_000.0);
        assert!(!verification.is_violated());
        assert!(
            apply_single_correction(&mut periods, &verification, 1_000.0, &EnginePolicy::default())
                .is_none()
        );
    }

    #[test]
    fn starting_below_target_glides_up_and_is_corrected_once() {
        let policy = EnginePolicy::default();
        let b = buckets(&[(0.0, false); 12]);
        let mut periods = partition(&b);
        solve_rates(&mut periods, &b, 1_000.0, 2_500.0, &policy);
        assert_approx(periods[0].rate, 4_000.0 / 12.0);

        let verification = verify(&periods, &b, 1_000.0, 2_500.0);
        assert_eq!(verification.first_violation, Some(0));
        let correction =
            apply_single_correction(&mut periods, &verification, 2_500.0, &policy).expect("fires");
        assert_approx(correction.top_up, (2.0_f64 * (2_500.0 - 4_000.0 / 3.0) / 12.0).ceil() + 50.0);
        assert!(periods[0].rate > 4_000.0 / 12.0);
    }
}
