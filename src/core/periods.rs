use thiserror::Error;

use super::types::{BoundaryOneOff, MonthlyExpenseBucket, Period, PeriodKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("period {index} starts at month {found}, expected {expected}")]
    Gap {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("period {index} ends before it starts")]
    Inverted { index: usize },
    #[error("periods cover {covered} months of a {horizon}-month horizon")]
    Coverage { covered: usize, horizon: usize },
    #[error("only the last period may be final")]
    MisplacedFinal,
}

pub fn one_off_boundaries(buckets: &[MonthlyExpenseBucket]) -> Vec<usize> {
    buckets
        .iter()
        .filter(|bucket| bucket.has_one_off && bucket.month_index > 0)
        .map(|bucket| bucket.month_index)
        .collect()
}

/// Splits the horizon into preparation periods ending the month before each
/// one-off boundary, followed by one final period. Rates are left at zero.
pub fn partition(buckets: &[MonthlyExpenseBucket]) -> Vec<Period> {
    let horizon = buckets.len();
    if horizon == 0 {
        return Vec::new();
    }

    let mut periods = Vec::new();
    let mut start = 0;
    for boundary in one_off_boundaries(buckets) {
        periods.push(Period {
            index: periods.len(),
            start,
            end: boundary - 1,
            kind: PeriodKind::Preparation,
            rate: 0.0,
            boundary_one_off: Some(BoundaryOneOff {
                month: boundary,
                amount: buckets[boundary].one_off_total,
            }),
            entering_balance: 0.0,
            required_end_balance: 0.0,
        });
        start = boundary;
    }
    periods.push(Period {
        index: periods.len(),
        start,
        end: horizon - 1,
        kind: PeriodKind::Final,
        rate: 0.0,
        boundary_one_off: None,
        entering_balance: 0.0,
        required_end_balance: 0.0,
    });
    periods
}

pub fn check_cover(periods: &[Period], horizon: usize) -> Result<(), PartitionError> {
    let mut expected = 0;
    for (index, period) in periods.iter().enumerate() {
        if period.start != expected {
            return Err(PartitionError::Gap {
                index,
                expected,
                found: period.start,
            });
        }
        if period.end < period.start {
            return Err(PartitionError::Inverted { index });
        }
        if period.kind == PeriodKind::Final && index + 1 != periods.len() {
            return Err(PartitionError::MisplacedFinal);
        }
        expected = period.end + 1;
    }
    if expected != horizon {
        return Err(PartitionError::Coverage {
            covered: expected,
            horizon,
        });
    }
    Ok(())
}
