use chrono::{Datelike, NaiveDate};
use tracing::debug;

use super::dates::{add_months, month_offset, month_start};
use super::types::{
    DayMonth, EnginePolicy, Expense, MonthlyExpenseBucket, OneOffDue, Recurrence, RecurrenceKind,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Horizon {
    pub reference: NaiveDate,
    pub start: NaiveDate,
    pub months: u32,
}

impl Horizon {
    pub fn new(reference: NaiveDate, months: u32) -> Self {
        Self {
            reference,
            start: month_start(reference),
            months,
        }
    }

    pub fn end(&self) -> NaiveDate {
        add_months(self.start, self.months)
    }

    pub fn month_index(&self, date: NaiveDate) -> Option<usize> {
        let offset = month_offset(self.start, date);
        (0..self.months as i64)
            .contains(&offset)
            .then_some(offset as usize)
    }

    fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start.year()..=self.end().year()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub amount: f64,
    pub kind: RecurrenceKind,
    pub description: String,
}

pub fn expand_expense(expense: &Expense, horizon: &Horizon, policy: &EnginePolicy) -> Vec<Occurrence> {
    if horizon.months == 0 || expense.validity.is_inverted() {
        return Vec::new();
    }

    let amount = expense.effective_amount();
    let dates: Vec<(NaiveDate, f64)> = match &expense.recurrence {
        Recurrence::Monthly { day_of_month } => (0..horizon.months)
            .filter_map(|offset| {
                let month = add_months(horizon.start, offset);
                let point = DayMonth {
                    day: (*day_of_month).clamp(1, 31),
                    month: month.month(),
                };
                point.in_year(month.year()).map(|date| (date, amount))
            })
            .collect(),
        Recurrence::Annual { on } => horizon
            .years()
            .filter_map(|year| on.in_year(year).map(|date| (date, amount)))
            .collect(),
        Recurrence::Irregular { dates } => {
            if dates.is_empty() {
                return Vec::new();
            }
            let share = amount / dates.len() as f64;
            horizon
                .years()
                .flat_map(|year| {
                    dates
                        .iter()
                        .filter_map(move |point| point.in_year(year).map(|date| (date, share)))
                })
                .collect()
        }
        Recurrence::OneOff { due } => {
            let date = match due {
                OneOffDue::Date(date) => Some(*date),
                OneOffDue::DayMonth(point) => point.next_on_or_after(horizon.reference),
                OneOffDue::Unscheduled => Some(add_months(
                    horizon.start,
                    policy.fallback_one_off_offset_months,
                )),
            };
            date.map(|date| (date, amount)).into_iter().collect()
        }
    };

    let kind = expense.recurrence.kind();
    dates
        .into_iter()
        .filter(|(date, _)| horizon.month_index(*date).is_some() && expense.validity.contains(*date))
        .map(|(date, amount)| Occurrence {
            date,
            amount,
            kind,
            description: expense.display_name().to_string(),
        })
        .collect()
}

pub fn expand_all(expenses: &[Expense], horizon: &Horizon, policy: &EnginePolicy) -> Vec<Occurrence> {
    let occurrences: Vec<Occurrence> = expenses
        .iter()
        .flat_map(|expense| expand_expense(expense, horizon, policy))
        .collect();
    debug!(
        expenses = expenses.len(),
        occurrences = occurrences.len(),
        "expanded expense schedules"
    );
    occurrences
}

pub fn bucketize(occurrences: &[Occurrence], horizon: &Horizon) -> Vec<MonthlyExpenseBucket> {
    let mut buckets: Vec<MonthlyExpenseBucket> = (0..horizon.months)
        .map(|offset| MonthlyExpenseBucket {
            month_index: offset as usize,
            month_start: add_months(horizon.start, offset),
            total: 0.0,
            one_off_total: 0.0,
            recurring_total: 0.0,
            has_one_off: false,
            has_recurring: false,
            descriptions: Vec::new(),
        })
        .collect();

    for occurrence in occurrences {
        let Some(bucket) = horizon
            .month_index(occurrence.date)
            .and_then(|index| buckets.get_mut(index))
        else {
            continue;
        };
        bucket.total += occurrence.amount;
        if occurrence.kind.is_one_off() {
            bucket.one_off_total += occurrence.amount;
            bucket.has_one_off = true;
        } else {
            bucket.recurring_total += occurrence.amount;
            bucket.has_recurring = true;
        }
        bucket.descriptions.push(occurrence.description.clone());
    }

    buckets
}
