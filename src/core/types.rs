use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::solver::VERIFY_ITERATION_CAP;

/// Largest amount or balance the engine works with. Sums over a capped
/// horizon stay finite below this bound.
pub const MAX_AMOUNT: f64 = 1e12;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub struct DayMonth {
    pub day: u32,
    pub month: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RecurrenceKind {
    Monthly,
    Annual,
    Irregular,
    OneOff,
}

impl RecurrenceKind {
    pub fn is_one_off(self) -> bool {
        matches!(self, RecurrenceKind::OneOff)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum OneOffDue {
    Date(NaiveDate),
    DayMonth(DayMonth),
    /// No usable date was supplied; scheduled on the fallback date.
    Unscheduled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Recurrence {
    Monthly { day_of_month: u32 },
    Annual { on: DayMonth },
    // amount is split evenly across the dates of each year
    Irregular { dates: Vec<DayMonth> },
    OneOff { due: OneOffDue },
}

impl Recurrence {
    pub fn kind(&self) -> RecurrenceKind {
        match self {
            Recurrence::Monthly { .. } => RecurrenceKind::Monthly,
            Recurrence::Annual { .. } => RecurrenceKind::Annual,
            Recurrence::Irregular { .. } => RecurrenceKind::Irregular,
            Recurrence::OneOff { .. } => RecurrenceKind::OneOff,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidityWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ValidityWindow {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn is_inverted(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expense {
    pub id: String,
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub recurrence: Recurrence,
    pub validity: ValidityWindow,
}

impl Expense {
    pub fn new(id: impl Into<String>, description: impl Into<String>, amount: f64, recurrence: Recurrence) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            description: description.into(),
            amount,
            recurrence,
            validity: ValidityWindow::default(),
        }
    }

    pub fn monthly(id: impl Into<String>, description: impl Into<String>, amount: f64) -> Self {
        Self::new(id, description, amount, Recurrence::Monthly { day_of_month: 1 })
    }

    pub fn annual(id: impl Into<String>, description: impl Into<String>, amount: f64, on: DayMonth) -> Self {
        Self::new(id, description, amount, Recurrence::Annual { on })
    }

    pub fn one_off(id: impl Into<String>, description: impl Into<String>, amount: f64, date: NaiveDate) -> Self {
        Self::new(
            id,
            description,
            amount,
            Recurrence::OneOff {
                due: OneOffDue::Date(date),
            },
        )
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_validity(mut self, validity: ValidityWindow) -> Self {
        self.validity = validity;
        self
    }

    pub fn effective_amount(&self) -> f64 {
        if self.amount.is_finite() {
            self.amount.clamp(0.0, MAX_AMOUNT)
        } else {
            0.0
        }
    }

    pub fn display_name(&self) -> &str {
        if !self.description.trim().is_empty() {
            &self.description
        } else if !self.category.trim().is_empty() {
            &self.category
        } else {
            &self.id
        }
    }
}

/// Policy constants of the solver. Loop bounds derive from these, so
/// [`EnginePolicy::sanitized`] clamps them before use.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnginePolicy {
    pub horizon_cap_months: u32,
    pub min_rate_floor: f64,
    pub safety_margin_floor: f64,
    pub default_target_floor: f64,
    pub default_target_ratio: f64,
    pub one_off_margin_ratio: f64,
    pub final_average_multiplier: f64,
    pub final_max_multiplier: f64,
    pub correction_buffer: f64,
    pub fallback_one_off_offset_months: u32,
    pub cache_capacity: usize,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            horizon_cap_months: 60,
            min_rate_floor: 50.0,
            safety_margin_floor: 200.0,
            default_target_floor: 500.0,
            default_target_ratio: 0.10,
            one_off_margin_ratio: 0.05,
            final_average_multiplier: 2.0,
            final_max_multiplier: 1.5,
            correction_buffer: 50.0,
            fallback_one_off_offset_months: 12,
            cache_capacity: 64,
        }
    }
}

impl EnginePolicy {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let finite_or = |value: f64, fallback: f64| {
            if value.is_finite() && value >= 0.0 {
                value
            } else {
                fallback
            }
        };
        Self {
            horizon_cap_months: self.horizon_cap_months.min(VERIFY_ITERATION_CAP as u32),
            min_rate_floor: finite_or(self.min_rate_floor, defaults.min_rate_floor),
            safety_margin_floor: finite_or(self.safety_margin_floor, defaults.safety_margin_floor),
            default_target_floor: finite_or(self.default_target_floor, defaults.default_target_floor)
                .max(f64::EPSILON),
            default_target_ratio: finite_or(self.default_target_ratio, defaults.default_target_ratio),
            one_off_margin_ratio: finite_or(self.one_off_margin_ratio, defaults.one_off_margin_ratio),
            final_average_multiplier: finite_or(
                self.final_average_multiplier,
                defaults.final_average_multiplier,
            ),
            final_max_multiplier: finite_or(self.final_max_multiplier, defaults.final_max_multiplier),
            correction_buffer: finite_or(self.correction_buffer, defaults.correction_buffer),
            fallback_one_off_offset_months: self.fallback_one_off_offset_months,
            cache_capacity: self.cache_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionParameters {
    pub starting_balance: f64,
    pub target_balance: f64,
    pub horizon_months: u32,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyExpenseBucket {
    pub month_index: usize,
    pub month_start: NaiveDate,
    pub total: f64,
    pub one_off_total: f64,
    pub recurring_total: f64,
    pub has_one_off: bool,
    pub has_recurring: bool,
    pub descriptions: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodKind {
    Preparation,
    Final,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryOneOff {
    pub month: usize,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub index: usize,
    pub start: usize,
    // inclusive
    pub end: usize,
    pub kind: PeriodKind,
    pub rate: f64,
    pub boundary_one_off: Option<BoundaryOneOff>,
    pub entering_balance: f64,
    pub required_end_balance: f64,
}

impl Period {
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn contains(&self, month: usize) -> bool {
        (self.start..=self.end).contains(&month)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub month_index: usize,
    pub label: String,
    pub start_balance: f64,
    pub monthly_saving: f64,
    pub expense_descriptions: Vec<String>,
    pub total_expenses: f64,
    pub end_balance: f64,
    pub has_one_off: bool,
    pub has_recurring: bool,
    pub below_target: bool,
    pub period_index: usize,
}
