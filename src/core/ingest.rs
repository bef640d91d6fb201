use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::dates::{parse_date, parse_day_month};
use super::types::{DayMonth, Expense, OneOffDue, Recurrence, RecurrenceKind, ValidityWindow};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmountParseError {
    #[error("amount is empty")]
    Empty,
    #[error("amount is not a number: {0:?}")]
    Invalid(String),
    #[error("amount must be finite and non-negative, got {0}")]
    OutOfRange(f64),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Number(f64),
    Text(String),
}

impl Default for AmountField {
    fn default() -> Self {
        AmountField::Number(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseRecord {
    pub id: String,
    pub category: String,
    pub description: String,
    pub amount: AmountField,
    pub recurrence: Option<String>,
    pub due_date: Option<String>,
    pub schedule_dates: Vec<String>,
    pub day_of_month: Option<u32>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

pub fn parse_recurrence_kind(raw: &str) -> Option<RecurrenceKind> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match normalized.as_str() {
        "monthly" | "month" => Some(RecurrenceKind::Monthly),
        "annual" | "annually" | "yearly" | "year" => Some(RecurrenceKind::Annual),
        "irregular" | "custom" => Some(RecurrenceKind::Irregular),
        "oneoff" | "once" | "onetime" | "single" => Some(RecurrenceKind::OneOff),
        _ => None,
    }
}

const CURRENCY_SYMBOLS: [char; 5] = ['€', '$', '£', '¥', '₹'];

fn is_currency_code(token: &str) -> bool {
    token.len() == 3 && token.chars().all(|c| c.is_ascii_uppercase())
}

fn strip_currency(raw: &str) -> &str {
    let trimmed = raw
        .trim()
        .trim_matches(|c: char| CURRENCY_SYMBOLS.contains(&c))
        .trim();
    let leading = trimmed
        .split_once(char::is_whitespace)
        .filter(|(code, _)| is_currency_code(code))
        .map(|(_, rest)| rest);
    let trailing = || {
        trimmed
            .rsplit_once(char::is_whitespace)
            .filter(|(_, code)| is_currency_code(code))
            .map(|(rest, _)| rest)
    };
    leading.or_else(trailing).unwrap_or(trimmed).trim()
}

// Space-separated thousands: every group after the first opens with exactly three digits.
fn has_valid_grouping(body: &str) -> bool {
    body.split(' ').skip(1).all(|group| {
        group.chars().take_while(char::is_ascii_digit).count() == 3
    })
}

/// Parses `"1.234,56"`, `"1,234.56"`, `"1 234,56"`, `"€ 120"`, `"120 EUR"`
/// and plain numbers. Anything else left after the currency marker is rejected.
pub fn parse_amount(raw: &str) -> Result<f64, AmountParseError> {
    if raw.trim().is_empty() {
        return Err(AmountParseError::Empty);
    }
    let body = strip_currency(raw);
    let well_formed = !body.is_empty()
        && body.chars().any(|c| c.is_ascii_digit())
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '\'' | ' '))
        && !body[1..].contains('-')
        && has_valid_grouping(body);
    if !well_formed {
        return Err(AmountParseError::Invalid(raw.to_string()));
    }
    let cleaned: String = body.chars().filter(|c| !matches!(c, ' ' | '\'')).collect();

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(comma), None) => {
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && decimals <= 2 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    let value = normalized
        .parse::<f64>()
        .map_err(|_| AmountParseError::Invalid(raw.to_string()))?;
    check_amount(value)
}

fn check_amount(value: f64) -> Result<f64, AmountParseError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(AmountParseError::OutOfRange(value))
    }
}

fn resolve_amount(record: &ExpenseRecord) -> f64 {
    let parsed = match &record.amount {
        AmountField::Number(value) => check_amount(*value),
        AmountField::Text(text) => parse_amount(text),
    };
    parsed.unwrap_or_else(|err| {
        warn!("expense `{}`: {err}; using 0", record.id);
        0.0
    })
}

fn optional_date(record: &ExpenseRecord, field: &str, raw: Option<&str>) -> Option<chrono::NaiveDate> {
    let raw = raw?;
    match parse_date(raw) {
        Ok(date) => Some(date),
        Err(err) => {
            warn!("expense `{}`: {field} ignored: {err}", record.id);
            None
        }
    }
}

fn schedule_points(record: &ExpenseRecord) -> Vec<DayMonth> {
    let mut points: Vec<DayMonth> = record
        .schedule_dates
        .iter()
        .filter_map(|raw| match parse_day_month(raw) {
            Ok(point) => Some(point),
            Err(err) => {
                warn!("expense `{}`: schedule date dropped: {err}", record.id);
                None
            }
        })
        .collect();
    points.sort_by_key(|p| (p.month, p.day));
    points.dedup();
    points
}

/// Converts a record, or returns `None` when it cannot be scheduled.
pub fn expense_from_record(record: &ExpenseRecord) -> Option<Expense> {
    let Some(kind) = record.recurrence.as_deref().and_then(parse_recurrence_kind) else {
        warn!(
            "expense `{}` skipped: unknown recurrence {:?}",
            record.id, record.recurrence
        );
        return None;
    };

    let validity = ValidityWindow::new(
        optional_date(record, "validFrom", record.valid_from.as_deref()),
        optional_date(record, "validTo", record.valid_to.as_deref()),
    );
    let due_date = record.due_date.as_deref();

    let recurrence = match kind {
        RecurrenceKind::Monthly => Recurrence::Monthly {
            day_of_month: record
                .day_of_month
                .or_else(|| validity.from.map(|from| DayMonth::of(from).day))
                .unwrap_or(1)
                .clamp(1, 31),
        },
        RecurrenceKind::Annual => {
            let on = due_date
                .and_then(|raw| parse_day_month(raw).ok())
                .or_else(|| schedule_points(record).into_iter().next())
                .or_else(|| validity.from.map(DayMonth::of));
            match on {
                Some(on) => Recurrence::Annual { on },
                None => {
                    warn!("expense `{}` skipped: annual expense without a date", record.id);
                    return None;
                }
            }
        }
        RecurrenceKind::Irregular => {
            let dates = schedule_points(record);
            if dates.is_empty() {
                warn!(
                    "expense `{}` skipped: irregular expense without schedule dates",
                    record.id
                );
                return None;
            }
            Recurrence::Irregular { dates }
        }
        RecurrenceKind::OneOff => {
            let due = match due_date {
                Some(raw) => match (parse_date(raw), parse_day_month(raw)) {
                    (Ok(date), _) => OneOffDue::Date(date),
                    (Err(_), Ok(point)) => OneOffDue::DayMonth(point),
                    (Err(err), Err(_)) => {
                        warn!(
                            "expense `{}`: due date unusable ({err}); using fallback date",
                            record.id
                        );
                        OneOffDue::Unscheduled
                    }
                },
                None => match schedule_points(record).into_iter().next() {
                    Some(point) => OneOffDue::DayMonth(point),
                    None => OneOffDue::Unscheduled,
                },
            };
            Recurrence::OneOff { due }
        }
    };

    Some(Expense {
        id: record.id.clone(),
        category: record.category.clone(),
        description: record.description.clone(),
        amount: resolve_amount(record),
        recurrence,
        validity,
    })
}

pub fn expenses_from_records(records: &[ExpenseRecord]) -> Vec<Expense> {
    records.iter().filter_map(expense_from_record).collect()
}
