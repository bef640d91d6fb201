mod cache;
pub mod dates;
mod engine;
pub mod ingest;
mod periods;
mod schedule;
mod solver;
mod types;

pub use cache::{ProjectionCache, fingerprint};
pub use engine::{
    Projection, ProjectionEngine, build_ledger, horizon_months, resolve_target, run_projection,
};
pub use ingest::{ExpenseRecord, expense_from_record, expenses_from_records};
pub use periods::{PartitionError, check_cover, one_off_boundaries, partition};
pub use schedule::{Horizon, Occurrence, bucketize, expand_all, expand_expense};
pub use solver::{
    Correction, VERIFY_ITERATION_CAP, Verification, apply_single_correction, solve_rates, verify,
};
pub use types::{
    BoundaryOneOff, DayMonth, EnginePolicy, Expense, LedgerEntry, MAX_AMOUNT, MonthlyExpenseBucket, OneOffDue,
    Period, PeriodKind, ProjectionParameters, Recurrence, RecurrenceKind, ValidityWindow,
};
