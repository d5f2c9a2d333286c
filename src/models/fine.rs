//! Fine ledger: the outstanding amount that gates new borrowing

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

use super::borrowing::{days_overdue, fine_for, BorrowingStatus};
use crate::config::LendingConfig;

/// The fine-relevant columns of one borrowing
#[derive(Debug, Clone, FromRow)]
pub struct FineEntry {
    pub status: BorrowingStatus,
    pub due_date: DateTime<Utc>,
    pub fine_amount: Decimal,
    pub fine_paid: bool,
}

impl FineEntry {
    /// Live amount for overdue loans, recorded amount for the rest
    pub fn amount(&self, now: DateTime<Utc>, rules: &LendingConfig) -> Decimal {
        match self.status {
            BorrowingStatus::Overdue => fine_for(days_overdue(self.status, self.due_date, now), rules),
            _ => self.fine_amount,
        }
    }
}

/// Sum of fines over a user's borrowings.
///
/// Paid fines are left out unless `exclude_paid_fines` is turned off, in
/// which case every recorded fine counts.
pub fn total_outstanding(entries: &[FineEntry], now: DateTime<Utc>, rules: &LendingConfig) -> Decimal {
    entries
        .iter()
        .filter(|entry| !(rules.exclude_paid_fines && entry.fine_paid))
        .map(|entry| entry.amount(now, rules))
        .sum()
}

/// Fine summary for one user
#[derive(Debug, Serialize, ToSchema)]
pub struct UserFines {
    pub user_id: i32,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub outstanding: Decimal,
    pub can_borrow: bool,
}
