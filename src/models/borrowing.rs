//! Borrowing model and the loan lifecycle rules

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::{ceil_days, text_column};
use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
};

/// Loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BorrowingStatus {
    Active,
    Returned,
    Overdue,
    Lost,
}

/// Something that happens to a loan after it was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowingEvent {
    Return,
    MarkOverdue,
    MarkLost,
}

impl BorrowingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowingStatus::Active => "active",
            BorrowingStatus::Returned => "returned",
            BorrowingStatus::Overdue => "overdue",
            BorrowingStatus::Lost => "lost",
        }
    }

    /// Returned and lost loans never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, BorrowingStatus::Returned | BorrowingStatus::Lost)
    }

    /// The single transition table for loans.
    ///
    /// `Overdue -> Overdue` is accepted so the fine snapshot can be refreshed.
    pub fn transition(self, event: BorrowingEvent) -> AppResult<BorrowingStatus> {
        use BorrowingEvent::*;
        use BorrowingStatus::*;

        match (self, event) {
            (Active | Overdue, Return) => Ok(Returned),
            (Active | Overdue, MarkOverdue) => Ok(Overdue),
            (Active | Overdue, MarkLost) => Ok(Lost),
            (from, event) => Err(AppError::InvalidState(format!(
                "Cannot apply {:?} to a {} borrowing",
                event, from
            ))),
        }
    }
}

impl std::str::FromStr for BorrowingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(BorrowingStatus::Active),
            "returned" => Ok(BorrowingStatus::Returned),
            "overdue" => Ok(BorrowingStatus::Overdue),
            "lost" => Ok(BorrowingStatus::Lost),
            _ => Err(format!("Invalid borrowing status: {}", s)),
        }
    }
}

text_column!(BorrowingStatus);

/// Borrowing record from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Borrowing {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: BorrowingStatus,
    /// Fine recorded at the last overdue transition
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub fine_amount: Decimal,
    pub fine_paid: bool,
    pub fine_paid_date: Option<DateTime<Utc>>,
    pub renewal_count: i32,
    pub last_renewal_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub processed_by: Option<i32>,
    pub returned_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Due date for a new loan
pub fn default_due_date(now: DateTime<Utc>, rules: &LendingConfig) -> DateTime<Utc> {
    now + Duration::days(rules.loan_days)
}

/// Days past the due date, rounded up; zero for closed loans
pub fn days_overdue(status: BorrowingStatus, due_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    if status.is_terminal() {
        return 0;
    }
    ceil_days(due_date, now).max(0)
}

/// Fine owed for a number of overdue days
pub fn fine_for(days: i64, rules: &LendingConfig) -> Decimal {
    rules.fine_rate() * Decimal::from(days)
}

impl Borrowing {
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        days_overdue(self.status, self.due_date, now)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == BorrowingStatus::Active && self.days_overdue(now) > 0
    }

    pub fn can_renew(&self, now: DateTime<Utc>, rules: &LendingConfig) -> bool {
        self.status == BorrowingStatus::Active
            && self.renewal_count < rules.max_renewals
            && self.days_overdue(now) <= rules.max_renew_overdue_days
    }

    /// Fine owed right now: live for overdue loans, the snapshot otherwise
    pub fn current_fine(&self, now: DateTime<Utc>, rules: &LendingConfig) -> Decimal {
        match self.status {
            BorrowingStatus::Overdue => fine_for(self.days_overdue(now), rules),
            _ => self.fine_amount,
        }
    }

    /// Extend the due date. The caller persists the result.
    pub fn renew(&mut self, now: DateTime<Utc>, rules: &LendingConfig) -> AppResult<()> {
        if self.status != BorrowingStatus::Active {
            return Err(AppError::InvalidState(format!(
                "Borrowing {} is {}, only active loans can be renewed",
                self.id, self.status
            )));
        }
        if !self.can_renew(now, rules) {
            return Err(AppError::InvalidState(format!(
                "Borrowing {} cannot be renewed ({} renewals, {} days overdue)",
                self.id,
                self.renewal_count,
                self.days_overdue(now)
            )));
        }

        self.due_date += Duration::days(rules.renewal_days);
        self.renewal_count += 1;
        self.last_renewal_date = Some(now);
        Ok(())
    }

    /// Apply a lifecycle event with its side effects on dates and fines
    pub fn apply(
        &mut self,
        event: BorrowingEvent,
        actor: Option<i32>,
        now: DateTime<Utc>,
        rules: &LendingConfig,
    ) -> AppResult<()> {
        let next = self.status.transition(event)?;
        // frozen at the moment an overdue loan closes
        if self.status == BorrowingStatus::Overdue || next == BorrowingStatus::Overdue {
            self.fine_amount = fine_for(self.days_overdue(now), rules);
        }
        if next == BorrowingStatus::Returned {
            self.return_date = Some(now);
            self.returned_by = actor;
        }
        self.status = next;
        Ok(())
    }

    /// Mark the fine of a closed loan as settled.
    ///
    /// Open loans are refused: an overdue fine keeps growing until the copy
    /// is returned or written off, and a paid flag set earlier would hide
    /// whatever accrued afterwards from the borrow gate.
    pub fn pay_fine(&mut self, now: DateTime<Utc>, rules: &LendingConfig) -> AppResult<()> {
        if !self.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Borrowing {} is {}, its fine can be paid once it is returned or lost",
                self.id, self.status
            )));
        }
        if self.fine_paid {
            return Err(AppError::InvalidState(format!(
                "Fine for borrowing {} is already paid",
                self.id
            )));
        }
        let owed = self.current_fine(now, rules);
        if owed <= Decimal::ZERO {
            return Err(AppError::InvalidState(format!(
                "Borrowing {} has no fine to pay",
                self.id
            )));
        }
        self.fine_amount = owed;
        self.fine_paid = true;
        self.fine_paid_date = Some(now);
        Ok(())
    }

    pub fn details(self, now: DateTime<Utc>, rules: &LendingConfig) -> BorrowingDetails {
        BorrowingDetails {
            days_overdue: self.days_overdue(now),
            is_overdue: self.is_overdue(now),
            can_renew: self.can_renew(now, rules),
            current_fine: self.current_fine(now, rules),
            borrowing: self,
        }
    }
}

/// Borrowing with fields derived at read time
#[derive(Debug, Serialize, ToSchema)]
pub struct BorrowingDetails {
    #[serde(flatten)]
    pub borrowing: Borrowing,
    pub days_overdue: i64,
    pub is_overdue: bool,
    pub can_renew: bool,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub current_fine: Decimal,
}

/// Facts gathered before a loan is created, checked in a fixed order
#[derive(Debug, Clone)]
pub struct BorrowCheck {
    pub book_id: i32,
    /// `None` when the book does not exist
    pub available_copies: Option<i32>,
    pub has_active_borrowing: bool,
    pub active_borrowings: i64,
    pub outstanding_fines: Decimal,
}

impl BorrowCheck {
    pub fn verify(&self, rules: &LendingConfig) -> AppResult<()> {
        let available = self
            .available_copies
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", self.book_id)))?;
        if available <= 0 {
            return Err(AppError::NotAvailable(self.book_id));
        }
        if self.has_active_borrowing {
            return Err(AppError::DuplicateBorrow(self.book_id));
        }
        if self.active_borrowings >= rules.max_active_borrowings {
            return Err(AppError::LimitExceeded {
                current: self.active_borrowings,
                limit: rules.max_active_borrowings,
            });
        }
        if self.outstanding_fines > Decimal::ZERO {
            return Err(AppError::OutstandingFines(self.outstanding_fines));
        }
        Ok(())
    }
}

/// Fields of a loan about to be inserted
#[derive(Debug, Clone)]
pub struct NewBorrowing {
    pub user_id: i32,
    pub book_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub processed_by: i32,
}

/// Borrow request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBorrowing {
    #[validate(range(min = 1, message = "Book ID is required"))]
    pub book_id: i32,
    /// Staff may lend on behalf of another user
    #[validate(range(min = 1, message = "Invalid user ID"))]
    pub user_id: Option<i32>,
    /// Defaults to the standard loan period
    pub due_date: Option<DateTime<Utc>>,
}

/// Return request
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct ReturnBorrowing {
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
}

/// Counters over every loan ever recorded
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct BorrowingStats {
    pub total: i64,
    pub active: i64,
    pub returned: i64,
    pub overdue: i64,
    pub lost: i64,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_fines: Decimal,
}
