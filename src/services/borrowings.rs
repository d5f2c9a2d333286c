//! Borrowing service: lending, renewals, returns and fines

use chrono::{DateTime, Utc};
use mockable::Clock;
use rust_decimal::Decimal;
use sqlx::PgConnection;

use super::SharedClock;
use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        book::availability_after_return,
        borrowing::{
            default_due_date, BorrowCheck, Borrowing, BorrowingDetails, BorrowingEvent,
            BorrowingStats, BorrowingStatus, NewBorrowing,
        },
        fine::{total_outstanding, UserFines},
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct BorrowingsService {
    repository: Repository,
    rules: LendingConfig,
    clock: SharedClock,
}

impl BorrowingsService {
    pub fn new(repository: Repository, rules: LendingConfig, clock: SharedClock) -> Self {
        Self { repository, rules, clock }
    }

    pub fn rules(&self) -> &LendingConfig {
        &self.rules
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    /// Lend a copy of `book_id` to `user_id`
    pub async fn create_borrowing(
        &self,
        user_id: i32,
        book_id: i32,
        due_date: Option<DateTime<Utc>>,
        processed_by: i32,
    ) -> AppResult<BorrowingDetails> {
        let now = self.now();
        let due_date = self.resolve_due_date(due_date, now)?;

        let mut tx = self.repository.begin().await?;
        let borrowing = self.lend(&mut tx, user_id, book_id, due_date, processed_by, now).await?;
        tx.commit().await?;

        tracing::info!(
            borrowing_id = borrowing.id,
            user_id,
            book_id,
            due_date = %borrowing.due_date,
            "book borrowed"
        );
        Ok(borrowing.details(now, &self.rules))
    }

    pub(crate) fn resolve_due_date(
        &self,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<DateTime<Utc>> {
        match due_date {
            Some(due) if due <= now => Err(AppError::Validation("Due date must be in the future".to_string())),
            Some(due) => Ok(due),
            None => Ok(default_due_date(now, &self.rules)),
        }
    }

    /// Run the borrow checks and take a copy inside the caller's transaction.
    ///
    /// Locks the book row first, then the borrower; nothing is written unless
    /// every check passes.
    pub(crate) async fn lend(
        &self,
        conn: &mut PgConnection,
        user_id: i32,
        book_id: i32,
        due_date: DateTime<Utc>,
        processed_by: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Borrowing> {
        let book = self.repository.books.lock(conn, book_id).await?;
        self.repository.borrowings.lock_user(conn, user_id).await?;
        let fines = self.repository.borrowings.fine_entries(conn, user_id).await?;

        let check = BorrowCheck {
            book_id,
            available_copies: book.as_ref().map(|b| b.available_copies),
            has_active_borrowing: self.repository.borrowings.has_active(conn, user_id, book_id).await?,
            active_borrowings: self.repository.borrowings.count_active(conn, user_id).await?,
            outstanding_fines: total_outstanding(&fines, now, &self.rules),
        };
        if let Err(e) = check.verify(&self.rules) {
            tracing::debug!(user_id, book_id, error = %e, "borrow refused");
            return Err(e);
        }

        if !self.repository.books.take_copy(conn, book_id, now).await? {
            return Err(AppError::NotAvailable(book_id));
        }

        let loan = NewBorrowing {
            user_id,
            book_id,
            borrow_date: now,
            due_date,
            processed_by,
        };
        self.repository.borrowings.insert(conn, &loan).await
    }

    /// Get one borrowing with its derived fields
    pub async fn get(&self, id: i32) -> AppResult<BorrowingDetails> {
        let borrowing = self.repository.borrowings.get_by_id(id).await?;
        Ok(borrowing.details(self.now(), &self.rules))
    }

    /// Extend the due date of the requester's own loan
    pub async fn renew(&self, id: i32, requester_id: i32) -> AppResult<BorrowingDetails> {
        let now = self.now();
        let mut tx = self.repository.begin().await?;

        let mut borrowing = self.repository.borrowings.lock(&mut tx, id).await?;
        if borrowing.user_id != requester_id {
            return Err(AppError::Forbidden("You can only renew your own borrowings".to_string()));
        }
        borrowing.renew(now, &self.rules)?;
        let borrowing = self.repository.borrowings.save(&mut tx, &borrowing, now).await?;
        tx.commit().await?;

        tracing::info!(
            borrowing_id = id,
            renewal_count = borrowing.renewal_count,
            due_date = %borrowing.due_date,
            "borrowing renewed"
        );
        Ok(borrowing.details(now, &self.rules))
    }

    /// Check a copy back in and put it on the shelf
    pub async fn return_book(
        &self,
        id: i32,
        staff_id: i32,
        notes: Option<String>,
    ) -> AppResult<BorrowingDetails> {
        let now = self.now();
        let book_id = self.repository.borrowings.get_by_id(id).await?.book_id;

        let mut tx = self.repository.begin().await?;
        let book = self.repository.books.lock(&mut tx, book_id).await?;
        let mut borrowing = self.repository.borrowings.lock(&mut tx, id).await?;

        borrowing.apply(BorrowingEvent::Return, Some(staff_id), now, &self.rules)?;
        if notes.is_some() {
            borrowing.notes = notes;
        }
        let borrowing = self.repository.borrowings.save(&mut tx, &borrowing, now).await?;

        match book {
            Some(book) => {
                let available = availability_after_return(book.available_copies, book.total_copies);
                self.repository.books.set_available(&mut tx, book_id, available, now).await?;
            }
            None => tracing::warn!(borrowing_id = id, book_id, "returned a copy of a book no longer in the catalog"),
        }
        tx.commit().await?;

        tracing::info!(
            borrowing_id = id,
            book_id,
            fine = %borrowing.fine_amount,
            "book returned"
        );
        Ok(borrowing.details(now, &self.rules))
    }

    /// Flag a loan overdue and record its fine
    pub async fn mark_overdue(&self, id: i32) -> AppResult<BorrowingDetails> {
        let borrowing = self.transition(id, BorrowingEvent::MarkOverdue).await?;
        tracing::info!(borrowing_id = id, fine = %borrowing.fine_amount, "borrowing marked overdue");
        Ok(borrowing.details(self.now(), &self.rules))
    }

    /// Write a copy off as lost; availability is not restored
    pub async fn mark_lost(&self, id: i32) -> AppResult<BorrowingDetails> {
        let borrowing = self.transition(id, BorrowingEvent::MarkLost).await?;
        tracing::info!(borrowing_id = id, book_id = borrowing.book_id, "borrowing marked lost");
        Ok(borrowing.details(self.now(), &self.rules))
    }

    async fn transition(&self, id: i32, event: BorrowingEvent) -> AppResult<Borrowing> {
        let now = self.now();
        let mut tx = self.repository.begin().await?;
        let mut borrowing = self.repository.borrowings.lock(&mut tx, id).await?;
        borrowing.apply(event, None, now, &self.rules)?;
        let borrowing = self.repository.borrowings.save(&mut tx, &borrowing, now).await?;
        tx.commit().await?;
        Ok(borrowing)
    }

    /// Settle the fine recorded on a loan
    pub async fn pay_fine(&self, id: i32) -> AppResult<BorrowingDetails> {
        let now = self.now();
        let mut tx = self.repository.begin().await?;
        let mut borrowing = self.repository.borrowings.lock(&mut tx, id).await?;
        borrowing.pay_fine(now, &self.rules)?;
        let borrowing = self.repository.borrowings.save(&mut tx, &borrowing, now).await?;
        tx.commit().await?;

        tracing::info!(borrowing_id = id, amount = %borrowing.fine_amount, "fine paid");
        Ok(borrowing.details(now, &self.rules))
    }

    /// Active loans past their due date
    pub async fn list_overdue(&self) -> AppResult<Vec<BorrowingDetails>> {
        let now = self.now();
        let rows = self.repository.borrowings.list_overdue(now).await?;
        Ok(rows.into_iter().map(|b| b.details(now, &self.rules)).collect())
    }

    pub async fn list_for_user(
        &self,
        user_id: i32,
        status: Option<BorrowingStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<BorrowingDetails>, i64)> {
        let now = self.now();
        let (rows, total) = self
            .repository
            .borrowings
            .list_for_user(user_id, status, limit, offset)
            .await?;
        Ok((rows.into_iter().map(|b| b.details(now, &self.rules)).collect(), total))
    }

    pub async fn stats(&self) -> AppResult<BorrowingStats> {
        self.repository.borrowings.stats().await
    }

    /// Outstanding fines of a user, as seen by the borrow gate
    pub async fn user_fines(&self, user_id: i32) -> AppResult<UserFines> {
        let mut conn = self.repository.pool.acquire().await?;
        let entries = self.repository.borrowings.fine_entries(&mut conn, user_id).await?;
        let outstanding = total_outstanding(&entries, self.now(), &self.rules);
        Ok(UserFines {
            user_id,
            outstanding,
            can_borrow: outstanding <= Decimal::ZERO,
        })
    }

    /// Move past-due loans to overdue and refresh their fine snapshots.
    /// Returns the number of loans touched.
    pub async fn sweep_overdue(&self) -> AppResult<usize> {
        let now = self.now();
        let mut touched = 0;
        for id in self.repository.borrowings.past_due_ids(now).await? {
            let mut tx = self.repository.begin().await?;
            let mut borrowing = self.repository.borrowings.lock(&mut tx, id).await?;
            // may have been returned since the id was read
            if borrowing.status.is_terminal() || borrowing.due_date >= now {
                continue;
            }
            borrowing.apply(BorrowingEvent::MarkOverdue, None, now, &self.rules)?;
            self.repository.borrowings.save(&mut tx, &borrowing, now).await?;
            tx.commit().await?;
            touched += 1;
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{fixture_clock, fixture_timestamp, lazy_repository};
    use chrono::Duration;
    use mockable::MockClock;
    use std::sync::Arc;

    fn service() -> BorrowingsService {
        BorrowingsService::new(lazy_repository(), LendingConfig::default(), fixture_clock())
    }

    #[tokio::test]
    async fn clock_drives_now() {
        assert_eq!(service().now(), fixture_timestamp());
    }

    #[tokio::test]
    async fn missing_due_date_defaults_to_loan_period() {
        let service = service();
        let now = service.now();
        assert_eq!(service.resolve_due_date(None, now).unwrap(), now + Duration::days(14));
    }

    #[tokio::test]
    async fn explicit_due_date_must_be_in_the_future() {
        let service = service();
        let now = service.now();
        let due = now + Duration::days(3);
        assert_eq!(service.resolve_due_date(Some(due), now).unwrap(), due);
        assert!(matches!(service.resolve_due_date(Some(now), now), Err(AppError::Validation(_))));
        assert!(matches!(
            service.resolve_due_date(Some(now - Duration::days(1)), now),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn default_due_date_reads_the_injected_clock_once() {
        let instant = fixture_timestamp() + Duration::days(30);
        let mut clock = MockClock::new();
        clock.expect_utc().times(1).returning(move || instant);
        let service = BorrowingsService::new(lazy_repository(), LendingConfig::default(), Arc::new(clock));

        let now = service.now();
        assert_eq!(now, instant);
        assert_eq!(service.resolve_due_date(None, now).unwrap(), instant + Duration::days(14));
    }
}
