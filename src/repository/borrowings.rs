//! Borrowings repository

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use super::on_unique_violation;
use crate::{
    error::{AppError, AppResult},
    models::{
        borrowing::{Borrowing, BorrowingStats, BorrowingStatus, NewBorrowing},
        fine::FineEntry,
    },
};

/// First key of the two-key advisory lock taken per borrower
const USER_LOCK_SPACE: i32 = 0x4c45_4e44;

#[derive(Clone)]
pub struct BorrowingsRepository {
    pool: Pool<Postgres>,
}

impl BorrowingsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get borrowing by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Borrowing> {
        sqlx::query_as::<_, Borrowing>("SELECT * FROM borrowings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrowing {} not found", id)))
    }

    /// Get borrowing by ID and lock it for the rest of the transaction
    pub async fn lock(&self, conn: &mut PgConnection, id: i32) -> AppResult<Borrowing> {
        sqlx::query_as::<_, Borrowing>("SELECT * FROM borrowings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrowing {} not found", id)))
    }

    /// Serialize lending to one user until the transaction ends, so the loan
    /// cap and fine gate are read and acted on as one step across books
    pub async fn lock_user(&self, conn: &mut PgConnection, user_id: i32) -> AppResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(USER_LOCK_SPACE)
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Whether the user currently has this book out
    pub async fn has_active(&self, conn: &mut PgConnection, user_id: i32, book_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM borrowings WHERE user_id = $1 AND book_id = $2 AND status = 'active')",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// Count the user's active loans
    pub async fn count_active(&self, conn: &mut PgConnection, user_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowings WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    /// Fine-relevant columns of every loan the user ever had
    pub async fn fine_entries(&self, conn: &mut PgConnection, user_id: i32) -> AppResult<Vec<FineEntry>> {
        let entries = sqlx::query_as::<_, FineEntry>(
            "SELECT status, due_date, fine_amount, fine_paid FROM borrowings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(conn)
        .await?;
        Ok(entries)
    }

    /// Insert an active loan
    pub async fn insert(&self, conn: &mut PgConnection, loan: &NewBorrowing) -> AppResult<Borrowing> {
        sqlx::query_as::<_, Borrowing>(
            r#"
            INSERT INTO borrowings (
                user_id, book_id, borrow_date, due_date, status, processed_by,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $3, $3)
            RETURNING *
            "#,
        )
        .bind(loan.user_id)
        .bind(loan.book_id)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .bind(BorrowingStatus::Active)
        .bind(loan.processed_by)
        .fetch_one(conn)
        .await
        .map_err(|e| on_unique_violation(e, || AppError::DuplicateBorrow(loan.book_id)))
    }

    /// Write back every mutable column of a locked borrowing
    pub async fn save(&self, conn: &mut PgConnection, borrowing: &Borrowing, now: DateTime<Utc>) -> AppResult<Borrowing> {
        let saved = sqlx::query_as::<_, Borrowing>(
            r#"
            UPDATE borrowings SET
                due_date = $2, return_date = $3, status = $4, fine_amount = $5,
                fine_paid = $6, fine_paid_date = $7, renewal_count = $8,
                last_renewal_date = $9, notes = $10, returned_by = $11, updated_at = $12
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(borrowing.id)
        .bind(borrowing.due_date)
        .bind(borrowing.return_date)
        .bind(borrowing.status)
        .bind(borrowing.fine_amount)
        .bind(borrowing.fine_paid)
        .bind(borrowing.fine_paid_date)
        .bind(borrowing.renewal_count)
        .bind(borrowing.last_renewal_date)
        .bind(&borrowing.notes)
        .bind(borrowing.returned_by)
        .bind(now)
        .fetch_one(conn)
        .await?;
        Ok(saved)
    }

    /// A user's loans, newest first
    pub async fn list_for_user(
        &self,
        user_id: i32,
        status: Option<BorrowingStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Borrowing>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowings WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, Borrowing>(
            r#"
            SELECT * FROM borrowings
            WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY borrow_date DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    /// Active loans past their due date, most overdue first
    pub async fn list_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Borrowing>> {
        let rows = sqlx::query_as::<_, Borrowing>(
            "SELECT * FROM borrowings WHERE status = 'active' AND due_date < $1 ORDER BY due_date",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Loans the overdue sweep should (re)mark
    pub async fn past_due_ids(&self, now: DateTime<Utc>) -> AppResult<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM borrowings WHERE status IN ('active', 'overdue') AND due_date < $1 ORDER BY id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Whether any loan of this book is still out
    pub async fn book_has_open_loans(&self, conn: &mut PgConnection, book_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM borrowings WHERE book_id = $1 AND status IN ('active', 'overdue'))",
        )
        .bind(book_id)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// Counters over all loans
    pub async fn stats(&self) -> AppResult<BorrowingStats> {
        let stats = sqlx::query_as::<_, BorrowingStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'active') AS active,
                COUNT(*) FILTER (WHERE status = 'returned') AS returned,
                COUNT(*) FILTER (WHERE status = 'overdue') AS overdue,
                COUNT(*) FILTER (WHERE status = 'lost') AS lost,
                COALESCE(SUM(fine_amount), 0) AS total_fines
            FROM borrowings
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}
