//! Reservations repository

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use super::on_unique_violation;
use crate::{
    error::{AppError, AppResult},
    models::reservation::{QueueEntry, Reservation, ReservationStats, ReservationStatus},
};

#[derive(Clone)]
pub struct ReservationsRepository {
    pool: Pool<Postgres>,
}

impl ReservationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get reservation by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Reservation> {
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation {} not found", id)))
    }

    /// Get reservation by ID and lock it; the caller already holds the book lock
    pub async fn lock(&self, conn: &mut PgConnection, id: i32) -> AppResult<Reservation> {
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation {} not found", id)))
    }

    /// Whether the user is already waiting for this book
    pub async fn has_pending(&self, conn: &mut PgConnection, user_id: i32, book_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM reservations WHERE user_id = $1 AND book_id = $2 AND status = 'pending')",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// Insert a pending reservation
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        user_id: i32,
        book_id: i32,
        reserved_at: DateTime<Utc>,
        expiry_date: DateTime<Utc>,
        notes: Option<&str>,
    ) -> AppResult<Reservation> {
        sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (
                user_id, book_id, reservation_date, status, expiry_date, notes,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $3, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(reserved_at)
        .bind(ReservationStatus::Pending)
        .bind(expiry_date)
        .bind(notes)
        .fetch_one(conn)
        .await
        .map_err(|e| on_unique_violation(e, || AppError::DuplicateReservation(book_id)))
    }

    /// Write back the mutable columns of a locked reservation
    pub async fn save(&self, conn: &mut PgConnection, reservation: &Reservation, now: DateTime<Utc>) -> AppResult<Reservation> {
        let saved = sqlx::query_as::<_, Reservation>(
            r#"
            UPDATE reservations SET
                status = $2, priority = $3, fulfilled_date = $4, cancelled_date = $5,
                processed_by = $6, notification_sent = $7, updated_at = $8
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.status)
        .bind(reservation.priority)
        .bind(reservation.fulfilled_date)
        .bind(reservation.cancelled_date)
        .bind(reservation.processed_by)
        .bind(reservation.notification_sent)
        .bind(now)
        .fetch_one(conn)
        .await?;
        Ok(saved)
    }

    /// Pending reservations of a book, unordered
    pub async fn pending_queue(&self, conn: &mut PgConnection, book_id: i32) -> AppResult<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(
            "SELECT id, user_id, reservation_date FROM reservations WHERE book_id = $1 AND status = 'pending'",
        )
        .bind(book_id)
        .fetch_all(conn)
        .await?;
        Ok(entries)
    }

    /// Persist the rank of every queue entry in one statement
    pub async fn set_priorities(&self, conn: &mut PgConnection, ranks: &[(i32, i32)], now: DateTime<Utc>) -> AppResult<()> {
        if ranks.is_empty() {
            return Ok(());
        }
        let (ids, priorities): (Vec<i32>, Vec<i32>) = ranks.iter().copied().unzip();
        sqlx::query(
            r#"
            UPDATE reservations r
            SET priority = q.priority, updated_at = $3
            FROM UNNEST($1::int4[], $2::int4[]) AS q(id, priority)
            WHERE r.id = q.id AND r.priority IS DISTINCT FROM q.priority
            "#,
        )
        .bind(&ids)
        .bind(&priorities)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Expire every pending reservation of a book whose hold has run out
    pub async fn expire_stale(&self, conn: &mut PgConnection, book_id: i32, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'expired', priority = NULL, updated_at = $2
            WHERE book_id = $1 AND status = 'pending' AND expiry_date < $2
            "#,
        )
        .bind(book_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Books holding at least one pending reservation past its expiry
    pub async fn books_with_stale(&self, now: DateTime<Utc>) -> AppResult<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT DISTINCT book_id FROM reservations WHERE status = 'pending' AND expiry_date < $1 ORDER BY book_id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Whether anybody still waits for this book
    pub async fn book_has_pending(&self, conn: &mut PgConnection, book_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM reservations WHERE book_id = $1 AND status = 'pending')",
        )
        .bind(book_id)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// A user's reservations, newest first
    pub async fn list_for_user(
        &self,
        user_id: i32,
        status: Option<ReservationStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Reservation>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY reservation_date DESC, id DESC
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

    /// Reservations of a book in queue order
    pub async fn list_for_book(&self, book_id: i32, status: ReservationStatus) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE book_id = $1 AND status = $2
            ORDER BY priority NULLS LAST, reservation_date, id
            "#,
        )
        .bind(book_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Pending reservations whose hold has run out but which nobody touched yet
    pub async fn list_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE status = 'pending' AND expiry_date < $1 ORDER BY expiry_date",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Pending entries of a book, read outside any transaction
    pub async fn queue_snapshot(&self, book_id: i32) -> AppResult<Vec<QueueEntry>> {
        let mut conn = self.pool.acquire().await?;
        self.pending_queue(&mut conn, book_id).await
    }

    /// Counters over all reservations
    pub async fn stats(&self) -> AppResult<ReservationStats> {
        let stats = sqlx::query_as::<_, ReservationStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'fulfilled') AS fulfilled,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                COUNT(*) FILTER (WHERE status = 'expired') AS expired
            FROM reservations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}
