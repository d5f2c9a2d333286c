//! Reservation service: the per-book waiting queue

use chrono::{DateTime, Utc};
use mockable::Clock;
use sqlx::PgConnection;

use super::{borrowings::BorrowingsService, SharedClock};
use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        book::Book,
        borrowing::default_due_date,
        reservation::{
            expiry_for, position_of, rank_queue, FulfilledLoan, QueueEntry, Reservation,
            ReservationDetails, ReservationEvent, ReservationStats, ReservationStatus, ReserveCheck,
        },
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct ReservationsService {
    repository: Repository,
    rules: LendingConfig,
    clock: SharedClock,
    borrowings: BorrowingsService,
}

impl ReservationsService {
    pub fn new(
        repository: Repository,
        rules: LendingConfig,
        clock: SharedClock,
        borrowings: BorrowingsService,
    ) -> Self {
        Self {
            repository,
            rules,
            clock,
            borrowings,
        }
    }

    /// Join the queue for a book. The returned details carry the user's position.
    pub async fn reserve(&self, user_id: i32, book_id: i32, notes: Option<String>) -> AppResult<ReservationDetails> {
        let now = self.clock.utc();
        let mut tx = self.repository.begin().await?;

        let book = self.repository.books.lock(&mut tx, book_id).await?;
        if book.is_some() {
            self.repository.reservations.expire_stale(&mut tx, book_id, now).await?;
        }

        let check = ReserveCheck {
            book_id,
            book_exists: book.is_some(),
            has_pending_reservation: self.repository.reservations.has_pending(&mut tx, user_id, book_id).await?,
            has_active_borrowing: self.repository.borrowings.has_active(&mut tx, user_id, book_id).await?,
        };
        check.verify()?;

        let expiry = expiry_for(now, &self.rules);
        let mut reservation = self
            .repository
            .reservations
            .insert(&mut tx, user_id, book_id, now, expiry, notes.as_deref())
            .await?;
        let queue = self.recompute_priorities(&mut tx, book_id, now).await?;
        tx.commit().await?;

        let position = position_of(&queue, user_id);
        reservation.priority = position.and_then(|p| i32::try_from(p).ok());
        tracing::info!(
            reservation_id = reservation.id,
            user_id,
            book_id,
            position = ?position,
            "book reserved"
        );
        Ok(reservation.details(now, position))
    }

    /// Withdraw the requester's own pending reservation
    pub async fn cancel(&self, id: i32, requester_id: i32) -> AppResult<ReservationDetails> {
        let now = self.clock.utc();
        let book_id = self.repository.reservations.get_by_id(id).await?.book_id;

        let mut tx = self.repository.begin().await?;
        self.repository.books.lock(&mut tx, book_id).await?;
        let mut reservation = self.repository.reservations.lock(&mut tx, id).await?;

        if reservation.user_id != requester_id {
            return Err(AppError::Forbidden("You can only cancel your own reservations".to_string()));
        }
        if reservation.expire_if_due(now) {
            return self.commit_expiry(tx, &reservation, now).await;
        }

        reservation.apply(ReservationEvent::Cancel, Some(requester_id), now)?;
        let reservation = self.repository.reservations.save(&mut tx, &reservation, now).await?;
        self.recompute_priorities(&mut tx, book_id, now).await?;
        tx.commit().await?;

        tracing::info!(reservation_id = id, book_id, "reservation cancelled");
        Ok(reservation.details(now, None))
    }

    /// Mark a reservation fulfilled. No copy changes hands here.
    pub async fn fulfill(&self, id: i32, staff_id: i32) -> AppResult<ReservationDetails> {
        let now = self.clock.utc();
        let book_id = self.repository.reservations.get_by_id(id).await?.book_id;

        let mut tx = self.repository.begin().await?;
        let book = self.repository.books.lock(&mut tx, book_id).await?;
        let mut reservation = self.repository.reservations.lock(&mut tx, id).await?;
        if reservation.expire_if_due(now) {
            return self.commit_expiry(tx, &reservation, now).await;
        }
        Self::ready_to_fulfill(&reservation, book.as_ref())?;

        reservation.apply(ReservationEvent::Fulfill, Some(staff_id), now)?;
        let reservation = self.repository.reservations.save(&mut tx, &reservation, now).await?;
        self.recompute_priorities(&mut tx, book_id, now).await?;
        tx.commit().await?;

        tracing::info!(reservation_id = id, book_id, staff_id, "reservation fulfilled");
        Ok(reservation.details(now, None))
    }

    /// Fulfill a reservation and lend the copy to its owner in one transaction
    pub async fn fulfill_and_borrow(&self, id: i32, staff_id: i32) -> AppResult<FulfilledLoan> {
        let now = self.clock.utc();
        let book_id = self.repository.reservations.get_by_id(id).await?.book_id;

        let mut tx = self.repository.begin().await?;
        let book = self.repository.books.lock(&mut tx, book_id).await?;
        let mut reservation = self.repository.reservations.lock(&mut tx, id).await?;
        if reservation.expire_if_due(now) {
            return self.commit_expiry(tx, &reservation, now).await;
        }
        Self::ready_to_fulfill(&reservation, book.as_ref())?;

        reservation.apply(ReservationEvent::Fulfill, Some(staff_id), now)?;
        let reservation = self.repository.reservations.save(&mut tx, &reservation, now).await?;
        let borrowing = self
            .borrowings
            .lend(
                &mut tx,
                reservation.user_id,
                book_id,
                default_due_date(now, &self.rules),
                staff_id,
                now,
            )
            .await?;
        self.recompute_priorities(&mut tx, book_id, now).await?;
        tx.commit().await?;

        tracing::info!(
            reservation_id = id,
            borrowing_id = borrowing.id,
            user_id = reservation.user_id,
            book_id,
            "reservation fulfilled and lent"
        );
        Ok(FulfilledLoan {
            reservation: reservation.details(now, None),
            borrowing: borrowing.details(now, &self.rules),
        })
    }

    /// Transition first, then availability
    fn ready_to_fulfill(reservation: &Reservation, book: Option<&Book>) -> AppResult<()> {
        reservation.status.transition(ReservationEvent::Fulfill)?;
        match book {
            Some(book) if book.available_copies > 0 => Ok(()),
            _ => Err(AppError::NotAvailable(reservation.book_id)),
        }
    }

    /// Persist a reservation found expired on load, then refuse the operation
    async fn commit_expiry<T>(
        &self,
        mut tx: sqlx::Transaction<'static, sqlx::Postgres>,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> AppResult<T> {
        self.repository.reservations.save(&mut tx, reservation, now).await?;
        self.recompute_priorities(&mut tx, reservation.book_id, now).await?;
        tx.commit().await?;

        tracing::info!(reservation_id = reservation.id, book_id = reservation.book_id, "reservation expired");
        Err(AppError::InvalidState(format!("Reservation {} has expired", reservation.id)))
    }

    /// Rank every pending reservation of a book by reservation date and
    /// persist the ranks. The caller holds the book lock.
    async fn recompute_priorities(
        &self,
        conn: &mut PgConnection,
        book_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<QueueEntry>> {
        let queue = self.repository.reservations.pending_queue(conn, book_id).await?;
        let ranks = rank_queue(queue.clone());
        self.repository.reservations.set_priorities(conn, &ranks, now).await?;
        Ok(queue)
    }

    /// Expire the stale reservations of one book and close the gaps they leave
    async fn expire_book(&self, book_id: i32) -> AppResult<u64> {
        let now = self.clock.utc();
        let mut tx = self.repository.begin().await?;
        self.repository.books.lock(&mut tx, book_id).await?;
        let expired = self.repository.reservations.expire_stale(&mut tx, book_id, now).await?;
        if expired > 0 {
            self.recompute_priorities(&mut tx, book_id, now).await?;
            tx.commit().await?;
        }
        Ok(expired)
    }

    /// 1-based position of the user in the book's queue, if waiting
    pub async fn get_user_position(&self, user_id: i32, book_id: i32) -> AppResult<Option<i64>> {
        self.expire_book(book_id).await?;
        let queue = self.repository.reservations.queue_snapshot(book_id).await?;
        Ok(position_of(&queue, user_id))
    }

    pub async fn get(&self, id: i32) -> AppResult<ReservationDetails> {
        let mut reservation = self.repository.reservations.get_by_id(id).await?;
        if reservation.is_expired(self.clock.utc()) {
            self.expire_book(reservation.book_id).await?;
            reservation = self.repository.reservations.get_by_id(id).await?;
        }
        let position = match reservation.status {
            ReservationStatus::Pending => self.get_user_position(reservation.user_id, reservation.book_id).await?,
            _ => None,
        };
        Ok(reservation.details(self.clock.utc(), position))
    }

    /// A user's reservations, with live queue positions for pending ones
    pub async fn list_for_user(
        &self,
        user_id: i32,
        status: Option<ReservationStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<ReservationDetails>, i64)> {
        let now = self.clock.utc();
        let (rows, total) = self.repository.reservations.list_for_user(user_id, status, limit, offset).await?;

        let mut stale: Vec<i32> = rows.iter().filter(|r| r.is_expired(now)).map(|r| r.book_id).collect();
        stale.sort_unstable();
        stale.dedup();
        let (rows, total) = if stale.is_empty() {
            (rows, total)
        } else {
            for book_id in stale {
                self.expire_book(book_id).await?;
            }
            self.repository.reservations.list_for_user(user_id, status, limit, offset).await?
        };

        let mut details = Vec::with_capacity(rows.len());
        for reservation in rows {
            let position = match reservation.status {
                ReservationStatus::Pending => {
                    let queue = self.repository.reservations.queue_snapshot(reservation.book_id).await?;
                    position_of(&queue, user_id)
                }
                _ => None,
            };
            details.push(reservation.details(now, position));
        }
        Ok((details, total))
    }

    /// A book's reservations in queue order
    pub async fn list_for_book(&self, book_id: i32, status: ReservationStatus) -> AppResult<Vec<ReservationDetails>> {
        self.repository.books.get_by_id(book_id).await?;
        self.expire_book(book_id).await?;

        let now = self.clock.utc();
        let rows = self.repository.reservations.list_for_book(book_id, status).await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let position = r.priority.map(i64::from);
                r.details(now, position)
            })
            .collect())
    }

    /// Pending reservations past their expiry that no sweep has closed yet
    pub async fn list_expired(&self) -> AppResult<Vec<ReservationDetails>> {
        let now = self.clock.utc();
        let rows = self.repository.reservations.list_expired(now).await?;
        Ok(rows.into_iter().map(|r| r.details(now, None)).collect())
    }

    pub async fn stats(&self) -> AppResult<ReservationStats> {
        self.repository.reservations.stats().await
    }

    /// Expire every stale reservation, book by book. Returns the number expired.
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let mut expired = 0;
        for book_id in self.repository.reservations.books_with_stale(self.clock.utc()).await? {
            expired += self.expire_book(book_id).await?;
        }
        Ok(expired)
    }
}
