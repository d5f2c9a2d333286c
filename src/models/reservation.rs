//! Reservation model and the per-book waiting queue

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::{borrowing::BorrowingDetails, ceil_days, text_column};
use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
};

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Fulfilled,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationEvent {
    Fulfill,
    Cancel,
    Expire,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }

    /// Only pending reservations move; every other state is final.
    pub fn transition(self, event: ReservationEvent) -> AppResult<ReservationStatus> {
        match (self, event) {
            (ReservationStatus::Pending, ReservationEvent::Fulfill) => Ok(ReservationStatus::Fulfilled),
            (ReservationStatus::Pending, ReservationEvent::Cancel) => Ok(ReservationStatus::Cancelled),
            (ReservationStatus::Pending, ReservationEvent::Expire) => Ok(ReservationStatus::Expired),
            (from, event) => Err(AppError::InvalidState(format!(
                "Cannot apply {:?} to a {} reservation, only pending reservations can change",
                event, from
            ))),
        }
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "fulfilled" => Ok(ReservationStatus::Fulfilled),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "expired" => Ok(ReservationStatus::Expired),
            _ => Err(format!("Invalid reservation status: {}", s)),
        }
    }
}

text_column!(ReservationStatus);

/// Reservation record from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Reservation {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub reservation_date: DateTime<Utc>,
    pub status: ReservationStatus,
    /// 1-based rank in the book's queue, cleared once the reservation leaves it
    pub priority: Option<i32>,
    pub expiry_date: DateTime<Utc>,
    pub notification_sent: bool,
    pub fulfilled_date: Option<DateTime<Utc>>,
    pub cancelled_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub processed_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Expiry of a reservation made at `reserved_at`
pub fn expiry_for(reserved_at: DateTime<Utc>, rules: &LendingConfig) -> DateTime<Utc> {
    reserved_at + Duration::days(rules.reservation_hold_days)
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now > self.expiry_date
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        (self.status == ReservationStatus::Pending).then(|| ceil_days(now, self.expiry_date))
    }

    /// Apply a queue event. Leaving the queue clears the cached priority.
    pub fn apply(&mut self, event: ReservationEvent, actor: Option<i32>, now: DateTime<Utc>) -> AppResult<()> {
        let next = self.status.transition(event)?;
        match next {
            ReservationStatus::Fulfilled => {
                self.fulfilled_date = Some(now);
                self.processed_by = actor;
            }
            ReservationStatus::Cancelled => self.cancelled_date = Some(now),
            _ => {}
        }
        self.status = next;
        self.priority = None;
        Ok(())
    }

    /// Flip a pending reservation past its expiry date. Returns whether it changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired(now) {
            return false;
        }
        // is_expired implies pending, so the transition is legal
        self.apply(ReservationEvent::Expire, None, now).is_ok()
    }

    pub fn details(self, now: DateTime<Utc>, position: Option<i64>) -> ReservationDetails {
        ReservationDetails {
            is_expired: self.is_expired(now),
            days_until_expiry: self.days_until_expiry(now),
            position,
            reservation: self,
        }
    }
}

/// A pending queue entry as seen by the ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct QueueEntry {
    pub id: i32,
    pub user_id: i32,
    pub reservation_date: DateTime<Utc>,
}

/// Assign 1-based priorities in reservation order; ties break on id.
pub fn rank_queue(mut entries: Vec<QueueEntry>) -> Vec<(i32, i32)> {
    entries.sort_by(|a, b| {
        a.reservation_date
            .cmp(&b.reservation_date)
            .then(a.id.cmp(&b.id))
    });
    entries
        .iter()
        .zip(1..)
        .map(|(entry, rank)| (entry.id, rank))
        .collect()
}

/// 1-based queue position of `user_id`, if the user is waiting
pub fn position_of(entries: &[QueueEntry], user_id: i32) -> Option<i64> {
    let ranked = rank_queue(entries.to_vec());
    let id = entries.iter().find(|e| e.user_id == user_id)?.id;
    ranked
        .iter()
        .find(|(entry_id, _)| *entry_id == id)
        .map(|(_, rank)| i64::from(*rank))
}

/// Facts gathered before a reservation is created
#[derive(Debug, Clone)]
pub struct ReserveCheck {
    pub book_id: i32,
    pub book_exists: bool,
    pub has_pending_reservation: bool,
    pub has_active_borrowing: bool,
}

impl ReserveCheck {
    pub fn verify(&self) -> AppResult<()> {
        if !self.book_exists {
            return Err(AppError::NotFound(format!("Book {} not found", self.book_id)));
        }
        if self.has_pending_reservation {
            return Err(AppError::DuplicateReservation(self.book_id));
        }
        if self.has_active_borrowing {
            return Err(AppError::AlreadyBorrowed(self.book_id));
        }
        Ok(())
    }
}

/// Reservation with fields derived at read time
#[derive(Debug, Serialize, ToSchema)]
pub struct ReservationDetails {
    #[serde(flatten)]
    pub reservation: Reservation,
    /// Live queue position for pending reservations
    pub position: Option<i64>,
    pub days_until_expiry: Option<i64>,
    pub is_expired: bool,
}

/// Result of fulfilling a reservation and lending the copy in one step
#[derive(Debug, Serialize, ToSchema)]
pub struct FulfilledLoan {
    pub reservation: ReservationDetails,
    pub borrowing: BorrowingDetails,
}

/// Reserve request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReservation {
    #[validate(range(min = 1, message = "Book ID is required"))]
    pub book_id: i32,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
}

/// Counters over every reservation ever recorded
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ReservationStats {
    pub total: i64,
    pub pending: i64,
    pub fulfilled: i64,
    pub cancelled: i64,
    pub expired: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap()
    }

    fn entry(id: i32, user_id: i32, minutes: i64) -> QueueEntry {
        QueueEntry {
            id,
            user_id,
            reservation_date: now() + Duration::minutes(minutes),
        }
    }

    fn pending(id: i32) -> Reservation {
        Reservation {
            id,
            user_id: 2,
            book_id: 3,
            reservation_date: now(),
            status: ReservationStatus::Pending,
            priority: Some(1),
            expiry_date: expiry_for(now(), &LendingConfig::default()),
            notification_sent: false,
            fulfilled_date: None,
            cancelled_date: None,
            notes: None,
            processed_by: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn queue_is_ranked_by_reservation_date() {
        let ranked = rank_queue(vec![entry(30, 3, 20), entry(10, 1, 0), entry(20, 2, 10)]);
        assert_eq!(ranked, vec![(10, 1), (20, 2), (30, 3)]);
    }

    #[test]
    fn ranks_are_contiguous_after_n_reservations() {
        let entries: Vec<_> = (1..=6).map(|i| entry(i, 100 + i, i64::from(i))).collect();
        let ranks: Vec<i32> = rank_queue(entries).into_iter().map(|(_, r)| r).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn cancelling_shifts_later_entries_down_by_one() {
        let queue = vec![entry(1, 11, 0), entry(2, 12, 1), entry(3, 13, 2), entry(4, 14, 3)];
        let before = rank_queue(queue.clone());

        // cancel priority 2
        let after = rank_queue(queue.into_iter().filter(|e| e.id != 2).collect());
        assert_eq!(after, vec![(1, 1), (3, 2), (4, 3)]);
        for (id, rank) in after {
            let old = before.iter().find(|(i, _)| *i == id).map(|(_, r)| *r).unwrap();
            assert_eq!(rank, if old > 2 { old - 1 } else { old });
        }
    }

    #[test]
    fn same_timestamp_breaks_ties_on_id() {
        let ranked = rank_queue(vec![entry(9, 1, 0), entry(4, 2, 0)]);
        assert_eq!(ranked, vec![(4, 1), (9, 2)]);
    }

    #[test]
    fn position_is_none_for_users_not_waiting() {
        let queue = vec![entry(1, 11, 5), entry(2, 12, 0)];
        assert_eq!(position_of(&queue, 11), Some(2));
        assert_eq!(position_of(&queue, 12), Some(1));
        assert_eq!(position_of(&queue, 99), None);
    }

    #[test]
    fn expiry_is_one_week_after_reservation() {
        let reservation = pending(1);
        assert_eq!(reservation.expiry_date, now() + Duration::days(7));
        assert_eq!(reservation.days_until_expiry(now()), Some(7));
        assert!(!reservation.is_expired(now() + Duration::days(7)));
        assert!(reservation.is_expired(now() + Duration::days(7) + Duration::seconds(1)));
    }

    #[test]
    fn lazy_expiry_only_touches_stale_pending_reservations() {
        let mut fresh = pending(1);
        assert!(!fresh.expire_if_due(now() + Duration::days(1)));
        assert_eq!(fresh.status, ReservationStatus::Pending);

        let mut stale = pending(2);
        assert!(stale.expire_if_due(now() + Duration::days(8)));
        assert_eq!(stale.status, ReservationStatus::Expired);
        assert_eq!(stale.priority, None);
        assert_eq!(stale.days_until_expiry(now()), None);
    }

    #[test]
    fn cancel_and_fulfill_record_dates_and_clear_priority() {
        let mut cancelled = pending(1);
        cancelled.apply(ReservationEvent::Cancel, Some(2), now()).unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.cancelled_date, Some(now()));
        assert_eq!(cancelled.priority, None);
        assert!(matches!(
            cancelled.apply(ReservationEvent::Fulfill, Some(5), now()),
            Err(AppError::InvalidState(_))
        ));

        let mut fulfilled = pending(2);
        fulfilled.apply(ReservationEvent::Fulfill, Some(5), now()).unwrap();
        assert_eq!(fulfilled.fulfilled_date, Some(now()));
        assert_eq!(fulfilled.processed_by, Some(5));
    }

    #[test]
    fn reserve_checks_run_in_order() {
        let all_wrong = ReserveCheck {
            book_id: 3,
            book_exists: false,
            has_pending_reservation: true,
            has_active_borrowing: true,
        };
        assert!(matches!(all_wrong.verify(), Err(AppError::NotFound(_))));

        let exists = ReserveCheck { book_exists: true, ..all_wrong };
        assert!(matches!(exists.verify(), Err(AppError::DuplicateReservation(3))));

        let borrowed = ReserveCheck { has_pending_reservation: false, ..exists };
        assert!(matches!(borrowed.verify(), Err(AppError::AlreadyBorrowed(3))));

        let ok = ReserveCheck { has_active_borrowing: false, ..borrowed };
        assert!(ok.verify().is_ok());
    }
}
