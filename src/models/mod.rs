//! Data models and lending rules

pub mod book;
pub mod borrowing;
pub mod fine;
pub mod reservation;
pub mod user;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub use book::{Book, BookStatus};
pub use borrowing::{Borrowing, BorrowingDetails, BorrowingStatus};
pub use reservation::{Reservation, ReservationDetails, ReservationStatus};
pub use user::{Role, UserClaims};

/// Millisecond length of one day, used by every day-count rule
pub(crate) const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Whole days from `from` to `to`, rounded up. Negative when `to` is earlier.
pub(crate) fn ceil_days(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> i64 {
    let ms = (to - from).num_milliseconds();
    -((-ms).div_euclid(DAY_MS))
}

/// Stores a lowercase status enum as a TEXT column.
macro_rules! text_column {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s: &str = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
                s.parse().map_err(|e: String| e.into())
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_column;

/// Paging and status filter shared by list endpoints
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListQuery {
    /// Filter by status
    pub status: Option<String>,
    /// Page number (1-based)
    pub page: Option<i64>,
    /// Items per page
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(10).clamp(1, 100)
    }

    /// Rows to skip; saturates so an absurd page reads as past the end
    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }
}

/// Pagination block returned alongside list pages
#[derive(Debug, Serialize, ToSchema)]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total: i64,
}

impl Pagination {
    pub fn new(query: &ListQuery, total: i64) -> Self {
        let limit = query.limit();
        Self {
            current_page: query.page(),
            total_pages: (total + limit - 1) / limit,
            total,
        }
    }
}
