//! Book model and the availability ledger rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{text_column, ListQuery};

/// Book circulation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    #[default]
    Available,
    Unavailable,
    Maintenance,
    Lost,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::Unavailable => "unavailable",
            BookStatus::Maintenance => "maintenance",
            BookStatus::Lost => "lost",
        }
    }
}

impl std::str::FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(BookStatus::Available),
            "unavailable" => Ok(BookStatus::Unavailable),
            "maintenance" => Ok(BookStatus::Maintenance),
            "lost" => Ok(BookStatus::Lost),
            _ => Err(format!("Invalid book status: {}", s)),
        }
    }
}

text_column!(BookStatus);

/// Book record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub description: Option<String>,
    pub total_copies: i32,
    pub available_copies: i32,
    pub status: BookStatus,
    pub borrow_count: i32,
    pub last_borrowed: Option<DateTime<Utc>>,
    pub added_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// A copy can go out right now
    pub fn is_available(&self) -> bool {
        self.available_copies > 0 && self.status == BookStatus::Available
    }
}

/// Book with derived fields, as returned by the API
#[derive(Debug, Serialize, ToSchema)]
pub struct BookDetails {
    #[serde(flatten)]
    pub book: Book,
    pub is_available: bool,
}

impl From<Book> for BookDetails {
    fn from(book: Book) -> Self {
        Self {
            is_available: book.is_available(),
            book,
        }
    }
}

/// Available copies after a change of the total.
///
/// Editing the copy count resets availability to the new total; loans
/// still outstanding are not carried over.
pub fn availability_after_total_change(new_total: i32) -> i32 {
    new_total
}

/// Available copies after a copy comes back, never above the total
pub fn availability_after_return(available: i32, total: i32) -> i32 {
    (available + 1).min(total)
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 200, message = "Title is required (max 200 characters)"))]
    pub title: String,
    #[validate(length(min = 1, max = 100, message = "Author is required (max 100 characters)"))]
    pub author: String,
    #[validate(length(min = 10, max = 32, message = "Invalid ISBN"))]
    pub isbn: Option<String>,
    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
    #[validate(range(min = 1, message = "Must have at least 1 copy"))]
    pub total_copies: Option<i32>,
    pub status: Option<BookStatus>,
}

/// Update book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 200, message = "Title cannot be empty (max 200 characters)"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Author cannot be empty (max 100 characters)"))]
    pub author: Option<String>,
    #[validate(length(min = 10, max = 32, message = "Invalid ISBN"))]
    pub isbn: Option<String>,
    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
    #[validate(range(min = 1, message = "Must have at least 1 copy"))]
    pub total_copies: Option<i32>,
    pub status: Option<BookStatus>,
}

/// Catalog search parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct BookQuery {
    /// Matches title or author (case-insensitive)
    pub search: Option<String>,
    pub status: Option<String>,
    /// Only books with a copy on the shelf
    pub available: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl BookQuery {
    /// Page window of the catalog listing, twenty books by default
    pub fn paging(&self) -> ListQuery {
        ListQuery {
            status: None,
            page: self.page,
            limit: Some(self.limit.unwrap_or(20)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(total: i32, available: i32, status: BookStatus) -> Book {
        let now = Utc::now();
        Book {
            id: 1,
            title: "Kronikë në gur".into(),
            author: "Ismail Kadare".into(),
            isbn: None,
            description: None,
            total_copies: total,
            available_copies: available,
            status,
            borrow_count: 0,
            last_borrowed: None,
            added_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn availability_requires_copy_and_status() {
        assert!(book(2, 1, BookStatus::Available).is_available());
        assert!(!book(2, 0, BookStatus::Available).is_available());
        assert!(!book(2, 2, BookStatus::Maintenance).is_available());
    }

    #[test]
    fn return_never_exceeds_total() {
        assert_eq!(availability_after_return(0, 1), 1);
        assert_eq!(availability_after_return(1, 1), 1);
        // total edited down to 2 while three loans were out
        assert_eq!(availability_after_total_change(2), 2);
        assert_eq!(availability_after_return(2, 2), 2);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Maintenance".parse::<BookStatus>(), Ok(BookStatus::Maintenance));
        assert!("shelved".parse::<BookStatus>().is_err());
    }

    #[test]
    fn details_serialize_flat() {
        let json = serde_json::to_value(BookDetails::from(book(1, 1, BookStatus::Available))).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["is_available"], true);
        assert_eq!(json["total_copies"], 1);
    }

    #[test]
    fn catalog_paging_defaults_to_twenty_and_survives_huge_pages() {
        let query = BookQuery { page: Some(3), ..BookQuery::default() };
        assert_eq!(query.paging().limit(), 20);
        assert_eq!(query.paging().offset(), 40);

        let huge = BookQuery { page: Some(i64::MAX), limit: Some(50), ..BookQuery::default() };
        assert_eq!(huge.paging().offset(), i64::MAX);
    }
}
