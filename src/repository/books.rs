//! Books repository: catalog rows and the availability counters

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use super::on_unique_violation;
use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookQuery, BookStatus, CreateBook},
};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// List books with optional filters and pagination
    pub async fn list(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let paging = query.paging();

        let status = query
            .status
            .as_deref()
            .map(str::parse::<BookStatus>)
            .transpose()
            .map_err(AppError::Validation)?;
        let search = query
            .search
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| format!("%{}%", s.trim()));

        let mut conditions = Vec::new();
        let mut idx = 1;
        if search.is_some() {
            conditions.push(format!("(title ILIKE ${0} OR author ILIKE ${0})", idx));
            idx += 1;
        }
        if status.is_some() {
            conditions.push(format!("status = ${}", idx));
        }
        if query.available == Some(true) {
            conditions.push("available_copies > 0".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_q = format!("SELECT COUNT(*) FROM books {}", where_clause);
        let mut count_builder = sqlx::query_scalar::<_, i64>(&count_q);
        if let Some(ref s) = search { count_builder = count_builder.bind(s); }
        if let Some(st) = status { count_builder = count_builder.bind(st); }
        let total = count_builder.fetch_one(&self.pool).await?;

        let select_q = format!(
            "SELECT * FROM books {} ORDER BY title, id LIMIT {} OFFSET {}",
            where_clause,
            paging.limit(),
            paging.offset()
        );
        let mut builder = sqlx::query_as::<_, Book>(&select_q);
        if let Some(ref s) = search { builder = builder.bind(s); }
        if let Some(st) = status { builder = builder.bind(st); }

        let rows = builder.fetch_all(&self.pool).await?;
        Ok((rows, total))
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))
    }

    /// Lock the book row for the rest of the transaction.
    ///
    /// Every borrow, return and queue change for a book goes through this
    /// lock, which serialises them per book.
    pub async fn lock(&self, conn: &mut PgConnection, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(book)
    }

    /// Create a book with every copy on the shelf
    pub async fn create(
        &self,
        data: &CreateBook,
        added_by: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Book> {
        let total = data.total_copies.unwrap_or(1);
        sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (
                title, author, isbn, description, total_copies, available_copies,
                status, added_by, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(data.title.trim())
        .bind(data.author.trim())
        .bind(data.isbn.as_deref().map(str::trim))
        .bind(&data.description)
        .bind(total)
        .bind(data.status.unwrap_or_default())
        .bind(added_by)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| on_unique_violation(e, || AppError::Conflict("A book with this ISBN already exists".to_string())))
    }

    /// Persist catalog fields and counters of a locked book
    pub async fn update(&self, conn: &mut PgConnection, book: &Book, now: DateTime<Utc>) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = $2, author = $3, isbn = $4, description = $5,
                total_copies = $6, available_copies = $7, status = $8, updated_at = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.description)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.status)
        .bind(now)
        .fetch_optional(conn)
        .await
        .map_err(|e| on_unique_violation(e, || AppError::Conflict("A book with this ISBN already exists".to_string())))?
        .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book.id)))
    }

    /// Delete a book
    pub async fn delete(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book {} not found", id)));
        }
        Ok(())
    }

    /// Take one copy off the shelf. Returns false when none is left.
    pub async fn take_copy(&self, conn: &mut PgConnection, id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = available_copies - 1,
                borrow_count = borrow_count + 1,
                last_borrowed = $2,
                updated_at = $2
            WHERE id = $1 AND available_copies > 0
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Set the shelf count of a locked book
    pub async fn set_available(
        &self,
        conn: &mut PgConnection,
        id: i32,
        available: i32,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE books SET available_copies = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(available)
            .bind(now)
            .execute(conn)
            .await?;
        Ok(())
    }
}
