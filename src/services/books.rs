//! Catalog service: books and their copy counters

use mockable::Clock;

use super::SharedClock;
use crate::{
    error::{AppError, AppResult},
    models::book::{availability_after_total_change, Book, BookDetails, BookQuery, CreateBook, UpdateBook},
    repository::Repository,
};

#[derive(Clone)]
pub struct BooksService {
    repository: Repository,
    clock: SharedClock,
}

impl BooksService {
    pub fn new(repository: Repository, clock: SharedClock) -> Self {
        Self { repository, clock }
    }

    /// Whether the database answers
    pub async fn ping(&self) -> AppResult<()> {
        self.repository.ping().await
    }

    /// Search the catalog
    pub async fn list(&self, query: &BookQuery) -> AppResult<(Vec<BookDetails>, i64)> {
        let (books, total) = self.repository.books.list(query).await?;
        Ok((books.into_iter().map(BookDetails::from).collect(), total))
    }

    pub async fn get(&self, id: i32) -> AppResult<BookDetails> {
        Ok(self.repository.books.get_by_id(id).await?.into())
    }

    pub async fn create(&self, data: CreateBook, added_by: i32) -> AppResult<Book> {
        let book = self.repository.books.create(&data, added_by, self.clock.utc()).await?;
        tracing::info!(book_id = book.id, copies = book.total_copies, "book added to catalog");
        Ok(book)
    }

    /// Update catalog fields. Changing the copy count resets availability.
    pub async fn update(&self, id: i32, data: UpdateBook) -> AppResult<Book> {
        let now = self.clock.utc();
        let mut tx = self.repository.begin().await?;

        let mut book = self
            .repository
            .books
            .lock(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

        if let Some(title) = data.title {
            book.title = title.trim().to_string();
        }
        if let Some(author) = data.author {
            book.author = author.trim().to_string();
        }
        if let Some(isbn) = data.isbn {
            book.isbn = Some(isbn.trim().to_string());
        }
        if let Some(description) = data.description {
            book.description = Some(description);
        }
        if let Some(status) = data.status {
            book.status = status;
        }
        if let Some(total) = data.total_copies {
            if total != book.total_copies {
                tracing::warn!(
                    book_id = id,
                    old_total = book.total_copies,
                    new_total = total,
                    available = book.available_copies,
                    "copy count changed, availability reset"
                );
                book.total_copies = total;
                book.available_copies = availability_after_total_change(total);
            }
        }

        let book = self.repository.books.update(&mut tx, &book, now).await?;
        tx.commit().await?;
        Ok(book)
    }

    /// Delete a book nobody holds or waits for
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let mut tx = self.repository.begin().await?;

        if self.repository.books.lock(&mut tx, id).await?.is_none() {
            return Err(AppError::NotFound(format!("Book {} not found", id)));
        }
        if self.repository.borrowings.book_has_open_loans(&mut tx, id).await? {
            return Err(AppError::Conflict("Book has copies out on loan".to_string()));
        }
        if self.repository.reservations.book_has_pending(&mut tx, id).await? {
            return Err(AppError::Conflict("Book has pending reservations".to_string()));
        }

        self.repository.books.delete(&mut tx, id).await?;
        tx.commit().await?;
        tracing::info!(book_id = id, "book removed from catalog");
        Ok(())
    }
}
