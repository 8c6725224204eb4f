//! Book catalog store: cached list queries, detail, taxonomy, and the
//! recommendation endpoints.

use std::sync::Arc;

use tracing::warn;

use shelftalk_store::Persistence;

use crate::cache::ListFilters;
use crate::error::{ApiError, ApiResult};
use crate::http::{ApiClient, ApiRequest};
use crate::resource::ResourceStore;
use crate::session::SessionManager;
use crate::types::{Book, Category, LikeStatus, MbtiRecommendation};

/// Default ordering for book list queries, fixed by the client so omitted
/// parameters always normalize to the same cache key.
pub const BOOK_ORDERING: &str = "-pub_date";

/// Client-side store for the book catalog.
pub struct BookStore {
    inner: ResourceStore<Book>,
}

impl BookStore {
    pub fn new(
        api: ApiClient,
        session: Arc<SessionManager>,
        persist: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            inner: ResourceStore::new(api, session, persist, "books", BOOK_ORDERING),
        }
    }

    /// Restore mirrored state from persistence.
    pub async fn restore(&self) -> ApiResult<()> {
        self.inner.restore().await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch books matching `filters` (read-through cache; see
    /// [`ResourceStore::fetch_list`] for the completion-order caveat).
    pub async fn fetch_books(&self, filters: &ListFilters) -> ApiResult<Vec<Book>> {
        self.inner.fetch_list(filters).await
    }

    /// Fetch one book and select it.
    pub async fn fetch_book_detail(&self, id: i64) -> ApiResult<Book> {
        self.inner.fetch_detail(id).await
    }

    /// Fetch the shared category taxonomy.
    pub async fn fetch_categories(&self) -> ApiResult<Vec<Category>> {
        self.inner.fetch_categories().await
    }

    /// Personalized recommendations (`likes` or `threads` based). Requires
    /// authentication. Replaces the current items view; recommendation
    /// results are not keyed queries and bypass the list cache.
    pub async fn recommend_personal(&self, rec_type: &str) -> ApiResult<Vec<Book>> {
        let body = self
            .inner
            .api()
            .send(
                ApiRequest::get("books/recommend/personal/")
                    .query("type", rec_type)
                    .token(self.inner.auth_token()),
            )
            .await?;
        let books: Vec<Book> = serde_json::from_value(body)?;

        self.inner.set_items(books.clone())?;
        Ok(books)
    }

    /// MBTI-based recommendations. The server answers with an envelope
    /// (type, explanation, books); the books become the current items view.
    /// Bypasses the list cache like `recommend_personal`.
    pub async fn recommend_mbti(&self, mbti: &str) -> ApiResult<MbtiRecommendation> {
        let body = self
            .inner
            .api()
            .send(
                ApiRequest::get("books/recommend/mbti/")
                    .query("mbti", mbti)
                    .token(self.inner.auth_token()),
            )
            .await?;
        let recommendation: MbtiRecommendation = serde_json::from_value(body)?;

        self.inner.set_items(recommendation.books.clone())?;
        Ok(recommendation)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Toggle the authenticated user's like on the selected book.
    ///
    /// Precondition: the selected book is the one being toggled. Only
    /// `is_liked` and `likes_count` change; every other field is untouched.
    pub async fn toggle_like(&self, id: i64) -> ApiResult<LikeStatus> {
        match self.inner.selected() {
            Some(book) if book.id == id => {}
            Some(book) => {
                return Err(ApiError::Precondition(format!(
                    "like toggle for book {id} but book {} is selected",
                    book.id
                )));
            }
            None => {
                return Err(ApiError::Precondition(format!(
                    "like toggle for book {id} with no selected book"
                )));
            }
        }

        let body = self
            .inner
            .api()
            .send(ApiRequest::post(format!("books/{id}/like/")).token(self.inner.auth_token()))
            .await?;
        let status: LikeStatus = serde_json::from_value(body)?;

        // The selection may have moved while the request was in flight; a
        // mismatch drops the patch, never the succeeded write.
        if self.inner.selected().is_some_and(|b| b.id == id) {
            self.inner
                .patch_selected(|book| {
                    book.is_liked = status.liked;
                    book.likes_count = status.likes_count;
                })
                .await?;
        } else {
            warn!(book = id, "selection changed mid-flight, like patch skipped");
        }

        Ok(status)
    }

    // -----------------------------------------------------------------------
    // State accessors
    // -----------------------------------------------------------------------

    /// The currently displayed list.
    pub fn books(&self) -> Vec<Book> {
        self.inner.items()
    }

    /// The selected detail book, if any.
    pub fn selected_book(&self) -> Option<Book> {
        self.inner.selected()
    }

    /// The cached taxonomy.
    pub fn categories(&self) -> Vec<Category> {
        self.inner.categories()
    }
}
