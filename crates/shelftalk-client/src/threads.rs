//! Discussion-thread store: cached list queries, detail, and the full
//! mutation surface (create, update, delete, like, comments).
//!
//! Every successful mutation applies its minimal local patch and then runs
//! the structural invalidation rule: the thread's category plus the
//! unfiltered view, leaving other categories' cached lists untouched.

use std::sync::Arc;

use tracing::{info, warn};

use shelftalk_store::Persistence;

use crate::cache::ListFilters;
use crate::error::{ApiError, ApiResult};
use crate::http::{ApiClient, ApiRequest};
use crate::resource::ResourceStore;
use crate::session::SessionManager;
use crate::types::{Category, Comment, LikeStatus, Thread, ThreadDraft};

/// Default ordering for thread list queries.
pub const THREAD_ORDERING: &str = "-created_at";

/// Client-side store for discussion threads.
pub struct ThreadStore {
    inner: ResourceStore<Thread>,
}

impl ThreadStore {
    pub fn new(
        api: ApiClient,
        session: Arc<SessionManager>,
        persist: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            inner: ResourceStore::new(api, session, persist, "threads", THREAD_ORDERING),
        }
    }

    /// Restore mirrored state from persistence.
    pub async fn restore(&self) -> ApiResult<()> {
        self.inner.restore().await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch threads matching `filters` (read-through cache; see
    /// [`ResourceStore::fetch_list`] for the completion-order caveat).
    pub async fn fetch_threads(&self, filters: &ListFilters) -> ApiResult<Vec<Thread>> {
        self.inner.fetch_list(filters).await
    }

    /// Fetch one thread and select it.
    pub async fn fetch_thread_detail(&self, id: i64) -> ApiResult<Thread> {
        self.inner.fetch_detail(id).await
    }

    /// Fetch the shared category taxonomy.
    pub async fn fetch_categories(&self) -> ApiResult<Vec<Category>> {
        self.inner.fetch_categories().await
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a thread. On success the server-returned thread is prepended
    /// to the current items view (optimistic visibility without a refetch)
    /// and every cached list it could appear in - its category and the
    /// unfiltered view - is dropped so filtered views refetch instead of
    /// silently diverging.
    pub async fn create_thread(&self, draft: &ThreadDraft) -> ApiResult<Thread> {
        let body = self
            .inner
            .api()
            .send(
                ApiRequest::post("threads/")
                    .token(self.inner.auth_token())
                    .json(serde_json::to_value(draft)?),
            )
            .await?;
        let thread: Thread = serde_json::from_value(body)?;

        info!(thread = thread.id, "thread created");
        self.inner.prepend_item(thread.clone())?;
        self.inner
            .invalidate_for_category(thread.category_id())
            .await;
        Ok(thread)
    }

    /// Update a thread. The returned representation deep-replaces the
    /// selected item, then the category/all invalidation runs.
    pub async fn update_thread(&self, id: i64, draft: &ThreadDraft) -> ApiResult<Thread> {
        let body = self
            .inner
            .api()
            .send(
                ApiRequest::put(format!("threads/{id}/"))
                    .token(self.inner.auth_token())
                    .json(serde_json::to_value(draft)?),
            )
            .await?;
        let thread: Thread = serde_json::from_value(body)?;

        self.inner.set_selected(Some(thread.clone())).await?;
        self.inner
            .invalidate_for_category(thread.category_id())
            .await;
        Ok(thread)
    }

    /// Delete a thread. The local patch is a no-op beyond invalidation:
    /// when the selected thread is the deleted one its category scopes the
    /// invalidation, otherwise every cached list for threads is dropped.
    pub async fn delete_thread(&self, id: i64) -> ApiResult<()> {
        self.inner
            .api()
            .send(ApiRequest::delete(format!("threads/{id}/")).token(self.inner.auth_token()))
            .await?;

        info!(thread = id, "thread deleted");
        match self.inner.selected().filter(|t| t.id == id) {
            Some(thread) => {
                self.inner
                    .invalidate_for_category(thread.category_id())
                    .await;
            }
            None => self.inner.invalidate_all_lists().await,
        }
        Ok(())
    }

    /// Toggle the authenticated user's like on the selected thread.
    ///
    /// Precondition: the selected thread is the one being toggled - a
    /// mismatch is a caller bug, not something to silently ignore. On
    /// success only `likes_count` changes.
    pub async fn toggle_like(&self, id: i64) -> ApiResult<LikeStatus> {
        self.require_selected(id, "like toggle")?;

        let body = self
            .inner
            .api()
            .send(ApiRequest::post(format!("threads/{id}/like/")).token(self.inner.auth_token()))
            .await?;
        let status: LikeStatus = serde_json::from_value(body)?;

        // The selection may have moved while the request was in flight; a
        // mismatch drops the patch, never the succeeded write.
        if self.inner.selected().is_some_and(|t| t.id == id) {
            self.inner
                .patch_selected(|thread| thread.likes_count = status.likes_count)
                .await?;
        } else {
            warn!(thread = id, "selection changed mid-flight, like patch skipped");
        }

        Ok(status)
    }

    /// Add a comment to the selected thread. The server-returned comment -
    /// with its authoritative id and timestamps - is appended to
    /// `selected.comments`; nothing is fabricated locally.
    pub async fn create_comment(&self, id: i64, content: &str) -> ApiResult<Comment> {
        self.require_selected(id, "comment")?;

        let body = self
            .inner
            .api()
            .send(
                ApiRequest::post(format!("threads/{id}/comments/"))
                    .token(self.inner.auth_token())
                    .json(serde_json::json!({ "content": content })),
            )
            .await?;
        let comment: Comment = serde_json::from_value(body)?;

        if self.inner.selected().is_some_and(|t| t.id == id) {
            let appended = comment.clone();
            self.inner
                .patch_selected(move |thread| thread.comments.push(appended))
                .await?;
        } else {
            warn!(thread = id, "selection changed mid-flight, comment patch skipped");
        }

        Ok(comment)
    }

    /// Delete a comment. When the selected thread holds it, it is removed
    /// in place.
    pub async fn delete_comment(&self, comment_id: i64) -> ApiResult<()> {
        self.inner
            .api()
            .send(
                ApiRequest::delete(format!("threads/comments/{comment_id}/"))
                    .token(self.inner.auth_token()),
            )
            .await?;

        self.inner
            .patch_selected(|thread| thread.comments.retain(|c| c.id != comment_id))
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State accessors
    // -----------------------------------------------------------------------

    /// The currently displayed list.
    pub fn threads(&self) -> Vec<Thread> {
        self.inner.items()
    }

    /// The selected detail thread, if any.
    pub fn selected_thread(&self) -> Option<Thread> {
        self.inner.selected()
    }

    /// The cached taxonomy.
    pub fn categories(&self) -> Vec<Category> {
        self.inner.categories()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require_selected(&self, id: i64, operation: &str) -> ApiResult<()> {
        match self.inner.selected() {
            Some(thread) if thread.id == id => Ok(()),
            Some(thread) => Err(ApiError::Precondition(format!(
                "{operation} for thread {id} but thread {} is selected",
                thread.id
            ))),
            None => Err(ApiError::Precondition(format!(
                "{operation} for thread {id} with no selected thread"
            ))),
        }
    }
}
