//! Generic per-resource-kind store: keyed list cache, a single selected
//! detail slot, and the shared category taxonomy.
//!
//! [`ResourceStore`] owns everything a resource kind caches; the book and
//! thread stores layer their mutation endpoints on top. All state is
//! mirrored to persistence on write and restored at startup; the mirror is
//! never consulted while the process is running.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use shelftalk_store::Persistence;

use crate::cache::{ListCache, ListFilters};
use crate::error::{ApiError, ApiResult};
use crate::http::{ApiClient, ApiRequest};
use crate::session::SessionManager;
use crate::types::Category;

/// The taxonomy is served by the books app and shared by every resource.
const CATEGORIES_PATH: &str = "books/categories/";

pub struct ResourceStore<T> {
    api: ApiClient,
    session: Arc<SessionManager>,
    kind: &'static str,
    lists: ListCache<T>,
    items: Mutex<Vec<T>>,
    selected: Mutex<Option<T>>,
    categories: Mutex<Vec<Category>>,
    persist: Arc<dyn Persistence>,
}

impl<T> ResourceStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        api: ApiClient,
        session: Arc<SessionManager>,
        persist: Arc<dyn Persistence>,
        kind: &'static str,
        default_ordering: &'static str,
    ) -> Self {
        Self {
            api,
            session: Arc::clone(&session),
            kind,
            lists: ListCache::new(kind, default_ordering, Arc::clone(&persist)),
            items: Mutex::new(Vec::new()),
            selected: Mutex::new(None),
            categories: Mutex::new(Vec::new()),
            persist,
        }
    }

    /// Restore mirrored list entries, the selected item, and the taxonomy.
    pub async fn restore(&self) -> ApiResult<()> {
        self.lists.restore().await?;

        if let Some(json) = self.persist.get(&self.selected_key()).await? {
            match serde_json::from_str::<T>(&json) {
                Ok(item) => *self.lock(&self.selected)? = Some(item),
                Err(err) => {
                    warn!(kind = self.kind, %err, "dropping corrupt selected mirror");
                    let _ = self.persist.delete(&self.selected_key()).await;
                }
            }
        }

        if let Some(json) = self.persist.get(&self.categories_key()).await? {
            match serde_json::from_str::<Vec<Category>>(&json) {
                Ok(categories) => *self.lock(&self.categories)? = categories,
                Err(err) => {
                    warn!(kind = self.kind, %err, "dropping corrupt categories mirror");
                    let _ = self.persist.delete(&self.categories_key()).await;
                }
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch the list for `filters`, serving from the cache when a fresh
    /// entry exists for the normalized key. The fetched (or cached) list
    /// becomes the current items view.
    ///
    /// Overlapping fetches for the same key are not fenced: entries apply
    /// in completion order, so the response that lands last wins even if it
    /// was issued first.
    pub async fn fetch_list(&self, filters: &ListFilters) -> ApiResult<Vec<T>> {
        let key = self.lists.normalize(filters);

        if let Some(entry) = self.lists.get(&key).await {
            let items = entry.items.clone();
            *self.lock(&self.items)? = items.clone();
            return Ok(items);
        }

        let body = self
            .api
            .send(
                ApiRequest::get(self.kind)
                    .query("q", &key.q)
                    .query("category", &key.category)
                    .query("ordering", &key.ordering)
                    .token(self.session.auth_token()),
            )
            .await?;
        let items: Vec<T> = serde_json::from_value(body)?;

        debug!(kind = self.kind, count = items.len(), "list fetched");
        self.lists.insert(key, items.clone()).await;
        *self.lock(&self.items)? = items.clone();
        Ok(items)
    }

    /// Fetch one item and make it the selected detail (deep replace).
    pub async fn fetch_detail(&self, id: i64) -> ApiResult<T> {
        let body = self
            .api
            .send(
                ApiRequest::get(format!("{}/{id}/", self.kind))
                    .token(self.session.auth_token()),
            )
            .await?;
        let item: T = serde_json::from_value(body)?;

        self.set_selected(Some(item.clone())).await?;
        Ok(item)
    }

    /// Fetch the shared category taxonomy (replace-only, no TTL).
    pub async fn fetch_categories(&self) -> ApiResult<Vec<Category>> {
        let body = self
            .api
            .send(ApiRequest::get(CATEGORIES_PATH).token(self.session.auth_token()))
            .await?;
        let categories: Vec<Category> = serde_json::from_value(body)?;

        *self.lock(&self.categories)? = categories.clone();
        self.mirror_json(&self.categories_key(), &categories).await;
        Ok(categories)
    }

    // -----------------------------------------------------------------------
    // State accessors
    // -----------------------------------------------------------------------

    pub fn items(&self) -> Vec<T> {
        self.items.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn selected(&self) -> Option<T> {
        self.selected.lock().ok().and_then(|s| s.clone())
    }

    pub fn categories(&self) -> Vec<Category> {
        self.categories
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub(crate) fn api(&self) -> &ApiClient {
        &self.api
    }

    pub(crate) fn auth_token(&self) -> Option<String> {
        self.session.auth_token()
    }

    // -----------------------------------------------------------------------
    // Local patches (called by mutation endpoints after a successful write)
    // -----------------------------------------------------------------------

    /// Replace the current items view, bypassing the list cache (used by
    /// recommendation fetches, which are not keyed queries).
    pub(crate) fn set_items(&self, items: Vec<T>) -> ApiResult<()> {
        *self.lock(&self.items)? = items;
        Ok(())
    }

    /// Prepend a newly created item to the current items view.
    pub(crate) fn prepend_item(&self, item: T) -> ApiResult<()> {
        self.lock(&self.items)?.insert(0, item);
        Ok(())
    }

    /// Replace the selected detail item and mirror it.
    pub(crate) async fn set_selected(&self, item: Option<T>) -> ApiResult<()> {
        *self.lock(&self.selected)? = item.clone();
        match item {
            Some(item) => self.mirror_json(&self.selected_key(), &item).await,
            None => {
                if let Err(err) = self.persist.delete(&self.selected_key()).await {
                    warn!(kind = self.kind, %err, "failed to clear selected mirror");
                }
            }
        }
        Ok(())
    }

    /// Apply an in-place patch to the selected item, if present. Returns
    /// whether a patch was applied; the mirror follows the patch.
    pub(crate) async fn patch_selected(&self, patch: impl FnOnce(&mut T)) -> ApiResult<bool> {
        let patched = {
            let mut selected = self.lock(&self.selected)?;
            match selected.as_mut() {
                Some(item) => {
                    patch(item);
                    Some(item.clone())
                }
                None => None,
            }
        };

        match patched {
            Some(item) => {
                self.mirror_json(&self.selected_key(), &item).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Structural invalidation after a mutation under `category`.
    pub(crate) async fn invalidate_for_category(&self, category: Option<i64>) {
        self.lists.invalidate_for_category(category).await;
    }

    /// Drop every cached list - for mutations whose category is unknown.
    pub(crate) async fn invalidate_all_lists(&self) {
        self.lists.invalidate_all().await;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock<'a, U>(&self, mutex: &'a Mutex<U>) -> ApiResult<MutexGuard<'a, U>> {
        mutex
            .lock()
            .map_err(|e| ApiError::Internal(format!("{} state lock poisoned: {e}", self.kind)))
    }

    fn selected_key(&self) -> String {
        format!("{}/selected", self.kind)
    }

    fn categories_key(&self) -> String {
        format!("{}/categories", self.kind)
    }

    async fn mirror_json(&self, key: &str, value: &impl Serialize) {
        match serde_json::to_string(value) {
            Ok(json) => {
                if let Err(err) = self.persist.set(key, &json).await {
                    warn!(kind = self.kind, key, %err, "failed to mirror state");
                }
            }
            Err(err) => warn!(kind = self.kind, key, %err, "failed to serialize state"),
        }
    }
}
