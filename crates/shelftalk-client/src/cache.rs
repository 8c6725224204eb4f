//! Keyed list caching with structural invalidation.
//!
//! A list query is identified by a [`ListKey`] - the normalized
//! `(q, category, ordering)` triple. The client, not the server, fixes the
//! defaults for omitted parameters, so two calls with the same effective
//! filters always map to the same key. Entries live in a `moka` cache with
//! a 5-minute TTL and are mirrored to the [`Persistence`] store so a
//! restart can restore them without refetching.
//!
//! Invalidation is structural: a mutation under category `X` drops every
//! entry whose key's category is `X` and every entry for the unfiltered
//! (`""`) view, in memory and in the mirror, leaving other categories
//! untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::form_urlencoded;

use shelftalk_store::Persistence;

use crate::error::ApiResult;

/// How long a cached list entry stays authoritative.
pub const LIST_TTL: Duration = Duration::from_secs(300);

/// Maximum number of list entries kept per resource kind.
const LIST_CAPACITY: u64 = 256;

// ---------------------------------------------------------------------------
// Keys and filters
// ---------------------------------------------------------------------------

/// Caller-supplied list filters. Omitted fields take the client-fixed
/// defaults during normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilters {
    pub q: Option<String>,
    pub category: Option<String>,
    pub ordering: Option<String>,
}

impl ListFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn q(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn ordering(mut self, ordering: impl Into<String>) -> Self {
        self.ordering = Some(ordering.into());
        self
    }

    /// Normalize into a [`ListKey`], applying the defaults: empty query,
    /// unfiltered category, and the resource's default ordering.
    pub fn normalize(&self, default_ordering: &str) -> ListKey {
        ListKey {
            q: self.q.clone().unwrap_or_default(),
            category: self.category.clone().unwrap_or_default(),
            ordering: self
                .ordering
                .clone()
                .unwrap_or_else(|| default_ordering.to_string()),
        }
    }
}

/// Normalized identity of a list query. The empty `category` is the
/// unfiltered ("all") view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub q: String,
    pub category: String,
    pub ordering: String,
}

impl ListKey {
    /// Whether a mutation under `category` makes this entry stale: the
    /// entry matches the mutated category, or it is the unfiltered view
    /// (which any mutation can reorder).
    pub fn stale_after_mutation(&self, category: Option<i64>) -> bool {
        if self.category.is_empty() {
            return true;
        }
        match category {
            Some(id) => self.category == id.to_string(),
            None => false,
        }
    }

    /// Encode into a stable string for mirror keys. Field order is fixed so
    /// the encoding is canonical.
    fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("category", &self.category)
            .append_pair("ordering", &self.ordering)
            .append_pair("q", &self.q)
            .finish()
    }

    /// Decode a mirror-key suffix produced by [`ListKey::encode`].
    fn decode(encoded: &str) -> Option<Self> {
        let mut key = Self {
            q: String::new(),
            category: String::new(),
            ordering: String::new(),
        };
        let mut seen_ordering = false;
        for (name, value) in form_urlencoded::parse(encoded.as_bytes()) {
            match name.as_ref() {
                "q" => key.q = value.into_owned(),
                "category" => key.category = value.into_owned(),
                "ordering" => {
                    key.ordering = value.into_owned();
                    seen_ordering = true;
                }
                _ => return None,
            }
        }
        seen_ordering.then_some(key)
    }
}

/// A cached list with its fetch timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntry<T> {
    pub items: Vec<T>,
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ListCache
// ---------------------------------------------------------------------------

/// Per-resource-kind cache of list queries, mirrored to persistence.
pub struct ListCache<T> {
    kind: &'static str,
    default_ordering: &'static str,
    inner: Cache<ListKey, Arc<ListEntry<T>>>,
    persist: Arc<dyn Persistence>,
}

impl<T> ListCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        kind: &'static str,
        default_ordering: &'static str,
        persist: Arc<dyn Persistence>,
    ) -> Self {
        let inner = Cache::builder()
            .max_capacity(LIST_CAPACITY)
            .time_to_live(LIST_TTL)
            .build();

        Self {
            kind,
            default_ordering,
            inner,
            persist,
        }
    }

    /// Normalize filters with this resource's default ordering.
    pub fn normalize(&self, filters: &ListFilters) -> ListKey {
        filters.normalize(self.default_ordering)
    }

    /// Look up a cached entry. Returns `None` on miss or TTL expiry.
    pub async fn get(&self, key: &ListKey) -> Option<Arc<ListEntry<T>>> {
        let hit = self.inner.get(key).await;
        debug!(
            kind = self.kind,
            category = %key.category,
            ordering = %key.ordering,
            hit = hit.is_some(),
            "list cache lookup"
        );
        hit
    }

    /// Insert a freshly fetched list for `key` and mirror it.
    ///
    /// Mirror write failures are logged, not surfaced - the mirror is a
    /// restart convenience, never a second source of truth.
    pub async fn insert(&self, key: ListKey, items: Vec<T>) {
        let entry = Arc::new(ListEntry {
            items,
            fetched_at: Utc::now(),
        });

        match serde_json::to_string(entry.as_ref()) {
            Ok(json) => {
                if let Err(err) = self.persist.set(&self.mirror_key(&key), &json).await {
                    warn!(kind = self.kind, %err, "failed to mirror list entry");
                }
            }
            Err(err) => warn!(kind = self.kind, %err, "failed to serialize list entry"),
        }

        self.inner.insert(key, entry).await;
    }

    /// Drop every entry made stale by a mutation under `category`: entries
    /// whose key matches the category, plus the unfiltered view. Entries
    /// for other categories are left intact.
    pub async fn invalidate_for_category(&self, category: Option<i64>) {
        let stale: Vec<ListKey> = self
            .inner
            .iter()
            .filter(|(key, _)| key.stale_after_mutation(category))
            .map(|(key, _)| (*key).clone())
            .collect();

        for key in &stale {
            self.inner.invalidate(key).await;
        }
        debug!(
            kind = self.kind,
            category = ?category,
            dropped = stale.len(),
            "invalidated list entries"
        );

        self.invalidate_mirror(|key| key.stale_after_mutation(category))
            .await;
    }

    /// Drop every cached list for this resource kind.
    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.invalidate_mirror(|_| true).await;
    }

    /// Restore mirrored entries into memory, skipping entries older than the
    /// TTL. Returns the number of entries restored.
    pub async fn restore(&self) -> ApiResult<usize> {
        let prefix = self.mirror_prefix();
        let keys = self.persist.keys_with_prefix(&prefix).await?;

        let mut restored = 0;
        for stored_key in keys {
            let Some(list_key) = ListKey::decode(&stored_key[prefix.len()..]) else {
                warn!(kind = self.kind, key = %stored_key, "dropping undecodable mirror key");
                let _ = self.persist.delete(&stored_key).await;
                continue;
            };

            let Some(json) = self.persist.get(&stored_key).await? else {
                continue;
            };

            match serde_json::from_str::<ListEntry<T>>(&json) {
                Ok(entry) => {
                    let age = Utc::now().signed_duration_since(entry.fetched_at);
                    if age.num_seconds() >= LIST_TTL.as_secs() as i64 {
                        let _ = self.persist.delete(&stored_key).await;
                        continue;
                    }
                    self.inner.insert(list_key, Arc::new(entry)).await;
                    restored += 1;
                }
                Err(err) => {
                    warn!(kind = self.kind, key = %stored_key, %err, "dropping corrupt mirror entry");
                    let _ = self.persist.delete(&stored_key).await;
                }
            }
        }

        debug!(kind = self.kind, restored, "list cache restored");
        Ok(restored)
    }

    // ── mirror helpers ───────────────────────────────────────────────

    fn mirror_prefix(&self) -> String {
        format!("{}/list/", self.kind)
    }

    fn mirror_key(&self, key: &ListKey) -> String {
        format!("{}{}", self.mirror_prefix(), key.encode())
    }

    async fn invalidate_mirror(&self, predicate: impl Fn(&ListKey) -> bool) {
        let prefix = self.mirror_prefix();
        let keys = match self.persist.keys_with_prefix(&prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(kind = self.kind, %err, "mirror scan failed during invalidation");
                return;
            }
        };

        for stored_key in keys {
            let drop_it = match ListKey::decode(&stored_key[prefix.len()..]) {
                Some(list_key) => predicate(&list_key),
                // Undecodable keys cannot be matched, so treat them as stale.
                None => true,
            };
            if drop_it {
                if let Err(err) = self.persist.delete(&stored_key).await {
                    warn!(kind = self.kind, key = %stored_key, %err, "failed to drop mirror entry");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
