//! # shelftalk-client
//!
//! Client-side session and resource-cache layer for the shelftalk
//! book-review platform.
//!
//! The crate owns three concerns:
//!
//! - **Session** - [`SessionManager`] holds the authentication token and
//!   current profile, decorates outgoing requests with the token, and
//!   self-heals to anonymous when the server rejects it.
//! - **Resource caches** - [`BookStore`] and [`ThreadStore`] cache list
//!   queries under normalized [`ListKey`]s, keep one selected detail item
//!   each, and run structural invalidation after every local mutation.
//! - **Persistence mirroring** - all of the above is mirrored through the
//!   [`shelftalk_store::Persistence`] trait so a restart restores state
//!   without refetching.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use shelftalk_client::{ApiClient, BookStore, ReqwestBackend, SessionManager};
//! use shelftalk_store::{Database, SqliteStore};
//!
//! let db = Database::open_and_migrate("data/shelftalk.db").await?;
//! let persist = Arc::new(SqliteStore::new(db));
//! let api = ApiClient::new(Arc::new(ReqwestBackend::new("http://127.0.0.1:8000/api")));
//!
//! let session = Arc::new(SessionManager::restore(api.clone(), persist.clone()).await?);
//! session.init_auth().await.ok(); // re-validate a restored token
//!
//! let books = BookStore::new(api, session, persist);
//! let list = books.fetch_books(&Default::default()).await?;
//! ```

pub mod books;
pub mod cache;
pub mod error;
pub mod http;
pub mod resource;
pub mod session;
pub mod threads;
pub mod types;

// ── re-exports ───────────────────────────────────────────────────────

pub use books::BookStore;
pub use cache::{ListCache, ListEntry, ListFilters, ListKey};
pub use error::{ApiError, ApiResult};
pub use http::{
    ApiClient, ApiRequest, HttpBackend, HttpMethod, MultipartField, MultipartValue, RawResponse,
    RequestBody, ReqwestBackend,
};
pub use session::{Session, SessionManager};
pub use threads::ThreadStore;
pub use types::{
    Book, BookInfo, Category, Comment, FileUpload, FollowStatus, LikeStatus, MbtiRecommendation,
    PublicProfile, SignUpForm, Thread, ThreadDraft, UserProfile,
};
