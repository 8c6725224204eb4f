//! End-to-end scenarios for the session manager and resource stores,
//! driven through a scripted HTTP backend that records every request and
//! plays back queued responses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, oneshot};

use shelftalk_client::{
    ApiClient, ApiError, ApiRequest, ApiResult, BookStore, HttpBackend, ListFilters, RawResponse,
    RequestBody, SessionManager, SignUpForm, Thread, ThreadDraft, ThreadStore,
};
use shelftalk_store::{MemoryStore, Persistence};

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// Plays back queued responses in order and records every request.
#[derive(Default)]
struct ScriptedBackend {
    responses: Mutex<VecDeque<ApiResult<RawResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_ok(&self, status: u16, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(RawResponse { status, body }));
    }

    fn push_transport_error(&self) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Transport {
                reason: "connection refused".into(),
            }));
    }

    fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn send(&self, req: ApiRequest) -> ApiResult<RawResponse> {
        self.requests.lock().unwrap().push(req);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ApiError::Internal(
                    "unexpected request: no scripted response left".into(),
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn setup() -> (Arc<ScriptedBackend>, ApiClient, Arc<dyn Persistence>) {
    let backend = ScriptedBackend::new();
    let api = ApiClient::new(backend.clone());
    let persist: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
    (backend, api, persist)
}

fn profile_json(username: &str) -> Value {
    json!({
        "id": 1,
        "username": username,
        "email": format!("{username}@example.com"),
        "followers_count": 0,
        "followings_count": 0,
        "is_following": false
    })
}

fn thread_json(id: i64, category: i64) -> Value {
    json!({
        "id": id,
        "title": format!("thread {id}"),
        "content": "…",
        "created_at": "2025-05-01T12:00:00Z",
        "book_info": {
            "id": 10,
            "title": "some book",
            "category": { "id": category, "name": "genre" }
        },
        "likes_count": 0,
        "comments": []
    })
}

async fn restored_session(api: &ApiClient, persist: &Arc<dyn Persistence>) -> Arc<SessionManager> {
    Arc::new(
        SessionManager::restore(api.clone(), Arc::clone(persist))
            .await
            .unwrap(),
    )
}

/// Script a successful login (token exchange + profile fetch) and run it.
async fn log_in(
    backend: &ScriptedBackend,
    session: &SessionManager,
    username: &str,
) -> ApiResult<()> {
    backend.push_ok(200, json!({ "key": "tok123" }));
    backend.push_ok(200, profile_json(username));
    session.log_in(username, "hunter22").await
}

fn fiction() -> ListFilters {
    ListFilters::none().category("3")
}

fn nonfiction() -> ListFilters {
    ListFilters::none().category("4")
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_success_sets_token_and_user() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;

    log_in(&backend, &session, "alice").await.unwrap();

    assert!(session.is_logged_in());
    assert_eq!(session.auth_token().as_deref(), Some("tok123"));
    assert_eq!(session.current_user().unwrap().username, "alice");

    // The profile fetch carried the fresh token as a per-request decoration.
    let requests = backend.requests();
    assert_eq!(requests[1].path, "accounts/user/");
    assert_eq!(requests[1].token.as_deref(), Some("tok123"));

    // Persisted mirror follows the state change.
    let mirrored = persist.get("session/auth").await.unwrap().unwrap();
    assert!(mirrored.contains("tok123"));
}

#[tokio::test]
async fn login_failure_leaves_session_unchanged() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;

    backend.push_ok(400, json!({ "non_field_errors": ["bad credentials"] }));
    let err = session.log_in("alice", "wrong").await.unwrap_err();

    assert!(matches!(err, ApiError::Validation { status: 400, .. }));
    assert!(!session.is_logged_in());
    assert!(session.auth_token().is_none());
    assert!(persist.get("session/auth").await.unwrap().is_none());
}

#[tokio::test]
async fn fetch_user_failure_forces_logout() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();

    backend.push_ok(401, Value::Null); // rejected profile fetch
    backend.push_ok(200, Value::Null); // best-effort server logout
    let err = session.fetch_user().await.unwrap_err();

    assert!(err.is_auth());
    assert!(!session.is_logged_in());
    assert!(session.auth_token().is_none());
    assert!(persist.get("session/auth").await.unwrap().is_none());
}

#[tokio::test]
async fn logout_clears_state_even_when_server_fails() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();

    backend.push_ok(500, json!({ "error": "boom" }));
    session.logout().await;

    assert!(!session.is_logged_in());
    assert!(session.auth_token().is_none());
    assert!(persist.get("session/auth").await.unwrap().is_none());
}

#[tokio::test]
async fn logout_survives_transport_failure() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();

    backend.push_transport_error();
    session.logout().await;

    assert!(!session.is_logged_in());
    assert!(persist.get("session/auth").await.unwrap().is_none());
}

#[tokio::test]
async fn sign_up_chains_into_login() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;

    backend.push_ok(201, Value::Null); // signup
    backend.push_ok(200, json!({ "key": "tok123" }));
    backend.push_ok(200, profile_json("bob"));

    let form = SignUpForm {
        username: "bob".into(),
        email: "bob@example.com".into(),
        password1: "hunter22".into(),
        password2: "hunter22".into(),
        ..Default::default()
    };
    session.sign_up(form).await.unwrap();

    assert!(session.is_logged_in());
    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].path, "accounts/signup/");
    assert!(matches!(requests[0].body, RequestBody::Multipart(_)));
    assert_eq!(requests[1].path, "accounts/login/");
}

#[tokio::test]
async fn sign_up_rejects_missing_required_fields_before_any_request() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;

    let form = SignUpForm {
        username: "bob".into(),
        password1: "hunter22".into(),
        password2: "hunter22".into(),
        ..Default::default()
    };
    let err = session.sign_up(form).await.unwrap_err();

    assert!(matches!(err, ApiError::InvalidInput(_)));
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn delete_account_failure_leaves_session_authenticated() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();

    backend.push_ok(403, json!({ "error": "forbidden" }));
    let err = session.delete_account("alice").await.unwrap_err();

    assert!(err.is_auth());
    assert!(session.is_logged_in());
}

#[tokio::test]
async fn delete_account_success_clears_session() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();

    backend.push_ok(200, json!({ "message": "done" })); // delete
    backend.push_ok(200, Value::Null); // logout
    session.delete_account("alice").await.unwrap();

    assert!(!session.is_logged_in());
    assert!(persist.get("session/auth").await.unwrap().is_none());
}

#[tokio::test]
async fn session_round_trips_through_persistence() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let before = session.session();

    // A fresh manager over the same store - no network involved.
    let restored = restored_session(&api, &persist).await;
    assert_eq!(restored.session(), before);
    assert_eq!(backend.remaining(), 0);
}

#[tokio::test]
async fn init_auth_self_heals_on_stale_token() {
    let (backend, api, persist) = setup();
    persist
        .set(
            "session/auth",
            &json!({ "token": "stale", "user": profile_json("alice") }).to_string(),
        )
        .await
        .unwrap();

    let session = restored_session(&api, &persist).await;
    assert!(session.is_logged_in()); // restored verbatim, not yet validated

    backend.push_ok(401, Value::Null); // token rejected
    backend.push_ok(200, Value::Null); // best-effort server logout
    assert!(session.init_auth().await.is_err());

    assert!(!session.is_logged_in());
    assert!(persist.get("session/auth").await.unwrap().is_none());
}

#[tokio::test]
async fn init_auth_without_token_stays_anonymous_offline() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;

    session.init_auth().await.unwrap();
    assert!(!session.is_logged_in());
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn public_profile_and_follow_do_not_touch_session_state() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let before = session.session();

    backend.push_ok(
        200,
        json!({
            "user": profile_json("bob"),
            "threads": [thread_json(1, 3)],
            "liked_books": []
        }),
    );
    let profile = session.fetch_public_profile("bob").await.unwrap();
    assert_eq!(profile.user.username, "bob");
    assert_eq!(profile.threads.len(), 1);

    backend.push_ok(
        200,
        json!({
            "followed": true,
            "followers_count": 1,
            "followings_count": 0,
            "is_following": true
        }),
    );
    let status = session.toggle_follow("bob").await.unwrap();
    assert!(status.followed);

    // Neither operation mutates the local session.
    assert_eq!(session.session(), before);
}

#[tokio::test]
async fn update_user_replaces_profile_with_server_representation() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();

    let mut updated = profile_json("alice");
    updated["email"] = json!("new@example.com");
    backend.push_ok(200, updated);

    session
        .update_user("alice", json!({ "email": "new@example.com" }))
        .await
        .unwrap();
    assert_eq!(session.current_user().unwrap().email, "new@example.com");
}

#[tokio::test]
async fn update_profile_image_merges_returned_path() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();

    backend.push_ok(200, json!({ "profile_image": "profiles/alice.png" }));
    session
        .update_profile_image(shelftalk_client::FileUpload {
            filename: "alice.png".into(),
            bytes: vec![0xff, 0xd8],
            content_type: "image/png".into(),
        })
        .await
        .unwrap();

    let user = session.current_user().unwrap();
    assert_eq!(user.profile_image.as_deref(), Some("profiles/alice.png"));
    assert_eq!(user.username, "alice"); // rest of the profile untouched

    let upload = backend.requests().last().unwrap().clone();
    assert!(matches!(upload.body, RequestBody::Multipart(ref f) if f.len() == 1));
}

// ---------------------------------------------------------------------------
// Thread store: caching and invalidation
// ---------------------------------------------------------------------------

fn thread_store(api: &ApiClient, session: &Arc<SessionManager>, persist: &Arc<dyn Persistence>) -> ThreadStore {
    ThreadStore::new(api.clone(), Arc::clone(session), Arc::clone(persist))
}

#[tokio::test]
async fn list_fetch_sends_normalized_defaults() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([]));
    threads.fetch_threads(&ListFilters::none()).await.unwrap();

    let request = &backend.requests()[0];
    assert_eq!(request.path, "threads");
    assert_eq!(
        request.query,
        vec![
            ("q".to_string(), String::new()),
            ("category".to_string(), String::new()),
            ("ordering".to_string(), "-created_at".to_string()),
        ]
    );
}

#[tokio::test]
async fn repeated_list_fetch_is_served_from_cache() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([thread_json(1, 3)]));
    threads.fetch_threads(&fiction()).await.unwrap();
    let again = threads.fetch_threads(&fiction()).await.unwrap();

    assert_eq!(backend.request_count(), 1);
    assert_eq!(again.len(), 1);
}

#[tokio::test]
async fn create_thread_invalidates_its_category_and_the_unfiltered_view() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let threads = thread_store(&api, &session, &persist);

    // Warm three cached views: fiction (3), nonfiction (4), unfiltered.
    backend.push_ok(200, json!([thread_json(1, 3), thread_json(2, 3)]));
    backend.push_ok(200, json!([thread_json(3, 4)]));
    backend.push_ok(200, json!([thread_json(1, 3), thread_json(3, 4)]));
    threads.fetch_threads(&fiction()).await.unwrap();
    threads.fetch_threads(&nonfiction()).await.unwrap();
    threads.fetch_threads(&ListFilters::none()).await.unwrap();
    let warm = backend.request_count();

    backend.push_ok(201, thread_json(9, 3));
    threads
        .create_thread(&ThreadDraft {
            book: 10,
            title: "new thread".into(),
            content: "…".into(),
            reading_date: None,
        })
        .await
        .unwrap();

    // Fiction must refetch (cache miss → network call).
    backend.push_ok(200, json!([thread_json(9, 3), thread_json(1, 3)]));
    threads.fetch_threads(&fiction()).await.unwrap();
    assert_eq!(backend.request_count(), warm + 2);

    // The unfiltered view must refetch too.
    backend.push_ok(200, json!([thread_json(9, 3)]));
    threads.fetch_threads(&ListFilters::none()).await.unwrap();
    assert_eq!(backend.request_count(), warm + 3);

    // Nonfiction is still a cache hit - no scripted response consumed.
    threads.fetch_threads(&nonfiction()).await.unwrap();
    assert_eq!(backend.request_count(), warm + 3);
}

#[tokio::test]
async fn create_thread_prepends_to_current_view() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([thread_json(1, 3)]));
    threads.fetch_threads(&ListFilters::none()).await.unwrap();

    backend.push_ok(201, thread_json(9, 3));
    let created = threads
        .create_thread(&ThreadDraft {
            book: 10,
            title: "new".into(),
            content: "…".into(),
            reading_date: None,
        })
        .await
        .unwrap();

    let view = threads.threads();
    assert_eq!(view.first().map(|t| t.id), Some(created.id));
    assert_eq!(view.len(), 2);
}

#[tokio::test]
async fn failed_create_leaves_cache_and_view_untouched() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([thread_json(1, 3)]));
    threads.fetch_threads(&fiction()).await.unwrap();
    let warm = backend.request_count();

    backend.push_ok(500, json!({ "error": "boom" }));
    let err = threads
        .create_thread(&ThreadDraft {
            book: 10,
            title: "new".into(),
            content: "…".into(),
            reading_date: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Server { .. }));

    // No prepend, no invalidation: the cached entry still serves.
    assert_eq!(threads.threads().len(), 1);
    threads.fetch_threads(&fiction()).await.unwrap();
    assert_eq!(backend.request_count(), warm + 1); // only the failed POST
}

#[tokio::test]
async fn list_fetch_failure_leaves_cached_entries_and_view_intact() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([thread_json(1, 3)]));
    let fiction_list = threads.fetch_threads(&fiction()).await.unwrap();

    backend.push_transport_error();
    let err = threads.fetch_threads(&nonfiction()).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport { .. }));

    // The failed fetch disturbed neither the current view nor the cached
    // fiction entry - refetching fiction is still a cache hit.
    assert_eq!(threads.threads(), fiction_list);
    threads.fetch_threads(&fiction()).await.unwrap();
    assert_eq!(backend.request_count(), 2);
}

#[tokio::test]
async fn delete_thread_with_unknown_category_drops_every_list() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([thread_json(1, 3)]));
    backend.push_ok(200, json!([thread_json(3, 4)]));
    threads.fetch_threads(&fiction()).await.unwrap();
    threads.fetch_threads(&nonfiction()).await.unwrap();
    let warm = backend.request_count();

    // Nothing selected, so the deleted thread's category is unknown.
    backend.push_ok(204, Value::Null);
    threads.delete_thread(99).await.unwrap();

    backend.push_ok(200, json!([]));
    backend.push_ok(200, json!([]));
    threads.fetch_threads(&fiction()).await.unwrap();
    threads.fetch_threads(&nonfiction()).await.unwrap();
    assert_eq!(backend.request_count(), warm + 3);
}

#[tokio::test]
async fn update_thread_replaces_selection_and_invalidates_its_category() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([thread_json(7, 3)]));
    threads.fetch_threads(&fiction()).await.unwrap();
    backend.push_ok(200, thread_json(7, 3));
    threads.fetch_thread_detail(7).await.unwrap();
    let warm = backend.request_count();

    let mut updated = thread_json(7, 3);
    updated["title"] = json!("revised title");
    backend.push_ok(200, updated);
    threads
        .update_thread(
            7,
            &ThreadDraft {
                book: 10,
                title: "revised title".into(),
                content: "…".into(),
                reading_date: None,
            },
        )
        .await
        .unwrap();

    // Deep replace, not merge.
    assert_eq!(threads.selected_thread().unwrap().title, "revised title");

    // The thread's category was invalidated: refetch goes to the network.
    backend.push_ok(200, json!([]));
    threads.fetch_threads(&fiction()).await.unwrap();
    assert_eq!(backend.request_count(), warm + 2);
}

// ---------------------------------------------------------------------------
// Thread store: selected-detail patches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn toggle_like_changes_only_likes_count() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, thread_json(7, 3));
    threads.fetch_thread_detail(7).await.unwrap();
    let before = threads.selected_thread().unwrap();

    backend.push_ok(200, json!({ "liked": true, "likes_count": 8 }));
    let status = threads.toggle_like(7).await.unwrap();
    assert!(status.liked);

    let mut expected = before;
    expected.likes_count = 8;
    assert_eq!(threads.selected_thread().unwrap(), expected);
}

#[tokio::test]
async fn toggle_like_without_selection_is_a_precondition_violation() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    let err = threads.toggle_like(7).await.unwrap_err();
    assert!(matches!(err, ApiError::Precondition(_)));
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn toggle_like_on_mismatched_selection_is_guarded() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, thread_json(7, 3));
    threads.fetch_thread_detail(7).await.unwrap();

    let err = threads.toggle_like(9).await.unwrap_err();
    assert!(matches!(err, ApiError::Precondition(_)));
}

#[tokio::test]
async fn create_comment_appends_the_server_comment() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, thread_json(7, 3));
    threads.fetch_thread_detail(7).await.unwrap();

    backend.push_ok(
        201,
        json!({
            "id": 41,
            "content": "great read",
            "user": "alice",
            "created_at": "2025-05-02T09:00:00Z",
            "updated_at": "2025-05-02T09:00:00Z"
        }),
    );
    let comment = threads.create_comment(7, "great read").await.unwrap();

    let selected = threads.selected_thread().unwrap();
    assert_eq!(selected.comments.last(), Some(&comment));
    assert_eq!(comment.id, 41); // server-assigned, never fabricated
}

#[tokio::test]
async fn delete_comment_removes_it_from_the_selected_thread() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let threads = thread_store(&api, &session, &persist);

    let mut detail = thread_json(7, 3);
    detail["comments"] = json!([
        { "id": 41, "content": "keep me", "user": "bob" },
        { "id": 42, "content": "drop me", "user": "alice" }
    ]);
    backend.push_ok(200, detail);
    threads.fetch_thread_detail(7).await.unwrap();

    backend.push_ok(204, Value::Null);
    threads.delete_comment(42).await.unwrap();

    let comments = threads.selected_thread().unwrap().comments;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].id, 41);
}

#[tokio::test]
async fn failed_like_applies_no_patch() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, thread_json(7, 3));
    threads.fetch_thread_detail(7).await.unwrap();
    let before = threads.selected_thread().unwrap();

    backend.push_ok(401, Value::Null);
    assert!(threads.toggle_like(7).await.unwrap_err().is_auth());
    assert_eq!(threads.selected_thread().unwrap(), before);
}

// ---------------------------------------------------------------------------
// Thread store: overlap ordering
// ---------------------------------------------------------------------------

/// A backend whose responses can signal arrival and block on a gate, to pin
/// down the interleaving of overlapping fetches.
struct GatedBackend {
    script: Mutex<VecDeque<GatedResponse>>,
}

struct GatedResponse {
    body: Value,
    started: Option<oneshot::Sender<()>>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl HttpBackend for GatedBackend {
    async fn send(&self, _req: ApiRequest) -> ApiResult<RawResponse> {
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::Internal("no scripted response left".into()))?;

        if let Some(tx) = response.started {
            let _ = tx.send(());
        }
        if let Some(gate) = response.gate {
            gate.notified().await;
        }
        Ok(RawResponse {
            status: 200,
            body: response.body,
        })
    }
}

#[tokio::test]
async fn overlapping_fetches_last_completion_wins() {
    let (started_tx, started_rx) = oneshot::channel();
    let gate = Arc::new(Notify::new());

    let backend = Arc::new(GatedBackend {
        script: Mutex::new(VecDeque::from([
            GatedResponse {
                body: json!([thread_json(1, 3)]), // first issued, completes last
                started: Some(started_tx),
                gate: Some(Arc::clone(&gate)),
            },
            GatedResponse {
                body: json!([thread_json(2, 3)]), // second issued, completes first
                started: None,
                gate: None,
            },
        ])),
    });
    let api = ApiClient::new(backend);
    let persist: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
    let session = restored_session(&api, &persist).await;
    let threads = Arc::new(thread_store(&api, &session, &persist));

    // First call misses the cache and parks inside the backend.
    let first = {
        let threads = Arc::clone(&threads);
        tokio::spawn(async move { threads.fetch_threads(&fiction()).await })
    };
    started_rx.await.unwrap();

    // Second call (same key) also misses - nothing has completed yet - and
    // finishes immediately.
    let second = threads.fetch_threads(&fiction()).await.unwrap();
    assert_eq!(second[0].id, 2);

    // Release the first call; it completes last and overwrites the entry.
    gate.notify_one();
    let first: Vec<Thread> = first.await.unwrap().unwrap();
    assert_eq!(first[0].id, 1);

    // No fencing: the cache now serves the first-issued, later-completing
    // result, and so does the current view.
    let cached = threads.fetch_threads(&fiction()).await.unwrap();
    assert_eq!(cached[0].id, 1);
    assert_eq!(threads.threads()[0].id, 1);
}

// ---------------------------------------------------------------------------
// Thread store: mirror restore
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restored_store_serves_mirrored_lists_without_refetching() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;

    {
        let threads = thread_store(&api, &session, &persist);
        backend.push_ok(200, json!([thread_json(1, 3)]));
        threads.fetch_threads(&fiction()).await.unwrap();
    }

    // A fresh store over the same persistence: restore, then hit the cache.
    let threads = thread_store(&api, &session, &persist);
    threads.restore().await.unwrap();

    let list = threads.fetch_threads(&fiction()).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(backend.request_count(), 1); // the original fetch only
}

// ---------------------------------------------------------------------------
// Book store
// ---------------------------------------------------------------------------

fn book_json(id: i64, category: i64) -> Value {
    json!({
        "id": id,
        "title": format!("book {id}"),
        "subTitle": "",
        "author": "someone",
        "pub_date": "2020-01-01",
        "category": { "id": category, "name": "genre" },
        "is_liked": false,
        "likes_count": 3,
        "customer_review_rank": 4.5
    })
}

#[tokio::test]
async fn book_lists_are_cached_per_normalized_key() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let books = BookStore::new(api.clone(), Arc::clone(&session), Arc::clone(&persist));

    backend.push_ok(200, json!([book_json(1, 3)]));
    books.fetch_books(&ListFilters::none().q("dune")).await.unwrap();
    books.fetch_books(&ListFilters::none().q("dune")).await.unwrap();
    assert_eq!(backend.request_count(), 1);

    // Books default to their own ordering.
    assert_eq!(
        backend.requests()[0].query[2],
        ("ordering".to_string(), "-pub_date".to_string())
    );
}

#[tokio::test]
async fn mbti_recommendation_replaces_view_but_not_cache() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let books = BookStore::new(api.clone(), Arc::clone(&session), Arc::clone(&persist));

    backend.push_ok(200, json!([book_json(1, 3)]));
    books.fetch_books(&fiction()).await.unwrap();
    let warm = backend.request_count();

    backend.push_ok(
        200,
        json!({
            "mbti": "INTP",
            "reason": "curious minds",
            "books": [book_json(5, 5), book_json(6, 1)]
        }),
    );
    let rec = books.recommend_mbti("intp").await.unwrap();
    assert_eq!(rec.mbti, "INTP");
    assert_eq!(books.books().len(), 2);

    // The keyed cache is untouched by the recommendation fetch.
    books.fetch_books(&fiction()).await.unwrap();
    assert_eq!(backend.request_count(), warm + 1);
}

#[tokio::test]
async fn invalid_mbti_surfaces_as_validation() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let books = BookStore::new(api, session, persist);

    backend.push_ok(400, json!({ "error": "unknown MBTI type" }));
    let err = books.recommend_mbti("zzzz").await.unwrap_err();
    assert!(matches!(err, ApiError::Validation { status: 400, .. }));
    assert!(books.books().is_empty());
}

#[tokio::test]
async fn personal_recommendations_require_authentication() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let books = BookStore::new(api, session, persist);

    backend.push_ok(401, Value::Null);
    let err = books.recommend_personal("likes").await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn book_like_patches_selected_fields_only() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    log_in(&backend, &session, "alice").await.unwrap();
    let books = BookStore::new(api.clone(), Arc::clone(&session), Arc::clone(&persist));

    backend.push_ok(200, book_json(1, 3));
    books.fetch_book_detail(1).await.unwrap();
    let before = books.selected_book().unwrap();

    backend.push_ok(200, json!({ "liked": true, "likes_count": 4 }));
    books.toggle_like(1).await.unwrap();

    let mut expected = before;
    expected.is_liked = true;
    expected.likes_count = 4;
    assert_eq!(books.selected_book().unwrap(), expected);
}

#[tokio::test]
async fn categories_come_from_the_shared_taxonomy_endpoint() {
    let (backend, api, persist) = setup();
    let session = restored_session(&api, &persist).await;
    let threads = thread_store(&api, &session, &persist);

    backend.push_ok(200, json!([{ "id": 3, "name": "fiction" }]));
    let categories = threads.fetch_categories().await.unwrap();

    assert_eq!(categories.len(), 1);
    assert_eq!(backend.requests()[0].path, "books/categories/");
    assert_eq!(threads.categories(), categories);
}
