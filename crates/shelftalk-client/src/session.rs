//! Authenticated session management.
//!
//! [`SessionManager`] owns the token and the current user's profile, mirrors
//! both to persistence on every change, and restores them verbatim at
//! construction. It hands the token to the resource stores as a per-request
//! decoration - nothing here mutates a shared HTTP client.
//!
//! The lifecycle is a two-state machine: Anonymous → (`sign_up` | `log_in`)
//! → Authenticated → (`logout` | `fetch_user` failure | `delete_account`)
//! → Anonymous. A rejected profile fetch always forces logout so a stale
//! persisted token can never linger as "authenticated".

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use shelftalk_store::Persistence;

use crate::error::{ApiError, ApiResult};
use crate::http::{ApiClient, ApiRequest, MultipartField};
use crate::types::{FileUpload, FollowStatus, PublicProfile, SignUpForm, UserProfile};

/// Mirror key for the serialized session.
const SESSION_KEY: &str = "session/auth";

/// The persisted session shape: token plus the cached profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: Option<UserProfile>,
}

/// Owns the authentication token and current user profile.
pub struct SessionManager {
    api: ApiClient,
    persist: Arc<dyn Persistence>,
    state: Mutex<Session>,
}

impl SessionManager {
    /// Create a manager, restoring any mirrored session verbatim.
    ///
    /// The restored token is not assumed valid - call [`init_auth`] to
    /// re-validate it against the server.
    ///
    /// [`init_auth`]: SessionManager::init_auth
    pub async fn restore(api: ApiClient, persist: Arc<dyn Persistence>) -> ApiResult<Self> {
        let session = match persist.get(SESSION_KEY).await? {
            Some(json) => match serde_json::from_str::<Session>(&json) {
                Ok(session) => session,
                Err(err) => {
                    warn!(%err, "dropping corrupt session mirror");
                    let _ = persist.delete(SESSION_KEY).await;
                    Session::default()
                }
            },
            None => Session::default(),
        };

        if !session.token.is_empty() {
            debug!("restored persisted session token");
        }

        Ok(Self {
            api,
            persist,
            state: Mutex::new(session),
        })
    }

    // -----------------------------------------------------------------------
    // Derived state
    // -----------------------------------------------------------------------

    /// Whether a user profile is present - the sole definition of "logged in".
    pub fn is_logged_in(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.user.is_some())
            .unwrap_or(false)
    }

    /// The token to decorate outgoing requests with, if any.
    pub fn auth_token(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .map(|s| s.token.clone())
            .filter(|t| !t.is_empty())
    }

    /// A clone of the current profile, if authenticated.
    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.lock().ok().and_then(|s| s.user.clone())
    }

    /// A snapshot of the full session state.
    pub fn session(&self) -> Session {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Register a new account and, on success, immediately log in with the
    /// same credentials. One compound operation - the caller never sees a
    /// registered-but-not-authenticated state.
    pub async fn sign_up(&self, form: SignUpForm) -> ApiResult<()> {
        for (field, value) in [
            ("username", &form.username),
            ("email", &form.email),
            ("password1", &form.password1),
            ("password2", &form.password2),
        ] {
            if value.is_empty() {
                return Err(ApiError::InvalidInput(format!(
                    "missing required field `{field}`"
                )));
            }
        }

        self.api
            .send(ApiRequest::post("accounts/signup/").multipart(signup_fields(&form)))
            .await?;

        info!(username = %form.username, "sign-up accepted, logging in");
        self.log_in(&form.username, &form.password1).await
    }

    /// Exchange credentials for a token, then fetch the profile.
    ///
    /// On a rejected login nothing changes. A successful token exchange
    /// followed by a failed profile fetch self-heals back to Anonymous (see
    /// [`fetch_user`]) and surfaces that error.
    ///
    /// [`fetch_user`]: SessionManager::fetch_user
    pub async fn log_in(&self, username: &str, password: &str) -> ApiResult<()> {
        #[derive(Deserialize)]
        struct LoginResponse {
            key: String,
        }

        let body = self
            .api
            .send(
                ApiRequest::post("accounts/login/")
                    .json(serde_json::json!({ "username": username, "password": password })),
            )
            .await?;
        let login: LoginResponse = serde_json::from_value(body)?;

        self.lock_state()?.token = login.key;
        self.mirror().await;
        info!(username, "token acquired");

        self.fetch_user().await
    }

    /// Fetch the profile for the current token.
    ///
    /// Any failure - rejected token, transport fault, malformed body -
    /// forces a full [`logout`] before the error is returned, so the
    /// session never stays "authenticated" on a token the server rejected.
    ///
    /// [`logout`]: SessionManager::logout
    pub async fn fetch_user(&self) -> ApiResult<()> {
        let result = self
            .api
            .send(ApiRequest::get("accounts/user/").token(self.auth_token()))
            .await
            .and_then(|body| serde_json::from_value::<UserProfile>(body).map_err(ApiError::from));

        match result {
            Ok(profile) => {
                info!(username = %profile.username, "profile refreshed");
                self.lock_state()?.user = Some(profile);
                self.mirror().await;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "profile fetch failed, forcing logout");
                self.logout().await;
                Err(err)
            }
        }
    }

    /// End the session.
    ///
    /// The server-side invalidation is best-effort: its failure is logged
    /// and never surfaced. The local token, profile, and persisted mirror
    /// are cleared unconditionally.
    pub async fn logout(&self) {
        let token = self.auth_token();
        if let Err(err) = self
            .api
            .send(ApiRequest::post("accounts/logout/").token(token))
            .await
        {
            warn!(%err, "server-side logout failed; clearing local session anyway");
        }

        // Clear even through a poisoned lock - logout must not fail.
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = Session::default();
        drop(state);

        if let Err(err) = self.persist.delete(SESSION_KEY).await {
            warn!(%err, "failed to clear persisted session");
        }
        info!("session cleared");
    }

    /// Delete the account server-side, then clear the session. On failure
    /// the session stays authenticated and the error is surfaced.
    pub async fn delete_account(&self, username: &str) -> ApiResult<()> {
        self.api
            .send(
                ApiRequest::delete(format!("accounts/{username}/delete/"))
                    .token(self.auth_token()),
            )
            .await?;

        info!(username, "account deleted");
        self.logout().await;
        Ok(())
    }

    /// Update profile fields. The server's returned representation replaces
    /// the local profile wholesale.
    pub async fn update_user(&self, username: &str, patch: Value) -> ApiResult<UserProfile> {
        let body = self
            .api
            .send(
                ApiRequest::put(format!("accounts/{username}/edit/"))
                    .token(self.auth_token())
                    .json(patch),
            )
            .await?;
        let profile: UserProfile = serde_json::from_value(body)?;

        self.lock_state()?.user = Some(profile.clone());
        self.mirror().await;
        Ok(profile)
    }

    /// Upload a new profile image. The server returns only the stored image
    /// path, which is merged into the current profile.
    pub async fn update_profile_image(&self, file: FileUpload) -> ApiResult<()> {
        let fields = vec![MultipartField::file(
            "profile_image",
            file.filename,
            file.bytes,
            file.content_type,
        )];
        let body = self
            .api
            .send(
                ApiRequest::patch("accounts/user/")
                    .token(self.auth_token())
                    .multipart(fields),
            )
            .await?;

        let image = body
            .get("profile_image")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        {
            let mut state = self.lock_state()?;
            if let Some(user) = state.user.as_mut() {
                user.profile_image = image;
            }
        }
        self.mirror().await;
        Ok(())
    }

    /// Validate a restored token by fetching the profile. A restored session
    /// with no token is left anonymous; a rejected token self-heals to
    /// Anonymous via the forced logout in [`fetch_user`].
    ///
    /// [`fetch_user`]: SessionManager::fetch_user
    pub async fn init_auth(&self) -> ApiResult<()> {
        if self.auth_token().is_none() {
            debug!("no persisted token, staying anonymous");
            return Ok(());
        }
        self.fetch_user().await
    }

    // -----------------------------------------------------------------------
    // Other-user operations (no session state change)
    // -----------------------------------------------------------------------

    /// Fetch another user's public profile page payload.
    pub async fn fetch_public_profile(&self, username: &str) -> ApiResult<PublicProfile> {
        let body = self
            .api
            .send(ApiRequest::get(format!("accounts/{username}/")).token(self.auth_token()))
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Follow or unfollow another user.
    pub async fn toggle_follow(&self, username: &str) -> ApiResult<FollowStatus> {
        let body = self
            .api
            .send(
                ApiRequest::post(format!("accounts/{username}/follow/"))
                    .token(self.auth_token()),
            )
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock_state(&self) -> ApiResult<MutexGuard<'_, Session>> {
        self.state
            .lock()
            .map_err(|e| ApiError::Internal(format!("session lock poisoned: {e}")))
    }

    /// Mirror the current session to persistence. Failures are logged, not
    /// surfaced - the mirror is a restart convenience.
    async fn mirror(&self) {
        let snapshot = self.session();
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if let Err(err) = self.persist.set(SESSION_KEY, &json).await {
                    warn!(%err, "failed to mirror session");
                }
            }
            Err(err) => warn!(%err, "failed to serialize session"),
        }
    }
}

/// Build the multipart payload for sign-up: required credential fields
/// always, optional demographics only when provided, and one repeated field
/// per interested genre id.
fn signup_fields(form: &SignUpForm) -> Vec<MultipartField> {
    let mut fields = vec![
        MultipartField::text("username", form.username.clone()),
        MultipartField::text("email", form.email.clone()),
        MultipartField::text("password1", form.password1.clone()),
        MultipartField::text("password2", form.password2.clone()),
    ];

    if let Some(first_name) = &form.first_name {
        fields.push(MultipartField::text("first_name", first_name.clone()));
    }
    if let Some(last_name) = &form.last_name {
        fields.push(MultipartField::text("last_name", last_name.clone()));
    }
    if let Some(gender) = &form.gender {
        fields.push(MultipartField::text("gender", gender.clone()));
    }
    if let Some(age) = form.age {
        fields.push(MultipartField::text("age", age.to_string()));
    }
    if let Some(hours) = form.weekly_reading_time {
        fields.push(MultipartField::text("weekly_reading_time", hours.to_string()));
    }
    if let Some(volume) = form.yearly_reading_volume {
        fields.push(MultipartField::text(
            "yearly_reading_volume",
            volume.to_string(),
        ));
    }
    if let Some(image) = &form.profile_image {
        fields.push(MultipartField::file(
            "profile_image",
            image.filename.clone(),
            image.bytes.clone(),
            image.content_type.clone(),
        ));
    }
    for genre_id in &form.interested_genres {
        fields.push(MultipartField::text(
            "interested_genres",
            genre_id.to_string(),
        ));
    }

    fields
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
