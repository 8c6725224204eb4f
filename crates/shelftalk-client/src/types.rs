//! Wire types for the shelftalk platform API.
//!
//! Field names mirror the server's JSON exactly; timestamps and media paths
//! are kept as the raw strings the server sends (display-URL derivation is a
//! presentation concern, not ours). Unknown response fields are ignored so
//! server-side additions do not break deserialization.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

/// A book genre/category. Shared between books and threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// The authenticated user's profile, as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub weekly_reading_time: Option<i64>,
    #[serde(default)]
    pub yearly_reading_volume: Option<i64>,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub interested_genres: Vec<String>,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub followings_count: i64,
    #[serde(default)]
    pub is_following: bool,
}

/// An uploaded file (profile image): raw bytes plus upload metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Input to `sign_up`. Optional fields are sent only when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignUpForm {
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub weekly_reading_time: Option<i64>,
    pub yearly_reading_volume: Option<i64>,
    pub profile_image: Option<FileUpload>,
    pub interested_genres: Vec<i64>,
}

/// Response of the follow toggle endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowStatus {
    pub followed: bool,
    pub followers_count: i64,
    pub followings_count: i64,
    pub is_following: bool,
}

/// A user's public profile page payload: the profile plus their threads and
/// liked books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicProfile {
    pub user: UserProfile,
    #[serde(default)]
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub liked_books: Vec<Book>,
}

// ---------------------------------------------------------------------------
// Books
// ---------------------------------------------------------------------------

/// A catalog book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    #[serde(rename = "subTitle", default)]
    pub sub_title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub pub_date: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub author_info: Option<String>,
    #[serde(default)]
    pub author_works: Option<String>,
    #[serde(default)]
    pub author_photo: Option<String>,
    /// Raw server path; the presentation layer derives a playable URL.
    #[serde(default)]
    pub tts_audio: Option<String>,
    #[serde(default)]
    pub customer_review_rank: f64,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub thread_set: Vec<Thread>,
}

/// The MBTI recommendation envelope: the matched type, the server's
/// explanation, and the recommended books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MbtiRecommendation {
    pub mbti: String,
    pub reason: String,
    pub books: Vec<Book>,
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

/// The book a thread discusses, nested in thread responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookInfo {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub pub_date: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub category: Option<Category>,
}

/// A comment on a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub content: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// A discussion thread about a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reading_date: Option<String>,
    #[serde(default)]
    pub cover_img: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub book_info: Option<BookInfo>,
    #[serde(default)]
    pub user_info: Option<UserProfile>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Thread {
    /// The id of the category this thread's book belongs to, if known.
    pub fn category_id(&self) -> Option<i64> {
        self.book_info
            .as_ref()
            .and_then(|info| info.category.as_ref())
            .map(|category| category.id)
    }
}

/// Input to `create_thread` / `update_thread`. `book` is the book's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDraft {
    pub book: i64,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_date: Option<String>,
}

/// Response of the like toggle endpoints (books and threads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeStatus {
    pub liked: bool,
    pub likes_count: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
