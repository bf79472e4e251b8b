//! Database layer.
//!
//! The client core and the functions server talk to storage through the
//! [`UserDatabase`] and [`FeedDatabase`] traits. Production uses Firestore
//! (server) or the backend REST API (client, see `services::baas`); tests
//! and local development use [`MemoryDb`].

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::Result;
use crate::models::{Notification, Tweet, UserPatch, UserRecord};
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const TWEETS: &str = "tweets";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// User records and the follow graph.
#[async_trait]
pub trait UserDatabase: Send + Sync {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    async fn get_user_by_wallet(&self, address: &str) -> Result<Option<UserRecord>>;

    /// Create a record. Fails with `AppError::Conflict` if the id is taken.
    async fn create_user(&self, user: &UserRecord) -> Result<UserRecord>;

    /// Apply `patch` and return the updated record.
    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<UserRecord>;

    /// Records for `ids`, in the same order; unknown ids are skipped.
    async fn list_by_ids(&self, ids: &[String]) -> Result<Vec<UserRecord>>;

    /// Text search over username and display name.
    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<UserRecord>>;

    /// Add `follower_id` to `followed_id`'s followers and vice versa, atomically.
    async fn follow(&self, follower_id: &str, followed_id: &str) -> Result<()>;

    async fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<()>;
}

/// Posts and notifications.
#[async_trait]
pub trait FeedDatabase: Send + Sync {
    async fn create_tweet(&self, tweet: &Tweet) -> Result<Tweet>;

    /// Newest first.
    async fn list_tweets_by_authors(&self, author_ids: &[String], limit: usize)
        -> Result<Vec<Tweet>>;

    async fn create_notification(&self, notification: &Notification) -> Result<()>;

    /// Newest first.
    async fn list_notifications(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>>;

    /// Unread notifications for `user_id`, across all pages.
    async fn count_unread_notifications(&self, user_id: &str) -> Result<usize>;

    async fn mark_notifications_read(&self, user_id: &str) -> Result<()>;
}
