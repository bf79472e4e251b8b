//! Feed and notification models.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// A short post in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub author_id: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    /// RFC 3339
    pub created_at: String,
    #[serde(default)]
    pub likes: u32,
}

/// Post composition request.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewTweet {
    #[validate(length(min = 1, max = 280, message = "Posts must be 1-280 characters"))]
    pub content: String,
    #[validate(url(message = "Invalid image URL"))]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Like,
    Tip,
    Mention,
}

/// Notification delivered to `user_id` about something `actor_id` did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub actor_id: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub tweet_id: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub read: bool,
}
