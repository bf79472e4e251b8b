//! In-memory database for tests and local development.

use crate::db::{FeedDatabase, UserDatabase};
use crate::error::{AppError, Result};
use crate::models::{Notification, Tweet, UserPatch, UserRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local database with the same semantics as the Firestore backend.
#[derive(Default)]
pub struct MemoryDb {
    users: RwLock<HashMap<String, UserRecord>>,
    tweets: RwLock<Vec<Tweet>>,
    notifications: RwLock<Vec<Notification>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserDatabase for MemoryDb {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_user_by_wallet(&self, address: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.wallet_address.as_deref() == Some(address))
            .cloned())
    }

    async fn create_user(&self, user: &UserRecord) -> Result<UserRecord> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(AppError::Conflict(format!("User {} already exists", user.id)));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(user.clone())
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<UserRecord> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("User {}", id)))?;
        patch.apply_to(user);
        Ok(user.clone())
    }

    async fn list_by_ids(&self, ids: &[String]) -> Result<Vec<UserRecord>> {
        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<UserRecord>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let users = self.users.read().await;
        let mut matches: Vec<UserRecord> = users
            .values()
            .filter(|u| {
                u.username.to_lowercase().contains(&needle)
                    || u.display_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.username.cmp(&b.username));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn follow(&self, follower_id: &str, followed_id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        if !users.contains_key(follower_id) || !users.contains_key(followed_id) {
            return Err(AppError::NotFound(format!(
                "User {} or {}",
                follower_id, followed_id
            )));
        }

        if let Some(follower) = users.get_mut(follower_id) {
            if !follower.following.iter().any(|id| id == followed_id) {
                follower.following.push(followed_id.to_string());
            }
        }
        if let Some(followed) = users.get_mut(followed_id) {
            if !followed.followers.iter().any(|id| id == follower_id) {
                followed.followers.push(follower_id.to_string());
            }
        }
        Ok(())
    }

    async fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        if let Some(follower) = users.get_mut(follower_id) {
            follower.following.retain(|id| id != followed_id);
        }
        if let Some(followed) = users.get_mut(followed_id) {
            followed.followers.retain(|id| id != follower_id);
        }
        Ok(())
    }
}

#[async_trait]
impl FeedDatabase for MemoryDb {
    async fn create_tweet(&self, tweet: &Tweet) -> Result<Tweet> {
        self.tweets.write().await.push(tweet.clone());
        Ok(tweet.clone())
    }

    async fn list_tweets_by_authors(
        &self,
        author_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Tweet>> {
        let tweets = self.tweets.read().await;
        let mut matches: Vec<Tweet> = tweets
            .iter()
            .filter(|t| author_ids.contains(&t.author_id))
            .cloned()
            .collect();
        // RFC 3339 UTC timestamps sort lexicographically.
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        let notifications = self.notifications.read().await;
        let mut matches: Vec<Notification> = notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn count_unread_notifications(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count())
    }

    async fn mark_notifications_read(&self, user_id: &str) -> Result<()> {
        for n in self
            .notifications
            .write()
            .await
            .iter_mut()
            .filter(|n| n.user_id == user_id)
        {
            n.read = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, username: &str) -> UserRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "username": username,
            "display_name": username.to_uppercase(),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_is_keyed_on_id() {
        let db = MemoryDb::new();
        db.create_user(&user("a", "alice")).await.unwrap();
        let err = db.create_user(&user("a", "other")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(db.user_count().await, 1);
    }

    #[tokio::test]
    async fn follow_updates_both_sides_once() {
        let db = MemoryDb::new();
        db.create_user(&user("a", "alice")).await.unwrap();
        db.create_user(&user("b", "bob")).await.unwrap();

        db.follow("a", "b").await.unwrap();
        db.follow("a", "b").await.unwrap();

        let a = db.get_user_by_id("a").await.unwrap().unwrap();
        let b = db.get_user_by_id("b").await.unwrap().unwrap();
        assert_eq!(a.following, vec!["b".to_string()]);
        assert_eq!(b.followers, vec!["a".to_string()]);

        db.unfollow("a", "b").await.unwrap();
        let b = db.get_user_by_id("b").await.unwrap().unwrap();
        assert!(b.followers.is_empty());
    }

    #[tokio::test]
    async fn search_matches_username_and_display_name() {
        let db = MemoryDb::new();
        db.create_user(&user("a", "alice")).await.unwrap();
        db.create_user(&user("b", "bob")).await.unwrap();

        let found = db.search_users("ALI", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
        assert!(db.search_users("  ", 10).await.unwrap().is_empty());
    }
}
