// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Social service: profiles, follows, posts and notifications.
//!
//! Plain request/response over the database traits. Failures propagate to
//! the caller, which shows them as notices.

use crate::db::{FeedDatabase, UserDatabase};
use crate::error::{AppError, Result};
use crate::models::{NewTweet, Notification, NotificationKind, Tweet, UserRecord};
use crate::services::orchestrator::first_validation_message;
use crate::time_utils::format_utc_rfc3339;
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

/// Largest page any list call returns.
pub const MAX_PAGE_SIZE: usize = 100;

pub struct SocialService {
    users: Arc<dyn UserDatabase>,
    feed: Arc<dyn FeedDatabase>,
}

impl SocialService {
    pub fn new(users: Arc<dyn UserDatabase>, feed: Arc<dyn FeedDatabase>) -> Self {
        Self { users, feed }
    }

    pub async fn profile(&self, user_id: &str) -> Result<UserRecord> {
        self.users
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))
    }

    pub async fn profile_by_username(&self, username: &str) -> Result<UserRecord> {
        self.users
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User @{}", username)))
    }

    /// Follow `target_id` and let them know.
    pub async fn follow(&self, actor_id: &str, target_id: &str) -> Result<()> {
        if actor_id == target_id {
            return Err(AppError::BadRequest(
                "You cannot follow yourself".to_string(),
            ));
        }

        self.users.follow(actor_id, target_id).await?;
        tracing::info!(actor_id, target_id, "Followed user");

        // The follow stands even if the notification cannot be written.
        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: target_id.to_string(),
            actor_id: actor_id.to_string(),
            kind: NotificationKind::Follow,
            tweet_id: None,
            created_at: format_utc_rfc3339(Utc::now()),
            read: false,
        };
        if let Err(e) = self.feed.create_notification(&notification).await {
            tracing::warn!(actor_id, target_id, error = %e, "Failed to create follow notification");
        }
        Ok(())
    }

    pub async fn unfollow(&self, actor_id: &str, target_id: &str) -> Result<()> {
        self.users.unfollow(actor_id, target_id).await?;
        tracing::info!(actor_id, target_id, "Unfollowed user");
        Ok(())
    }

    pub async fn followers(&self, user_id: &str) -> Result<Vec<UserRecord>> {
        let user = self.profile(user_id).await?;
        self.users.list_by_ids(&user.followers).await
    }

    pub async fn following(&self, user_id: &str) -> Result<Vec<UserRecord>> {
        let user = self.profile(user_id).await?;
        self.users.list_by_ids(&user.following).await
    }

    /// Users whose username or display name matches `query`.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<UserRecord>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.users.search_users(query, clamp_limit(limit)).await
    }

    pub async fn post_tweet(&self, author_id: &str, new_tweet: NewTweet) -> Result<Tweet> {
        new_tweet
            .validate()
            .map_err(|e| AppError::BadRequest(first_validation_message(&e)))?;

        let content = new_tweet.content.trim().to_string();
        if content.is_empty() {
            return Err(AppError::BadRequest(
                "Posts must be 1-280 characters".to_string(),
            ));
        }

        let tweet = Tweet {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            content,
            image_url: new_tweet.image_url,
            created_at: format_utc_rfc3339(Utc::now()),
            likes: 0,
        };

        let tweet = self.feed.create_tweet(&tweet).await?;
        tracing::info!(author_id, tweet_id = %tweet.id, "Tweet posted");
        Ok(tweet)
    }

    /// Posts by `user_id` and everyone they follow, newest first.
    pub async fn home_feed(&self, user_id: &str, limit: usize) -> Result<Vec<Tweet>> {
        let user = self.profile(user_id).await?;

        let mut authors = user.following;
        if !authors.iter().any(|id| id == user_id) {
            authors.push(user_id.to_string());
        }

        self.feed
            .list_tweets_by_authors(&authors, clamp_limit(limit))
            .await
    }

    pub async fn user_tweets(&self, user_id: &str, limit: usize) -> Result<Vec<Tweet>> {
        self.feed
            .list_tweets_by_authors(&[user_id.to_string()], clamp_limit(limit))
            .await
    }

    pub async fn notifications(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        self.feed
            .list_notifications(user_id, clamp_limit(limit))
            .await
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<usize> {
        self.feed.count_unread_notifications(user_id).await
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Result<()> {
        self.feed.mark_notifications_read(user_id).await
    }
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_SIZE)
}
