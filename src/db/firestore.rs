// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile storage and the follow graph)
//! - Tweets (feed posts)
//! - Notifications

use crate::db::{collections, FeedDatabase, UserDatabase};
use crate::error::AppError;
use crate::models::{Notification, Tweet, UserPatch, UserRecord};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};

const MAX_CONCURRENT_DB_OPS: usize = 50;
// Firestore limits `in` filters to 30 values.
const IN_FILTER_LIMIT: usize = 30;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Find the first user whose `field` equals `value`.
    async fn find_user_by(&self, field: &'static str, value: &str) -> Result<Option<UserRecord>, AppError> {
        let value = value.to_string();
        let users: Vec<UserRecord> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(move |q| q.field(field).eq(value.clone()))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(users.into_iter().next())
    }

    async fn unread_notifications(&self, user_id: &str) -> Result<Vec<Notification>, AppError> {
        let owner = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::NOTIFICATIONS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(owner.clone()),
                    q.field("read").eq(false),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn write_user(&self, user: &UserRecord) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Rewrite the follow sets of two users in one transaction.
    async fn update_follow_edge(
        &self,
        follower_id: &str,
        followed_id: &str,
        add: bool,
    ) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut follower = self
            .get_user_by_id(follower_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", follower_id)))?;
        let mut followed = self
            .get_user_by_id(followed_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", followed_id)))?;

        follower.following.retain(|id| id != followed_id);
        followed.followers.retain(|id| id != follower_id);
        if add {
            follower.following.push(followed_id.to_string());
            followed.followers.push(follower_id.to_string());
        }

        for user in [&follower, &followed] {
            client
                .fluent()
                .update()
                .in_col(collections::USERS)
                .document_id(&user.id)
                .object(user)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add user to transaction: {}", e))
                })?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl UserDatabase for FirestoreDb {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, AppError> {
        self.find_user_by("username", username).await
    }

    async fn get_user_by_wallet(&self, address: &str) -> Result<Option<UserRecord>, AppError> {
        self.find_user_by("wallet_address", address).await
    }

    async fn create_user(&self, user: &UserRecord) -> Result<UserRecord, AppError> {
        self.get_client()?
            .fluent()
            .insert()
            .into(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| match e {
                firestore::errors::FirestoreError::DataConflictError(_) => {
                    AppError::Conflict(format!("User {} already exists", user.id))
                }
                other => AppError::Database(other.to_string()),
            })
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<UserRecord, AppError> {
        // Fetch-modify-write to preserve fields the patch does not touch
        let mut user = self
            .get_user_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", id)))?;
        patch.apply_to(&mut user);
        self.write_user(&user).await?;
        Ok(user)
    }

    async fn list_by_ids(&self, ids: &[String]) -> Result<Vec<UserRecord>, AppError> {
        let results = stream::iter(ids.to_vec())
            .map(|id| async move { self.get_user_by_id(&id).await })
            .buffered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<Option<UserRecord>, AppError>>>()
            .await;

        let mut users = Vec::with_capacity(results.len());
        for result in results {
            if let Some(user) = result? {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Prefix search on username (Firestore has no substring queries).
    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<UserRecord>, AppError> {
        let start = query.trim().to_lowercase();
        if start.is_empty() {
            return Ok(Vec::new());
        }
        let end = format!("{}\u{f8ff}", start);

        self.get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(move |q| {
                q.for_all([
                    q.field("username").greater_than_or_equal(start.clone()),
                    q.field("username").less_than(end.clone()),
                ])
            })
            .order_by([("username", firestore::FirestoreQueryDirection::Ascending)])
            .limit(limit as u32)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn follow(&self, follower_id: &str, followed_id: &str) -> Result<(), AppError> {
        self.update_follow_edge(follower_id, followed_id, true).await
    }

    async fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<(), AppError> {
        self.update_follow_edge(follower_id, followed_id, false).await
    }
}

#[async_trait]
impl FeedDatabase for FirestoreDb {
    async fn create_tweet(&self, tweet: &Tweet) -> Result<Tweet, AppError> {
        self.get_client()?
            .fluent()
            .insert()
            .into(collections::TWEETS)
            .document_id(&tweet.id)
            .object(tweet)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_tweets_by_authors(
        &self,
        author_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Tweet>, AppError> {
        let client = self.get_client()?;
        let mut tweets = Vec::new();

        for chunk in author_ids.chunks(IN_FILTER_LIMIT) {
            let chunk = chunk.to_vec();
            let page: Vec<Tweet> = client
                .fluent()
                .select()
                .from(collections::TWEETS)
                .filter(move |q| q.field("author_id").is_in(chunk.clone()))
                .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
                .limit(limit as u32)
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            tweets.extend(page);
        }

        tweets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tweets.truncate(limit);
        Ok(tweets)
    }

    async fn create_notification(&self, notification: &Notification) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::NOTIFICATIONS)
            .document_id(&notification.id)
            .object(notification)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Notification>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::NOTIFICATIONS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .limit(limit as u32)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn count_unread_notifications(&self, user_id: &str) -> Result<usize, AppError> {
        Ok(self.unread_notifications(user_id).await?.len())
    }

    async fn mark_notifications_read(&self, user_id: &str) -> Result<(), AppError> {
        let unread = self.unread_notifications(user_id).await?;

        stream::iter(unread)
            .map(|mut notification| async move {
                notification.read = true;
                self.create_notification(&notification).await
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<(), AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AppError>>()?;

        tracing::debug!(user_id, "Notifications marked read");
        Ok(())
    }
}
