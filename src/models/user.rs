//! User model for storage, cache and API.

use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

/// Application-level user profile.
///
/// The `id` equals the auth session's subject id and never changes once linked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserRecord {
    /// Session subject id (also used as document ID)
    pub id: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub header_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// When the user first signed in (RFC 3339)
    #[serde(default, deserialize_with = "null_to_default")]
    pub join_date: String,
    #[serde(default)]
    pub verified: bool,
    /// Ids this user follows
    #[serde(default, deserialize_with = "null_to_default")]
    pub following: Vec<String>,
    /// Ids following this user
    #[serde(default, deserialize_with = "null_to_default")]
    pub followers: Vec<String>,
    /// Hex-encoded wallet public key, if one was linked
    #[serde(default)]
    pub wallet_address: Option<String>,
}

/// Database rows may carry explicit nulls for columns we model as plain values.
fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Name and picture supplied by the auth provider (e.g. OAuth profile).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderMetadata {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProviderMetadata {
    /// Extract what we can from provider metadata; anything malformed is ignored.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            display_name: text(&["full_name", "name"]),
            avatar_url: text(&["avatar_url", "picture"]),
        }
    }
}

/// Partial update of a user record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == UserPatch::default()
    }

    /// Apply this patch to a record in place.
    pub fn apply_to(&self, user: &mut UserRecord) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(display_name) = &self.display_name {
            user.display_name = display_name.clone();
        }
        if let Some(bio) = &self.bio {
            user.bio = Some(bio.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
        if let Some(header_url) = &self.header_url {
            user.header_url = Some(header_url.clone());
        }
        if let Some(wallet_address) = &self.wallet_address {
            user.wallet_address = Some(wallet_address.clone());
        }
    }
}

/// Profile setup form submitted by a new user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProfileSetupForm {
    #[validate(
        length(min = 3, max = 30, message = "Username must be 3-30 characters"),
        custom(function = "validate_username_chars")
    )]
    pub username: String,

    #[validate(length(min = 1, max = 50, message = "Display name must be 1-50 characters"))]
    pub display_name: String,

    #[validate(length(max = 160, message = "Bio must be at most 160 characters"))]
    pub bio: Option<String>,

    #[validate(url(message = "Invalid avatar URL"))]
    pub avatar_url: Option<String>,

    #[validate(url(message = "Invalid header URL"))]
    pub header_url: Option<String>,
}

impl ProfileSetupForm {
    /// Convert the (already validated) form into a patch with trimmed values.
    pub fn into_patch(self) -> UserPatch {
        let trimmed = |s: Option<String>| {
            s.map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        UserPatch {
            username: Some(self.username.trim().to_string()),
            display_name: Some(self.display_name.trim().to_string()),
            bio: trimmed(self.bio),
            avatar_url: trimmed(self.avatar_url),
            header_url: trimmed(self.header_url),
            wallet_address: None,
        }
    }
}

fn validate_username_chars(username: &str) -> Result<(), ValidationError> {
    if username
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("username_chars");
        err.message = Some("Username may only contain letters, numbers and underscores".into());
        Err(err)
    }
}
