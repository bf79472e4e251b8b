//! Auth session as observed by the client.

use serde::{Deserialize, Serialize};

/// Credential issued by the auth provider.
///
/// The orchestrator only looks at presence and `subject_id`; token internals
/// belong to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Stable user identifier
    pub subject_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as a unix timestamp (seconds)
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Provider-supplied profile metadata (OAuth name, picture, ...)
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl Session {
    /// True if the access token expires within `margin_secs` of `now`.
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at
            .map(|expires_at| now + margin_secs >= expires_at)
            .unwrap_or(false)
    }
}
