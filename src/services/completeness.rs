// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile completeness rules.
//!
//! Every caller that needs to know whether a user still has to go through
//! profile setup asks this module. Cached flags are derived from it.

use crate::models::UserRecord;

/// Prefix of auto-generated usernames.
pub const PLACEHOLDER_USERNAME_PREFIX: &str = "user_";

/// Display name given to accounts without provider metadata.
pub const PLACEHOLDER_DISPLAY_NAME: &str = "New User";

/// Number of subject id characters used in a placeholder username.
const PLACEHOLDER_ID_CHARS: usize = 8;

/// Outcome of evaluating a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Complete,
    SetupNeeded,
}

impl Verdict {
    pub fn of(user: &UserRecord) -> Self {
        if is_complete(user) {
            Verdict::Complete
        } else {
            Verdict::SetupNeeded
        }
    }

    pub fn needs_setup(self) -> bool {
        self == Verdict::SetupNeeded
    }
}

/// True when the user has a real username and display name.
///
/// Case-sensitive: `User_x` is a real username, `user_x` is a placeholder.
pub fn is_complete(user: &UserRecord) -> bool {
    let username_ok =
        !user.username.is_empty() && !user.username.starts_with(PLACEHOLDER_USERNAME_PREFIX);
    let display_name_ok =
        !user.display_name.is_empty() && user.display_name != PLACEHOLDER_DISPLAY_NAME;

    username_ok && display_name_ok
}

/// Username seeded for a subject id that has no record yet: `user_<first 8 chars>`.
pub fn placeholder_username(subject_id: &str) -> String {
    let prefix: String = subject_id.chars().take(PLACEHOLDER_ID_CHARS).collect();
    format!("{}{}", PLACEHOLDER_USERNAME_PREFIX, prefix)
}
