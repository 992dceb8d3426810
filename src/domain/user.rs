//! User and per-provider OAuth credential rows.

use super::{Id, TimeMs};
use serde::{Deserialize, Serialize};

/// Owner of all tenant data. Role is carried in the auth token, not the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub settings: serde_json::Value,
    pub info: serde_json::Value,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
    pub deleted_at: Option<TimeMs>,
}

impl User {
    /// Build a fresh user row with empty settings/info objects.
    pub fn new(username: String, email: String) -> Self {
        let now = TimeMs::now();
        User {
            id: Id::generate(),
            username,
            email,
            avatar: None,
            settings: serde_json::json!({}),
            info: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// One credential record per (user, provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub id: Id,
    pub user_id: Id,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<TimeMs>,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let u = User::new("alice".into(), "alice@example.com".into());
        assert!(u.deleted_at.is_none());
        assert_eq!(u.settings, serde_json::json!({}));
        assert_eq!(u.created_at, u.updated_at);
    }
}
