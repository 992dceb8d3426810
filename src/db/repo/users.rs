//! User and OAuth token operations.

use crate::domain::{Id, OAuthToken, TimeMs, User};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Insert a user row.
    ///
    /// # Errors
    /// Returns an error if the insert fails (including live-row username or
    /// email collisions).
    pub async fn create_user(&self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, avatar, settings, info, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.avatar.as_deref())
        .bind(user.settings.to_string())
        .bind(user.info.to_string())
        .bind(user.created_at.as_i64())
        .bind(user.updated_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a live user by id.
    pub async fn get_user(&self, id: &Id) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, avatar, settings, info, created_at, updated_at, deleted_at
            FROM users
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_user))
    }

    /// Insert or refresh the credential row for `(user, provider)`.
    pub async fn upsert_oauth_token(&self, token: &OAuthToken) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO oauth_tokens
                (id, user_id, provider, access_token, refresh_token, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(token.id.as_str())
        .bind(token.user_id.as_str())
        .bind(&token.provider)
        .bind(&token.access_token)
        .bind(token.refresh_token.as_deref())
        .bind(token.expires_at.map(|t| t.as_i64()))
        .bind(token.created_at.as_i64())
        .bind(token.updated_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the credential row for `(user, provider)`.
    pub async fn get_oauth_token(
        &self,
        user_id: &Id,
        provider: &str,
    ) -> Result<Option<OAuthToken>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, provider, access_token, refresh_token, expires_at, created_at, updated_at
            FROM oauth_tokens
            WHERE user_id = ? AND provider = ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| OAuthToken {
            id: Id::new(r.get("id")),
            user_id: Id::new(r.get("user_id")),
            provider: r.get("provider"),
            access_token: r.get("access_token"),
            refresh_token: r.get("refresh_token"),
            expires_at: r.get::<Option<i64>, _>("expires_at").map(TimeMs::new),
            created_at: TimeMs::new(r.get("created_at")),
            updated_at: TimeMs::new(r.get("updated_at")),
        }))
    }
}

fn map_user(row: &SqliteRow) -> User {
    let id: String = row.get("id");
    let settings_str: String = row.get("settings");
    let info_str: String = row.get("info");

    let settings = serde_json::from_str(&settings_str).unwrap_or_else(|e| {
        warn!(user_id = %id, error = %e, "Failed to parse user settings JSON, using empty object");
        serde_json::json!({})
    });
    let info = serde_json::from_str(&info_str).unwrap_or_else(|e| {
        warn!(user_id = %id, error = %e, "Failed to parse user info JSON, using empty object");
        serde_json::json!({})
    });

    User {
        id: Id::new(id),
        username: row.get("username"),
        email: row.get("email"),
        avatar: row.get("avatar"),
        settings,
        info,
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
        deleted_at: row.get::<Option<i64>, _>("deleted_at").map(TimeMs::new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path, 5).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let (repo, _temp) = setup_test_db().await;

        let user = User::new("alice".into(), "alice@example.com".into());
        repo.create_user(&user).await.expect("insert failed");

        let fetched = repo.get_user(&user.id).await.expect("query failed");
        assert_eq!(fetched, Some(user));
    }

    #[tokio::test]
    async fn test_get_missing_user_returns_none() {
        let (repo, _temp) = setup_test_db().await;
        let fetched = repo.get_user(&Id::generate()).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_upsert_oauth_token_replaces() {
        let (repo, _temp) = setup_test_db().await;

        let user = User::new("bob".into(), "bob@example.com".into());
        repo.create_user(&user).await.unwrap();

        let now = TimeMs::now();
        let mut token = OAuthToken {
            id: Id::generate(),
            user_id: user.id.clone(),
            provider: "github".into(),
            access_token: "tok-1".into(),
            refresh_token: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        };
        repo.upsert_oauth_token(&token).await.unwrap();

        token.access_token = "tok-2".into();
        repo.upsert_oauth_token(&token).await.unwrap();

        let fetched = repo
            .get_oauth_token(&user.id, "github")
            .await
            .unwrap()
            .expect("token missing");
        assert_eq!(fetched.access_token, "tok-2");
    }
}
