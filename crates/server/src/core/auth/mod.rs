//! Authentication Module
//!
//! Handles user signup, login, and bearer session management.
//! Accounts and sessions live in SQLite at `<data_dir>/users.sqlite`.

pub mod handlers;
pub mod middleware;

use crate::core::config::ServerConfig;
use crate::core::error::{Error, Result};
use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use parley_common::UserInfo;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Session token for authenticated requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

type UserRow = (String, String, String, String);

fn user_from_row((id, name, email, created_at): UserRow) -> Result<UserInfo> {
    let created_at = created_at
        .parse()
        .map_err(|_| Error::Internal(format!("Invalid created_at for user {}", id)))?;
    Ok(UserInfo {
        id,
        name,
        email,
        created_at,
    })
}

/// Auth manager handles all authentication
pub struct AuthManager {
    pool: SqlitePool,
    hash_cost: u32,
    session_ttl: Duration,
    /// In-memory session cache
    sessions: RwLock<HashMap<String, Session>>,
}

impl AuthManager {
    /// Open (or create) the accounts database at `db_path`
    pub async fn open(db_path: &Path, config: &ServerConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            db_path.to_string_lossy().replace('\\', "/")
        ))?
        .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let manager = Self::with_pool(pool, config.hash_cost, config.session_ttl_days).await?;
        info!("[Auth] Initialized at {:?}", db_path);
        Ok(manager)
    }

    /// Private in-memory database; a single pinned connection keeps it alive
    pub async fn in_memory(hash_cost: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, hash_cost, 7).await
    }

    async fn with_pool(pool: SqlitePool, hash_cost: u32, session_ttl_days: i64) -> Result<Self> {
        let manager = Self {
            pool,
            hash_cost,
            session_ttl: Duration::days(session_ttl_days),
            sessions: RwLock::new(HashMap::new()),
        };
        manager.init_db().await?;
        Ok(manager)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a new user and open a session for them
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(UserInfo, Session)> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "name, email and password are required".to_string(),
            ));
        }

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict("User already exists".to_string()));
        }

        let password_hash = hash(password, self.hash_cost)?;
        let user = UserInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&password_hash)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let session = self.create_session(&user.id).await?;
        info!("[Auth] User registered: {}", user.name);
        Ok((user, session))
    }

    /// Login with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<(UserInfo, Session)> {
        let email = email.trim().to_lowercase();
        let row: Option<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, name, email, created_at, password_hash FROM users WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let (id, name, email, created_at, password_hash) =
            row.ok_or_else(|| Error::Unauthorized("Invalid credentials".to_string()))?;

        if !verify(password, &password_hash)? {
            warn!("[Auth] Failed login attempt for {}", email);
            return Err(Error::Unauthorized("Invalid credentials".to_string()));
        }

        let user = user_from_row((id, name, email, created_at))?;
        let session = self.create_session(&user.id).await?;
        info!("[Auth] User logged in: {}", user.name);
        Ok((user, session))
    }

    async fn create_session(&self, user_id: &str) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.session_ttl,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());

        Ok(session)
    }

    /// Resolve a bearer token to its user
    pub async fn validate_session(&self, token: &str) -> Result<UserInfo> {
        let cached = self.sessions.read().await.get(token).cloned();
        let session = match cached {
            Some(session) => session,
            None => {
                let row: Option<(String, String, String)> = sqlx::query_as(
                    "SELECT user_id, created_at, expires_at FROM sessions WHERE token = ?",
                )
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
                let (user_id, created_at, expires_at) =
                    row.ok_or_else(|| Error::Unauthorized("Invalid or expired session".to_string()))?;
                let session = Session {
                    token: token.to_string(),
                    user_id,
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                    expires_at: expires_at
                        .parse()
                        .map_err(|_| Error::Internal("Invalid session expiry".to_string()))?,
                };
                self.sessions
                    .write()
                    .await
                    .insert(session.token.clone(), session.clone());
                session
            }
        };

        if session.expires_at <= Utc::now() {
            self.sessions.write().await.remove(token);
            return Err(Error::Unauthorized("Invalid or expired session".to_string()));
        }

        self.get_user(&session.user_id)
            .await?
            .ok_or_else(|| Error::Unauthorized("Invalid or expired session".to_string()))
    }

    /// Logout user (invalidate session). Unknown tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.sessions.write().await.remove(token);

        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        info!("[Auth] Session invalidated");
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserInfo>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, name, email, created_at FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(user_from_row).transpose()
    }

    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.get_user(user_id).await?.is_some())
    }

    /// Batch lookup used to populate conversation and message views
    pub async fn users_by_ids(&self, ids: &[String]) -> Result<HashMap<String, UserInfo>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, name, email, created_at FROM users WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| user_from_row(row).map(|user| (user.id.clone(), user)))
            .collect()
    }

    /// Everyone except the caller, sorted by name
    pub async fn list_users_except(&self, caller: &str) -> Result<Vec<UserInfo>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, name, email, created_at FROM users WHERE id != ? ORDER BY name ASC",
        )
        .bind(caller)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    /// Case-insensitive substring match on name or email, excluding the caller
    pub async fn search_users(&self, caller: &str, query: &str) -> Result<Vec<UserInfo>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Err(Error::Validation("Search query is required".to_string()));
        }

        let pattern = format!("%{}%", query);
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT id, name, email, created_at FROM users
            WHERE id != ? AND (LOWER(name) LIKE ? OR LOWER(email) LIKE ?)
            ORDER BY name ASC
            "#,
        )
        .bind(caller)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(user_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> AuthManager {
        AuthManager::in_memory(crate::core::config::TEST_HASH_COST).await.unwrap()
    }

    #[tokio::test]
    async fn test_signup_then_validate() {
        let auth = manager().await;
        let (user, session) = auth.signup("Alice", "Alice@Example.com", "pw").await.unwrap();
        assert_eq!(user.email, "alice@example.com");

        let resolved = auth.validate_session(&session.token).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let auth = manager().await;
        auth.signup("Alice", "a@x.io", "pw").await.unwrap();
        let err = auth.signup("Other", "A@X.io", "pw").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password() {
        let auth = manager().await;
        auth.signup("Alice", "a@x.io", "right").await.unwrap();
        let err = auth.login("a@x.io", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(auth.login("a@x.io", "right").await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_invalidates_token() {
        let auth = manager().await;
        let (_, session) = auth.signup("Alice", "a@x.io", "pw").await.unwrap();
        auth.logout(&session.token).await.unwrap();
        auth.logout(&session.token).await.unwrap();
        assert!(auth.validate_session(&session.token).await.is_err());
    }

    #[tokio::test]
    async fn test_search_and_list_exclude_caller() {
        let auth = manager().await;
        let (alice, _) = auth.signup("Alice", "alice@x.io", "pw").await.unwrap();
        auth.signup("Bob", "bob@x.io", "pw").await.unwrap();
        auth.signup("Alfred", "alfred@y.io", "pw").await.unwrap();

        let found = auth.search_users(&alice.id, "AL").await.unwrap();
        let names: Vec<_> = found.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Alfred"]);

        let everyone = auth.list_users_except(&alice.id).await.unwrap();
        let names: Vec<_> = everyone.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Alfred", "Bob"]);

        assert!(matches!(
            auth.search_users(&alice.id, "  ").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_created_at_is_an_error() {
        let auth = manager().await;
        let (alice, _) = auth.signup("Alice", "alice@x.io", "pw").await.unwrap();
        sqlx::query("UPDATE users SET created_at = 'yesterday' WHERE id = ?")
            .bind(&alice.id)
            .execute(&auth.pool)
            .await
            .unwrap();

        assert!(matches!(auth.get_user(&alice.id).await, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_users_by_ids_skips_unknown() {
        let auth = manager().await;
        let (alice, _) = auth.signup("Alice", "alice@x.io", "pw").await.unwrap();
        let found = auth
            .users_by_ids(&[alice.id.clone(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&alice.id].name, "Alice");
    }
}
