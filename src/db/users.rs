//! Account records for the login endpoints.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::store::StoreError;
use crate::models::user::User;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`StoreError::UsernameTaken`] if the username exists.
    async fn create(&self, user: &User) -> Result<(), StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        is_admin: row.try_get("is_admin")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, is_admin, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UsernameTaken(user.username.clone()));
        }
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, is_admin, created_at \
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

/// In-process accounts keyed by username.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.lock().await;
        if users.contains_key(&user.username) {
            return Err(StoreError::UsernameTaken(user.username.clone()));
        }
        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().await.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_usernames_are_unique() {
        let store = MemoryUserStore::new();
        store
            .create(&User::new("alice", "hash-1".into()))
            .await
            .unwrap();

        let err = store
            .create(&User::new("alice", "hash-2".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UsernameTaken(ref name) if name == "alice"));

        let stored = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash-1");
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }
}
