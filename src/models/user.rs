use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::services::access::Principal;

/// A registered account. Job ownership is keyed by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            password_hash,
            is_admin: false,
            created_at: Utc::now(),
        }
    }

    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id.to_string(),
            is_admin: self.is_admin,
        }
    }
}
