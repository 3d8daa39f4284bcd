//! User repository for database operations
//!
//! Restricted to the user fields room events read and write: identity and
//! profile columns, the premium flag + expiry, the serialized gift list, the
//! experience score, and the room-creation rate-limit marker.

use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, QueryBuilder};

use crate::core::rooms::state::UserId;
use crate::core::rooms::store::{StoreError, UserRecord};

/// Shared SELECT column list, aliased to the record's field names.
const USER_COLUMNS: &str = "id, userId AS user_id, first_name, last_name, photo_url, created_at, \
     is_premium, premium_expires_at, custom_settings, gifts, exp, is_admin, \
     lastRoomCreation AS last_room_creation";

/// User repository for database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: MySqlPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Find a user by external id
    pub async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE userId = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Fetch the records for every given external id. Unknown ids are
    /// silently absent from the result.
    pub async fn find_many(&self, ids: &[UserId]) -> Result<Vec<UserRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query =
            QueryBuilder::<sqlx::MySql>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE userId IN ("));
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        query.push(")");

        let users = query
            .build_query_as::<UserRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }

    /// Set the premium flag and its expiry
    pub async fn set_premium(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET is_premium = TRUE, premium_expires_at = ? WHERE userId = ?")
            .bind(expires_at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Overwrite the user's serialized gift list
    pub async fn set_gifts(&self, user_id: &str, gifts: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET gifts = ? WHERE userId = ?")
            .bind(gifts)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Credit experience to a user
    pub async fn add_exp(&self, user_id: &str, delta: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET exp = exp + ? WHERE userId = ?")
            .bind(delta)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Stamp the room-creation rate-limit marker
    pub async fn touch_room_creation(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET lastRoomCreation = UTC_TIMESTAMP() WHERE userId = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// ============================================================================
// Database-bound tests (require a running MySQL instance)
// Run with: cargo test -- --ignored
// ============================================================================
