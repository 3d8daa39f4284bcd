//! Payment ledger repository
//!
//! Append-only record of gift and premium purchases. Admin-granted gifts
//! are recorded with zero amounts.

use sqlx::MySqlPool;

use crate::core::rooms::store::{PaymentEntry, StoreError};

/// Payment repository for database operations
#[derive(Clone)]
pub struct PaymentRepository {
    pool: MySqlPool,
}

impl PaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Append one ledger entry
    pub async fn insert(&self, entry: PaymentEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payments (giftName, senderId, receiverId, forStars, forPoints, `currentTime`)
            VALUES (?, ?, ?, ?, ?, UTC_TIMESTAMP())
            "#,
        )
        .bind(&entry.gift_name)
        .bind(&entry.sender_id)
        .bind(&entry.receiver_id)
        .bind(entry.stars)
        .bind(entry.points)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
