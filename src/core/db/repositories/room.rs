//! Room repository for database operations
//!
//! Rooms are one row each: scalar attributes plus the serialized collection
//! blobs (members, history, block list, chat log, playback settings). Writes
//! only touch the columns named by the patch.

use sqlx::MySqlPool;

use crate::core::rooms::state::RoomId;
use crate::core::rooms::store::{NewRoom, RoomPatch, RoomRecord, StoreError};

/// Shared SELECT column list, aliased to the record's field names.
const ROOM_COLUMNS: &str = "roomId AS room_id, owner, description, `limit`, is_public, closed, \
     createdTime AS created_time, videoLink AS video_link, members, \
     historyMembers AS history_members, blocked, chatRoom AS chat_room, \
     videoSettings AS video_settings";

/// Room repository for database operations
#[derive(Clone)]
pub struct RoomRepository {
    pool: MySqlPool,
}

impl RoomRepository {
    /// Create a new room repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Find a room by its numeric id
    pub async fn find_by_id(&self, room_id: RoomId) -> Result<Option<RoomRecord>, StoreError> {
        let room = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE roomId = ?"
        ))
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(room)
    }

    /// Apply a field-wise patch. Unnamed columns keep their current value.
    pub async fn update(&self, room_id: RoomId, patch: RoomPatch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE rooms
            SET members = COALESCE(?, members),
                historyMembers = COALESCE(?, historyMembers),
                blocked = COALESCE(?, blocked),
                chatRoom = COALESCE(?, chatRoom),
                videoSettings = COALESCE(?, videoSettings),
                videoLink = COALESCE(?, videoLink),
                owner = COALESCE(?, owner)
            WHERE roomId = ?
            "#,
        )
        .bind(&patch.members)
        .bind(&patch.history_members)
        .bind(&patch.blocked)
        .bind(&patch.chat_room)
        .bind(&patch.video_settings)
        .bind(&patch.video_link)
        .bind(&patch.owner)
        .bind(room_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new room row with empty collections
    pub async fn insert(&self, room: NewRoom) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rooms
                (roomId, owner, description, `limit`, is_public, videoLink,
                 members, historyMembers, blocked, chatRoom, createdTime)
            VALUES (?, ?, ?, ?, ?, ?, '[]', '[]', '[]', '[]', UTC_TIMESTAMP())
            "#,
        )
        .bind(room.room_id)
        .bind(&room.owner)
        .bind(&room.description)
        .bind(room.limit)
        .bind(room.is_public)
        .bind(&room.video_link)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Check whether a room id is already in use
    pub async fn id_taken(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rooms WHERE roomId = ?")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    /// Open public rooms not owned by the given user
    pub async fn list_public(&self, exclude_owner: &str) -> Result<Vec<RoomRecord>, StoreError> {
        let rooms = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms \
             WHERE is_public = TRUE AND closed = FALSE AND owner != ?"
        ))
        .bind(exclude_owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rooms)
    }

    /// Open rooms owned by the given user
    pub async fn list_owned(&self, owner: &str) -> Result<Vec<RoomRecord>, StoreError> {
        let rooms = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE owner = ? AND closed = FALSE"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rooms)
    }

    /// Toggle the public flag. Returns false when the room does not exist.
    pub async fn set_visibility(
        &self,
        room_id: RoomId,
        is_public: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE rooms SET is_public = ? WHERE roomId = ?")
            .bind(is_public)
            .bind(room_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-close a room. Returns false when the room does not exist.
    pub async fn close(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE rooms SET closed = TRUE WHERE roomId = ?")
            .bind(room_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Database-bound tests (require a running MySQL instance)
// Run with: cargo test -- --ignored
// ============================================================================
