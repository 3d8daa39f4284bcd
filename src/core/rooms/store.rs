//! The persistence interface the synchronization core needs.
//!
//! The store itself is external; the core only relies on key lookup,
//! conditional field update, and the listing queries defined here. The
//! MySQL implementation lives in `core::db`, and the pipeline tests run
//! against an in-memory implementation.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::state::{RoomId, RoomState, UserId};
use super::state::{decode_chat, decode_ids, decode_video_settings};

// ============================================================================
// Records
// ============================================================================

/// A room row as persisted: scalar attributes plus the collection blobs.
#[derive(Debug, Clone, FromRow)]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub owner: UserId,
    pub description: String,
    pub limit: i64,
    pub is_public: bool,
    pub closed: bool,
    pub created_time: DateTime<Utc>,
    pub video_link: Option<String>,
    pub members: Option<String>,
    pub history_members: Option<String>,
    pub blocked: Option<String>,
    pub chat_room: Option<String>,
    pub video_settings: Option<String>,
}

impl RoomRecord {
    /// Decode the collection blobs into a mutable [`RoomState`].
    pub fn decode_state(&self) -> RoomState {
        RoomState {
            members: decode_ids(self.members.as_deref()),
            history_members: decode_ids(self.history_members.as_deref()),
            blocked: decode_ids(self.blocked.as_deref()),
            chat: decode_chat(self.chat_room.as_deref()),
            video_settings: decode_video_settings(self.video_settings.as_deref()),
        }
    }
}

/// A user row, restricted to the fields room events read and write.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_premium: bool,
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub custom_settings: Option<String>,
    pub gifts: Option<String>,
    pub exp: i64,
    pub is_admin: bool,
    pub last_room_creation: Option<DateTime<Utc>>,
}

/// Field-wise room update. `None` leaves the column untouched; the write is
/// a blind last-writer-wins overwrite of the named fields only.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub members: Option<String>,
    pub history_members: Option<String>,
    pub blocked: Option<String>,
    pub chat_room: Option<String>,
    pub video_settings: Option<String>,
    pub video_link: Option<String>,
    pub owner: Option<UserId>,
}

/// A new room row with empty collections.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub room_id: RoomId,
    pub owner: UserId,
    pub description: String,
    pub limit: i64,
    pub video_link: String,
    pub is_public: bool,
}

/// One payment-ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEntry {
    pub gift_name: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub stars: i64,
    pub points: i64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

// ============================================================================
// Store Traits
// ============================================================================

/// The primitives the mutation pipeline needs from the persistent store.
pub trait Store: Send + Sync + 'static {
    fn room_by_id(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Option<RoomRecord>, StoreError>> + Send;

    fn update_room(
        &self,
        room_id: RoomId,
        patch: RoomPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn user_by_id(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>, StoreError>> + Send;

    fn users_by_ids(
        &self,
        ids: &[UserId],
    ) -> impl Future<Output = Result<Vec<UserRecord>, StoreError>> + Send;

    fn set_premium(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_gifts(
        &self,
        user_id: &str,
        gifts: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn add_exp(
        &self,
        user_id: &str,
        delta: i64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn record_payment(
        &self,
        entry: PaymentEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Room listing and lifecycle operations used by the CRUD surface.
pub trait RoomCatalog: Send + Sync + 'static {
    fn insert_room(&self, room: NewRoom) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn room_id_taken(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Open public rooms not owned by the given user.
    fn list_public_rooms(
        &self,
        exclude_owner: &str,
    ) -> impl Future<Output = Result<Vec<RoomRecord>, StoreError>> + Send;

    /// Open rooms owned by the given user.
    fn list_owned_rooms(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<RoomRecord>, StoreError>> + Send;

    fn set_visibility(
        &self,
        room_id: RoomId,
        is_public: bool,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn close_room(&self, room_id: RoomId)
    -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn touch_room_creation(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ============================================================================
// In-memory store for tests
// ============================================================================
