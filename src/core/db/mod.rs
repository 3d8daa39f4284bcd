//! Database module
//!
//! Provides database connectivity and repositories for persistent storage
//! using MySQL and SQLx, and the [`MySqlStore`] facade the room
//! synchronization core talks to.

pub mod pool;
pub mod repositories;

pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations, health_check};
pub use repositories::{PaymentRepository, RoomRepository, UserRepository};

// Re-export sqlx types that might be needed
pub use sqlx::MySqlPool;

use chrono::{DateTime, Utc};

use crate::core::rooms::state::{RoomId, UserId};
use crate::core::rooms::store::{
    NewRoom, PaymentEntry, RoomCatalog, RoomPatch, RoomRecord, Store, StoreError, UserRecord,
};

/// MySQL-backed implementation of the persistence interface the room core
/// needs, composed from the individual repositories.
#[derive(Clone)]
pub struct MySqlStore {
    rooms: RoomRepository,
    users: UserRepository,
    payments: PaymentRepository,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            rooms: RoomRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool),
        }
    }
}

impl Store for MySqlStore {
    async fn room_by_id(&self, room_id: RoomId) -> Result<Option<RoomRecord>, StoreError> {
        self.rooms.find_by_id(room_id).await
    }

    async fn update_room(&self, room_id: RoomId, patch: RoomPatch) -> Result<(), StoreError> {
        self.rooms.update(room_id, patch).await
    }

    async fn user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        self.users.find_by_user_id(user_id).await
    }

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<UserRecord>, StoreError> {
        self.users.find_many(ids).await
    }

    async fn set_premium(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.users.set_premium(user_id, expires_at).await
    }

    async fn set_gifts(&self, user_id: &str, gifts: &str) -> Result<(), StoreError> {
        self.users.set_gifts(user_id, gifts).await
    }

    async fn add_exp(&self, user_id: &str, delta: i64) -> Result<(), StoreError> {
        self.users.add_exp(user_id, delta).await
    }

    async fn record_payment(&self, entry: PaymentEntry) -> Result<(), StoreError> {
        self.payments.insert(entry).await
    }
}

impl RoomCatalog for MySqlStore {
    async fn insert_room(&self, room: NewRoom) -> Result<(), StoreError> {
        self.rooms.insert(room).await
    }

    async fn room_id_taken(&self, room_id: RoomId) -> Result<bool, StoreError> {
        self.rooms.id_taken(room_id).await
    }

    async fn list_public_rooms(&self, exclude_owner: &str) -> Result<Vec<RoomRecord>, StoreError> {
        self.rooms.list_public(exclude_owner).await
    }

    async fn list_owned_rooms(&self, owner: &str) -> Result<Vec<RoomRecord>, StoreError> {
        self.rooms.list_owned(owner).await
    }

    async fn set_visibility(&self, room_id: RoomId, is_public: bool) -> Result<bool, StoreError> {
        self.rooms.set_visibility(room_id, is_public).await
    }

    async fn close_room(&self, room_id: RoomId) -> Result<bool, StoreError> {
        self.rooms.close(room_id).await
    }

    async fn touch_room_creation(&self, user_id: &str) -> Result<(), StoreError> {
        self.users.touch_room_creation(user_id).await
    }
}
