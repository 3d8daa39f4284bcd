//! The room mutation pipeline.
//!
//! Every intent runs the same cycle: read the room row, decode its
//! collections, authorize, apply the intent's pure transformation, write the
//! changed fields back, re-read the historical-member records, and enrich.
//! All of it happens under a per-room async lock, so intents for the same
//! room are serialized and a concurrent writer can never discard another
//! writer's change (and message ids, assigned as `len + 1`, cannot collide).
//! Rooms are independent: intents for different rooms proceed concurrently.

use std::sync::Arc;

use chrono::{Months, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use super::enrich::{RoomView, enrich};
use super::protocol::{ErrorCode, GiftPayload, ServerEvent};
use super::state::{Gift, RoomId, RoomState, UserId, VideoSettings, decode_gifts, encode};
use super::store::{PaymentEntry, RoomPatch, RoomRecord, Store, StoreError};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("claimed actor does not match the connection identity")]
    ActorMismatch,

    #[error("operation requires admin privileges")]
    AdminRequired,

    #[error("operation requires room ownership")]
    OwnerRequired,

    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("room {0} is closed")]
    RoomClosed(RoomId),

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("user {0} is blocked in room {1}")]
    UserBlocked(UserId, RoomId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("state encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("snapshot sealing failed: {0}")]
    Seal(#[from] super::crypto::CipherError),
}

impl PipelineError {
    /// The error code surfaced to the initiating connection.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ActorMismatch => ErrorCode::Unauthorized,
            Self::AdminRequired | Self::OwnerRequired => ErrorCode::Forbidden,
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::RoomClosed(_) => ErrorCode::RoomClosed,
            Self::RoomFull(_) => ErrorCode::RoomFull,
            Self::UserBlocked(..) => ErrorCode::UserBlocked,
            Self::UserNotFound(_) => ErrorCode::UserNotFound,
            Self::Validation(_) => ErrorCode::InvalidEvent,
            Self::Store(_) => ErrorCode::StoreUnavailable,
            Self::Codec(_) | Self::Seal(_) => ErrorCode::Internal,
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// A successful mutation: the re-enriched snapshot plus an optional
/// intent-specific acknowledgment for the acting connection.
#[derive(Debug)]
pub struct Mutation {
    pub room_id: RoomId,
    pub view: RoomView,
    pub ack: Option<ServerEvent>,
}

/// Which room fields an intent's transformation touched. Only flagged
/// fields are written back.
#[derive(Debug, Default)]
struct Delta {
    members: bool,
    history_members: bool,
    blocked: bool,
    chat: bool,
    video_settings: bool,
    video_link: Option<String>,
    owner: Option<UserId>,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct RoomPipeline<S> {
    store: Arc<S>,
    locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl<S: Store> RoomPipeline<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        self.locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn require_actor(&self, actor: &str, claimed: &str) -> Result<(), PipelineError> {
        if actor != claimed {
            warn!(actor, claimed, "dropping intent with mismatched actor id");
            return Err(PipelineError::ActorMismatch);
        }
        Ok(())
    }

    async fn require_admin(&self, user_id: &str) -> Result<(), PipelineError> {
        // Fetched fresh per call; the flag is never cached on the connection.
        let user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or_else(|| PipelineError::UserNotFound(user_id.to_string()))?;
        if !user.is_admin {
            return Err(PipelineError::AdminRequired);
        }
        Ok(())
    }

    /// The shared read-modify-write cycle, serialized per room.
    async fn mutate<F>(&self, room_id: RoomId, f: F) -> Result<(RoomRecord, RoomState), PipelineError>
    where
        F: FnOnce(&RoomRecord, &mut RoomState) -> Result<Delta, PipelineError>,
    {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;
        self.mutate_locked(room_id, f).await
    }

    /// The cycle body. The caller must hold the room's lock.
    async fn mutate_locked<F>(
        &self,
        room_id: RoomId,
        f: F,
    ) -> Result<(RoomRecord, RoomState), PipelineError>
    where
        F: FnOnce(&RoomRecord, &mut RoomState) -> Result<Delta, PipelineError>,
    {
        let mut record = self
            .store
            .room_by_id(room_id)
            .await?
            .ok_or(PipelineError::RoomNotFound(room_id))?;
        let mut state = record.decode_state();

        let delta = f(&record, &mut state)?;

        let mut patch = RoomPatch {
            video_link: delta.video_link.clone(),
            owner: delta.owner.clone(),
            ..Default::default()
        };
        if delta.members {
            patch.members = Some(encode(&state.members)?);
        }
        if delta.history_members {
            patch.history_members = Some(encode(&state.history_members)?);
        }
        if delta.blocked {
            patch.blocked = Some(encode(&state.blocked)?);
        }
        if delta.chat {
            patch.chat_room = Some(encode(&state.chat)?);
        }
        if delta.video_settings {
            patch.video_settings = Some(encode(&state.video_settings)?);
        }

        self.store.update_room(room_id, patch).await?;

        if let Some(link) = delta.video_link {
            record.video_link = Some(link);
        }
        if let Some(owner) = delta.owner {
            record.owner = owner;
        }

        Ok((record, state))
    }

    async fn view(
        &self,
        record: &RoomRecord,
        state: &RoomState,
    ) -> Result<RoomView, PipelineError> {
        let users = self.store.users_by_ids(&state.history_members).await?;
        Ok(enrich(record, state, &users))
    }

    async fn finish(
        &self,
        record: RoomRecord,
        state: RoomState,
        ack: Option<ServerEvent>,
    ) -> Result<Mutation, PipelineError> {
        let view = self.view(&record, &state).await?;
        Ok(Mutation {
            room_id: record.room_id,
            view,
            ack,
        })
    }

    // ========================================================================
    // Intents
    // ========================================================================

    pub async fn join(
        &self,
        actor: &str,
        room_id: RoomId,
        user_id: &str,
    ) -> Result<Mutation, PipelineError> {
        self.require_actor(actor, user_id)?;

        let (record, state) = self
            .mutate(room_id, |record, state| {
                if record.closed {
                    return Err(PipelineError::RoomClosed(room_id));
                }
                if state.is_blocked(user_id) {
                    return Err(PipelineError::UserBlocked(user_id.to_string(), room_id));
                }
                if !state.is_member(user_id) && state.members.len() as i64 >= record.limit {
                    return Err(PipelineError::RoomFull(room_id));
                }
                state.join(user_id);
                Ok(Delta {
                    members: true,
                    history_members: true,
                    chat: true,
                    ..Default::default()
                })
            })
            .await?;

        self.finish(record, state, None).await
    }

    pub async fn leave(
        &self,
        actor: &str,
        room_id: RoomId,
        user_id: &str,
    ) -> Result<Mutation, PipelineError> {
        self.require_actor(actor, user_id)?;

        let (record, state) = self
            .mutate(room_id, |_, state| {
                state.leave(user_id);
                Ok(Delta {
                    members: true,
                    chat: true,
                    ..Default::default()
                })
            })
            .await?;

        self.finish(record, state, None).await
    }

    pub async fn send_message(
        &self,
        actor: &str,
        room_id: RoomId,
        user_id: &str,
        text: String,
        reply: Option<u32>,
    ) -> Result<Mutation, PipelineError> {
        self.require_actor(actor, user_id)?;
        if text.trim().is_empty() {
            return Err(PipelineError::Validation("message text is empty".to_string()));
        }

        let (record, state) = self
            .mutate(room_id, |_, state| {
                state.push_message(user_id, text, reply, Utc::now());
                Ok(Delta {
                    chat: true,
                    ..Default::default()
                })
            })
            .await?;

        self.finish(record, state, None).await
    }

    pub async fn delete_message(
        &self,
        room_id: RoomId,
        message_id: u32,
    ) -> Result<Mutation, PipelineError> {
        let mut found = false;
        let (record, state) = self
            .mutate(room_id, |_, state| {
                found = state.mark_deleted(message_id);
                Ok(Delta {
                    chat: found,
                    ..Default::default()
                })
            })
            .await?;

        let ack = ServerEvent::MessageMarkedAsDeleted {
            message_id,
            success: found,
        };
        self.finish(record, state, Some(ack)).await
    }

    pub async fn playback_control(
        &self,
        room_id: RoomId,
        action: String,
        current_time: f64,
    ) -> Result<Mutation, PipelineError> {
        let (record, state) = self
            .mutate(room_id, |_, state| {
                state.video_settings = Some(VideoSettings {
                    action,
                    current_time,
                });
                Ok(Delta {
                    video_settings: true,
                    ..Default::default()
                })
            })
            .await?;

        self.finish(record, state, None).await
    }

    pub async fn change_video(
        &self,
        room_id: RoomId,
        new_video_id: String,
    ) -> Result<Mutation, PipelineError> {
        let (record, state) = self
            .mutate(room_id, |_, _| {
                Ok(Delta {
                    video_link: Some(new_video_id),
                    ..Default::default()
                })
            })
            .await?;

        self.finish(record, state, None).await
    }

    pub async fn toggle_block(
        &self,
        actor: &str,
        room_id: RoomId,
        target: &str,
    ) -> Result<Mutation, PipelineError> {
        let (record, state) = self
            .mutate(room_id, |record, state| {
                if record.owner != actor {
                    return Err(PipelineError::OwnerRequired);
                }
                state.toggle_block(target);
                Ok(Delta {
                    members: true,
                    blocked: true,
                    chat: true,
                    ..Default::default()
                })
            })
            .await?;

        self.finish(record, state, None).await
    }

    pub async fn assign_owner(
        &self,
        actor: &str,
        room_id: RoomId,
        new_owner: &str,
    ) -> Result<Mutation, PipelineError> {
        let (record, state) = self
            .mutate(room_id, |record, state| {
                if record.owner != actor {
                    return Err(PipelineError::OwnerRequired);
                }
                state.push_system(super::state::SystemEvent::OwnerAssigned, new_owner);
                Ok(Delta {
                    chat: true,
                    owner: Some(new_owner.to_string()),
                    ..Default::default()
                })
            })
            .await?;

        self.finish(record, state, None).await
    }

    /// Extend the receiver's premium by whole calendar months, stacking on
    /// the later of now and the current expiry.
    pub async fn gift_premium(
        &self,
        actor: &str,
        sender_id: &str,
        receiver_id: &str,
        months: u32,
        room_id: RoomId,
        price: i64,
        admin: bool,
    ) -> Result<Mutation, PipelineError> {
        self.require_actor(actor, sender_id)?;
        if admin {
            self.require_admin(sender_id).await?;
        }

        // The receiver's row is rewritten under the room lock so concurrent
        // gifts announced in the same room cannot lose each other's update.
        let lock = self.lock_for(room_id);
        let guard = lock.lock().await;

        let receiver = self
            .store
            .user_by_id(receiver_id)
            .await?
            .ok_or_else(|| PipelineError::UserNotFound(receiver_id.to_string()))?;

        let now = Utc::now();
        let base = receiver
            .premium_expires_at
            .filter(|expiry| *expiry > now)
            .unwrap_or(now);
        let expires_at = base
            .checked_add_months(Months::new(months))
            .ok_or_else(|| PipelineError::Validation("premium expiry out of range".to_string()))?;

        self.store.set_premium(receiver_id, expires_at).await?;
        self.store
            .record_payment(PaymentEntry {
                gift_name: format!("Premium {months} months"),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                stars: if admin { 0 } else { price },
                points: 0,
            })
            .await?;

        let gift_name = format!("Premium for {months} month(s)");
        let (record, state) = self
            .mutate_locked(room_id, |_, state| {
                state.push_gift_announcement(sender_id, receiver_id, &gift_name, "premium", price);
                Ok(Delta {
                    chat: true,
                    ..Default::default()
                })
            })
            .await?;
        drop(guard);

        self.finish(record, state, None).await
    }

    /// Append a gift to the receiver's collection, credit the sender's
    /// experience (peer variant only), and announce it in the room chat.
    pub async fn send_gift(
        &self,
        actor: &str,
        sender_id: &str,
        receiver_id: &str,
        gift: GiftPayload,
        room_id: RoomId,
        admin: bool,
    ) -> Result<Mutation, PipelineError> {
        self.require_actor(actor, sender_id)?;
        if admin {
            self.require_admin(sender_id).await?;
        }

        // Gift ids are `len + 1` within the receiver's list; holding the
        // room lock across the append keeps them collision-free for gifts
        // sent through the same room.
        let lock = self.lock_for(room_id);
        let guard = lock.lock().await;

        let receiver = self
            .store
            .user_by_id(receiver_id)
            .await?
            .ok_or_else(|| PipelineError::UserNotFound(receiver_id.to_string()))?;

        let mut gifts = decode_gifts(receiver.gifts.as_deref());
        let new_gift = Gift {
            id: gifts.len() as u32 + 1,
            name: gift.name.clone(),
            img_url: gift.img_url.clone(),
            sender_id: sender_id.to_string(),
            price: gift.price,
            hidden: false,
            sold: false,
        };
        gifts.push(new_gift.clone());
        self.store.set_gifts(receiver_id, &encode(&gifts)?).await?;

        if !admin && gift.gift_exp != 0 {
            self.store.add_exp(sender_id, gift.gift_exp).await?;
        }

        self.store
            .record_payment(PaymentEntry {
                gift_name: gift.name.clone(),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                stars: if admin { 0 } else { gift.price },
                points: if admin { 0 } else { gift.for_points.unwrap_or(0) },
            })
            .await?;

        let (record, state) = self
            .mutate_locked(room_id, |_, state| {
                state.push_gift_announcement(
                    sender_id,
                    receiver_id,
                    &gift.name,
                    &gift.img_url,
                    gift.price,
                );
                Ok(Delta {
                    chat: true,
                    ..Default::default()
                })
            })
            .await?;
        drop(guard);

        let ack = if admin {
            ServerEvent::GiftSentAdmin {
                message: "Gift sent successfully by admin.".to_string(),
                gift: new_gift,
            }
        } else {
            ServerEvent::GiftSent {
                message: "Gift sent successfully.".to_string(),
                gift: new_gift,
            }
        };
        self.finish(record, state, Some(ack)).await
    }

    /// Ephemeral reaction: no persistence, pure fan-out.
    pub fn relay_emoji(
        &self,
        actor: &str,
        emoji: String,
        sender: &str,
    ) -> Result<ServerEvent, PipelineError> {
        self.require_actor(actor, sender)?;
        Ok(ServerEvent::ReceiveEmoji {
            emoji,
            sender: sender.to_string(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rooms::enrich::Presence;
    use crate::core::rooms::state::{ChatBody, SystemEvent, decode_chat};
    use crate::core::rooms::store::testing::{MemoryStore, room_record, user_record};
    use chrono::{Duration, TimeZone};

    const ROOM: RoomId = 100;

    fn pipeline(store: MemoryStore) -> RoomPipeline<MemoryStore> {
        RoomPipeline::new(Arc::new(store))
    }

    fn seeded() -> MemoryStore {
        MemoryStore::new()
            .with_room(room_record(ROOM, "u1"))
            .with_user(user_record("u1", "Alice"))
            .with_user(user_record("u2", "Bob"))
    }

    fn rose() -> GiftPayload {
        GiftPayload {
            name: "Rose".to_string(),
            img_url: "rose.png".to_string(),
            price: 50,
            gift_exp: 10,
            for_points: None,
        }
    }

    #[tokio::test]
    async fn test_join_empty_room() {
        let pipeline = pipeline(seeded());

        let mutation = pipeline.join("U1", ROOM, "U1").await.unwrap();

        assert_eq!(mutation.view.members, vec!["U1"]);
        assert_eq!(mutation.view.history_members, vec!["U1"]);
        assert_eq!(mutation.view.chat_room.len(), 1);
        assert_eq!(
            mutation.view.chat_room[0].body,
            ChatBody::System {
                event: SystemEvent::Joined,
                subject_id: "U1".to_string(),
                text: "Connected to the room".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_join_enriches_presence() {
        let store = seeded();
        let pipeline = pipeline(store);

        pipeline.join("u2", ROOM, "u2").await.unwrap();
        let mutation = pipeline.leave("u2", ROOM, "u2").await.unwrap();

        let bob = mutation
            .view
            .users
            .iter()
            .find(|u| u.user_id == "u2")
            .unwrap();
        assert_eq!(bob.status, Presence::Offline);
        assert!(mutation.view.history_members.contains(&"u2".to_string()));
    }

    #[tokio::test]
    async fn test_join_rejects_mismatched_actor() {
        let store = seeded();
        let pipeline = pipeline(store);

        let err = pipeline.join("u2", ROOM, "u1").await.unwrap_err();

        assert!(matches!(err, PipelineError::ActorMismatch));
        // No state was written.
        assert!(pipeline.store.room(ROOM).members.is_none());
    }

    #[tokio::test]
    async fn test_join_rejects_blocked_user() {
        let store = seeded();
        {
            let mut rooms = store.rooms.lock().unwrap();
            rooms.get_mut(&ROOM).unwrap().blocked = Some(r#"["u2"]"#.to_string());
        }
        let pipeline = pipeline(store);

        let err = pipeline.join("u2", ROOM, "u2").await.unwrap_err();
        assert!(matches!(err, PipelineError::UserBlocked(..)));
    }

    #[tokio::test]
    async fn test_join_rejects_closed_room() {
        let store = seeded();
        store.rooms.lock().unwrap().get_mut(&ROOM).unwrap().closed = true;
        let pipeline = pipeline(store);

        let err = pipeline.join("u1", ROOM, "u1").await.unwrap_err();
        assert!(matches!(err, PipelineError::RoomClosed(_)));
    }

    #[tokio::test]
    async fn test_join_rejects_full_room() {
        let store = seeded();
        store.rooms.lock().unwrap().get_mut(&ROOM).unwrap().limit = 1;
        let pipeline = pipeline(store);

        pipeline.join("u1", ROOM, "u1").await.unwrap();
        let err = pipeline.join("u2", ROOM, "u2").await.unwrap_err();

        assert!(matches!(err, PipelineError::RoomFull(_)));
    }

    #[tokio::test]
    async fn test_rejoin_when_full_is_still_allowed() {
        let store = seeded();
        store.rooms.lock().unwrap().get_mut(&ROOM).unwrap().limit = 1;
        let pipeline = pipeline(store);

        pipeline.join("u1", ROOM, "u1").await.unwrap();
        let mutation = pipeline.join("u1", ROOM, "u1").await.unwrap();

        assert_eq!(mutation.view.members, vec!["u1"]);
    }

    #[tokio::test]
    async fn test_concurrent_messages_are_not_lost() {
        let store = seeded();
        {
            // Seed five existing messages so the next ids are 6 and 7.
            let mut state = RoomState::default();
            for i in 0..5 {
                state.push_message("u1", format!("m{i}"), None, Utc::now());
            }
            let mut rooms = store.rooms.lock().unwrap();
            rooms.get_mut(&ROOM).unwrap().chat_room = Some(encode(&state.chat).unwrap());
        }
        let pipeline = Arc::new(RoomPipeline::new(Arc::new(store)));

        let a = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .send_message("u1", ROOM, "u1", "from a".to_string(), None)
                    .await
            })
        };
        let b = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .send_message("u2", ROOM, "u2", "from b".to_string(), None)
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let chat = decode_chat(pipeline.store.room(ROOM).chat_room.as_deref());
        assert_eq!(chat.len(), 7);
        let ids: Vec<u32> = chat.iter().map(|m| m.id).collect();
        assert!(ids.contains(&6) && ids.contains(&7));
    }

    #[tokio::test]
    async fn test_send_message_rejects_empty_text() {
        let pipeline = pipeline(seeded());

        let err = pipeline
            .send_message("u1", ROOM, "u1", "   ".to_string(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_message_acks_success() {
        let pipeline = pipeline(seeded());
        pipeline
            .send_message("u1", ROOM, "u1", "hello".to_string(), None)
            .await
            .unwrap();

        let mutation = pipeline.delete_message(ROOM, 1).await.unwrap();

        assert!(mutation.view.chat_room[0].deleted);
        assert_eq!(
            mutation.ack,
            Some(ServerEvent::MessageMarkedAsDeleted {
                message_id: 1,
                success: true,
            })
        );
    }

    #[tokio::test]
    async fn test_delete_unknown_message_acks_failure() {
        let pipeline = pipeline(seeded());

        let mutation = pipeline.delete_message(ROOM, 42).await.unwrap();

        assert_eq!(
            mutation.ack,
            Some(ServerEvent::MessageMarkedAsDeleted {
                message_id: 42,
                success: false,
            })
        );
    }

    #[tokio::test]
    async fn test_playback_control_overwrites_settings() {
        let pipeline = pipeline(seeded());

        pipeline
            .playback_control(ROOM, "play".to_string(), 10.0)
            .await
            .unwrap();
        let mutation = pipeline
            .playback_control(ROOM, "pause".to_string(), 62.5)
            .await
            .unwrap();

        assert_eq!(
            mutation.view.video_settings,
            Some(VideoSettings {
                action: "pause".to_string(),
                current_time: 62.5,
            })
        );
        // No chat entries were appended.
        assert!(mutation.view.chat_room.is_empty());
    }

    #[tokio::test]
    async fn test_change_video_updates_link() {
        let pipeline = pipeline(seeded());

        let mutation = pipeline
            .change_video(ROOM, "abc123".to_string())
            .await
            .unwrap();

        assert_eq!(mutation.view.video_link, Some("abc123".to_string()));
        assert_eq!(
            pipeline.store.room(ROOM).video_link,
            Some("abc123".to_string())
        );
    }

    #[tokio::test]
    async fn test_block_requires_owner() {
        let pipeline = pipeline(seeded());

        let err = pipeline.toggle_block("u2", ROOM, "u1").await.unwrap_err();
        assert!(matches!(err, PipelineError::OwnerRequired));
    }

    #[tokio::test]
    async fn test_block_then_unblock() {
        let pipeline = pipeline(seeded());
        pipeline.join("u2", ROOM, "u2").await.unwrap();

        let blocked = pipeline.toggle_block("u1", ROOM, "u2").await.unwrap();
        assert_eq!(blocked.view.blocked, vec!["u2"]);
        assert!(!blocked.view.members.contains(&"u2".to_string()));

        let unblocked = pipeline.toggle_block("u1", ROOM, "u2").await.unwrap();
        assert!(unblocked.view.blocked.is_empty());
        assert!(!unblocked.view.members.contains(&"u2".to_string()));
    }

    #[tokio::test]
    async fn test_assign_owner_requires_current_owner() {
        let pipeline = pipeline(seeded());

        let err = pipeline.assign_owner("u2", ROOM, "u2").await.unwrap_err();
        assert!(matches!(err, PipelineError::OwnerRequired));
    }

    #[tokio::test]
    async fn test_assign_owner_updates_row_and_chat() {
        let pipeline = pipeline(seeded());

        let mutation = pipeline.assign_owner("u1", ROOM, "u2").await.unwrap();

        assert_eq!(mutation.view.owner, "u2");
        assert_eq!(pipeline.store.room(ROOM).owner, "u2");
        assert!(matches!(
            mutation.view.chat_room.last().map(|m| &m.body),
            Some(ChatBody::System {
                event: SystemEvent::OwnerAssigned,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_gift_premium_from_now_when_not_premium() {
        let pipeline = pipeline(seeded());

        let before = Utc::now();
        pipeline
            .gift_premium("u1", "u1", "u2", 3, ROOM, 250, false)
            .await
            .unwrap();
        let after = Utc::now();

        let receiver = pipeline.store.user("u2");
        assert!(receiver.is_premium);
        let expiry = receiver.premium_expires_at.unwrap();
        assert!(expiry >= before.checked_add_months(Months::new(3)).unwrap());
        assert!(expiry <= after.checked_add_months(Months::new(3)).unwrap());
    }

    #[tokio::test]
    async fn test_gift_premium_stacks_on_current_expiry() {
        let store = seeded();
        let current = Utc.with_ymd_and_hms(2027, 1, 15, 12, 30, 0).unwrap();
        {
            let mut users = store.users.lock().unwrap();
            let bob = users.get_mut("u2").unwrap();
            bob.is_premium = true;
            bob.premium_expires_at = Some(current);
        }
        let pipeline = pipeline(store);

        pipeline
            .gift_premium("u1", "u1", "u2", 3, ROOM, 250, false)
            .await
            .unwrap();
        pipeline
            .gift_premium("u1", "u1", "u2", 1, ROOM, 100, false)
            .await
            .unwrap();

        let expiry = pipeline.store.user("u2").premium_expires_at.unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2027, 5, 15, 12, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn test_gift_premium_ignores_lapsed_expiry() {
        let store = seeded();
        {
            let mut users = store.users.lock().unwrap();
            users.get_mut("u2").unwrap().premium_expires_at =
                Some(Utc::now() - Duration::days(30));
        }
        let pipeline = pipeline(store);

        let before = Utc::now();
        pipeline
            .gift_premium("u1", "u1", "u2", 1, ROOM, 100, false)
            .await
            .unwrap();

        let expiry = pipeline.store.user("u2").premium_expires_at.unwrap();
        assert!(expiry >= before.checked_add_months(Months::new(1)).unwrap());
    }

    #[tokio::test]
    async fn test_gift_premium_records_payment_and_announcement() {
        let pipeline = pipeline(seeded());

        let mutation = pipeline
            .gift_premium("u1", "u1", "u2", 3, ROOM, 250, false)
            .await
            .unwrap();

        let payments = pipeline.store.payments.lock().unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].gift_name, "Premium 3 months");
        assert_eq!(payments[0].stars, 250);

        assert!(matches!(
            mutation.view.chat_room.last().map(|m| &m.body),
            Some(ChatBody::Gift { gift_img, .. }) if gift_img == "premium"
        ));
    }

    #[tokio::test]
    async fn test_gift_premium_admin_requires_flag() {
        let pipeline = pipeline(seeded());

        let err = pipeline
            .gift_premium("u1", "u1", "u2", 1, ROOM, 100, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AdminRequired));
    }

    #[tokio::test]
    async fn test_gift_premium_admin_zero_price_ledger() {
        let store = seeded();
        store.users.lock().unwrap().get_mut("u1").unwrap().is_admin = true;
        let pipeline = pipeline(store);

        pipeline
            .gift_premium("u1", "u1", "u2", 2, ROOM, 500, true)
            .await
            .unwrap();

        let payments = pipeline.store.payments.lock().unwrap();
        assert_eq!(payments[0].stars, 0);
    }

    #[tokio::test]
    async fn test_send_gift_appends_record_and_enriches_sender() {
        let pipeline = pipeline(seeded());
        pipeline.join("u1", ROOM, "u1").await.unwrap();
        pipeline.join("u2", ROOM, "u2").await.unwrap();

        let mutation = pipeline
            .send_gift("u1", "u1", "u2", rose(), ROOM, false)
            .await
            .unwrap();

        let gifts = decode_gifts(pipeline.store.user("u2").gifts.as_deref());
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].id, 1);
        assert_eq!(gifts[0].sender_id, "u1");
        assert!(!gifts[0].hidden);
        assert!(!gifts[0].sold);

        let bob = mutation
            .view
            .users
            .iter()
            .find(|u| u.user_id == "u2")
            .unwrap();
        assert_eq!(bob.gifts[0].sender_name, "Alice");

        assert!(matches!(mutation.ack, Some(ServerEvent::GiftSent { .. })));
    }

    #[tokio::test]
    async fn test_send_gift_credits_sender_exp_and_ledger() {
        let pipeline = pipeline(seeded());

        pipeline
            .send_gift("u1", "u1", "u2", rose(), ROOM, false)
            .await
            .unwrap();

        assert_eq!(pipeline.store.user("u1").exp, 10);
        let payments = pipeline.store.payments.lock().unwrap();
        assert_eq!(payments[0].gift_name, "Rose");
        assert_eq!(payments[0].stars, 50);
    }

    #[tokio::test]
    async fn test_send_gift_ids_are_sequential_per_recipient() {
        let pipeline = pipeline(seeded());

        pipeline
            .send_gift("u1", "u1", "u2", rose(), ROOM, false)
            .await
            .unwrap();
        let mutation = pipeline
            .send_gift("u1", "u1", "u2", rose(), ROOM, false)
            .await
            .unwrap();

        let gifts = decode_gifts(pipeline.store.user("u2").gifts.as_deref());
        assert_eq!(gifts.iter().map(|g| g.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(mutation.ack.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_gifts_in_one_room_are_not_lost() {
        let store = seeded();
        let pipeline = Arc::new(RoomPipeline::new(Arc::new(store)));

        let a = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .send_gift("u1", "u1", "u2", rose(), ROOM, false)
                    .await
            })
        };
        let b = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .send_gift("u1", "u1", "u2", rose(), ROOM, false)
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let gifts = decode_gifts(pipeline.store.user("u2").gifts.as_deref());
        assert_eq!(gifts.len(), 2);
        let mut ids: Vec<u32> = gifts.iter().map(|g| g.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_send_gift_admin_grants_no_exp_and_zero_ledger() {
        let store = seeded();
        store.users.lock().unwrap().get_mut("u1").unwrap().is_admin = true;
        let pipeline = pipeline(store);

        let mutation = pipeline
            .send_gift("u1", "u1", "u2", rose(), ROOM, true)
            .await
            .unwrap();

        assert_eq!(pipeline.store.user("u1").exp, 0);
        let payments = pipeline.store.payments.lock().unwrap();
        assert_eq!(payments[0].stars, 0);
        assert_eq!(payments[0].points, 0);
        assert!(matches!(
            mutation.ack,
            Some(ServerEvent::GiftSentAdmin { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_gift_admin_requires_flag() {
        let pipeline = pipeline(seeded());

        let err = pipeline
            .send_gift("u1", "u1", "u2", rose(), ROOM, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AdminRequired));
    }

    #[tokio::test]
    async fn test_send_gift_to_unknown_receiver() {
        let pipeline = pipeline(seeded());

        let err = pipeline
            .send_gift("u1", "u1", "ghost", rose(), ROOM, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_relay_emoji_checks_actor() {
        let pipeline = pipeline(seeded());

        let event = pipeline
            .relay_emoji("u1", "🔥".to_string(), "u1")
            .unwrap();
        assert!(matches!(event, ServerEvent::ReceiveEmoji { .. }));

        let err = pipeline
            .relay_emoji("u1", "🔥".to_string(), "u2")
            .unwrap_err();
        assert!(matches!(err, PipelineError::ActorMismatch));
    }

    #[tokio::test]
    async fn test_store_failure_aborts_pipeline() {
        let store = seeded();
        store.set_fail_reads(true);
        let pipeline = pipeline(store);

        let err = pipeline.join("u1", ROOM, "u1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(_)));
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
    }

    #[tokio::test]
    async fn test_unknown_room_is_reported() {
        let pipeline = pipeline(seeded());

        let err = pipeline.join("u1", 999, "u1").await.unwrap_err();
        assert!(matches!(err, PipelineError::RoomNotFound(999)));
        assert_eq!(err.code(), ErrorCode::RoomNotFound);
    }
}
