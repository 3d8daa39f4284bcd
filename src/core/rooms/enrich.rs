//! Enrichment of raw room state into the outward-facing snapshot.
//!
//! Runs once per mutation, after the write-back: presence per historical
//! member, decoded cosmetic settings, and gift sender attribution resolved
//! against the same historical-member record set. Deterministic for a given
//! input; no side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{
    ChatEntry, Gift, RoomId, RoomState, UserId, VideoSettings, decode_custom_settings,
    decode_gifts,
};
use super::store::{RoomRecord, UserRecord};

/// Sender name substituted when a gift's sender record no longer exists.
const UNKNOWN_SENDER: &str = "Unknown";

// ============================================================================
// View Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// A gift with its sender attribution resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedGift {
    #[serde(flatten)]
    pub gift: Gift,
    pub sender_name: String,
    pub sender_photo: Option<String>,
}

/// A historical member as presented to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedUser {
    pub id: i64,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_premium: bool,
    pub status: Presence,
    pub custom_settings: serde_json::Map<String, serde_json::Value>,
    pub gifts: Vec<EnrichedGift>,
    pub exp: i64,
}

/// The full outward room snapshot rebroadcast after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: RoomId,
    pub owner: UserId,
    pub description: String,
    pub limit: i64,
    pub is_public: bool,
    pub closed: bool,
    pub created_time: DateTime<Utc>,
    pub video_link: Option<String>,
    pub members: Vec<UserId>,
    pub history_members: Vec<UserId>,
    pub blocked: Vec<UserId>,
    pub users: Vec<EnrichedUser>,
    pub chat_room: Vec<ChatEntry>,
    pub video_settings: Option<VideoSettings>,
}

// ============================================================================
// Enrichment
// ============================================================================

/// Build the outward room view from the persisted record, the decoded
/// collections, and the user records for every id in `history_members`.
pub fn enrich(record: &RoomRecord, state: &RoomState, users: &[UserRecord]) -> RoomView {
    let enriched_users = users
        .iter()
        .map(|user| enrich_user(user, state, users))
        .collect();

    RoomView {
        room_id: record.room_id,
        owner: record.owner.clone(),
        description: record.description.clone(),
        limit: record.limit,
        is_public: record.is_public,
        closed: record.closed,
        created_time: record.created_time,
        video_link: record.video_link.clone(),
        members: state.members.clone(),
        history_members: state.history_members.clone(),
        blocked: state.blocked.clone(),
        users: enriched_users,
        chat_room: state.chat.clone(),
        video_settings: state.video_settings.clone(),
    }
}

fn enrich_user(user: &UserRecord, state: &RoomState, all: &[UserRecord]) -> EnrichedUser {
    let status = if state.is_member(&user.user_id) {
        Presence::Online
    } else {
        Presence::Offline
    };

    let gifts = decode_gifts(user.gifts.as_deref())
        .into_iter()
        .map(|gift| {
            let sender = all.iter().find(|u| u.user_id == gift.sender_id);
            EnrichedGift {
                sender_name: sender
                    .map(|s| s.first_name.clone())
                    .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
                sender_photo: sender.and_then(|s| s.photo_url.clone()),
                gift,
            }
        })
        .collect();

    EnrichedUser {
        id: user.id,
        user_id: user.user_id.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        photo_url: user.photo_url.clone(),
        created_at: user.created_at,
        is_premium: user.is_premium,
        status,
        custom_settings: decode_custom_settings(user.custom_settings.as_deref()),
        gifts,
        exp: user.exp,
    }
}

// ============================================================================
// Tests
// ============================================================================
