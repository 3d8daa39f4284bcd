//! Real-time event surface: inbound intents and outbound events.
//!
//! Event names and payload fields match the client protocol; every inbound
//! intent yields either a state update or an explicit `error` event back to
//! the initiating connection.

use serde::{Deserialize, Serialize};

use super::state::{Gift, RoomId, UserId};

// ============================================================================
// Inbound Events
// ============================================================================

/// Gift description supplied by the sending client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftPayload {
    pub name: String,
    pub img_url: String,
    pub price: i64,
    /// Experience credited to the sender (zero for the admin variant).
    #[serde(default)]
    pub gift_exp: i64,
    /// Points component of the ledger entry, when paid with points.
    #[serde(default)]
    pub for_points: Option<i64>,
}

/// One room-mutating intent from a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinRoom", rename_all = "camelCase")]
    JoinRoom { room_id: RoomId, user_id: UserId },

    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        room_id: RoomId,
        user_id: UserId,
        text: String,
        #[serde(default)]
        reply: Option<u32>,
    },

    #[serde(rename = "deleteMessage", rename_all = "camelCase")]
    DeleteMessage { room_id: RoomId, message_id: u32 },

    #[serde(rename = "youtubeControl", rename_all = "camelCase")]
    YoutubeControl {
        room_id: RoomId,
        action: String,
        #[serde(default)]
        current_time: f64,
    },

    #[serde(rename = "videoIdUpdated", rename_all = "camelCase")]
    VideoIdUpdated {
        room_id: RoomId,
        new_video_id: String,
    },

    #[serde(rename = "userBlockedUpdated", rename_all = "camelCase")]
    UserBlockedUpdated { room_id: RoomId, user_id: UserId },

    #[serde(rename = "assignOwner", rename_all = "camelCase")]
    AssignOwner { room_id: RoomId, user_id: UserId },

    #[serde(rename = "giftPremium", rename_all = "camelCase")]
    GiftPremium {
        sender_id: UserId,
        receiver_id: UserId,
        months: u32,
        room_id: RoomId,
        price: i64,
    },

    #[serde(rename = "giftPremiumAdmin", rename_all = "camelCase")]
    GiftPremiumAdmin {
        sender_id: UserId,
        receiver_id: UserId,
        months: u32,
        room_id: RoomId,
        price: i64,
    },

    #[serde(rename = "sendGift", rename_all = "camelCase")]
    SendGift {
        sender_id: UserId,
        receiver_id: UserId,
        gift: GiftPayload,
        room_id: RoomId,
    },

    #[serde(rename = "sendGiftAdmin", rename_all = "camelCase")]
    SendGiftAdmin {
        sender_id: UserId,
        receiver_id: UserId,
        gift: GiftPayload,
        room_id: RoomId,
    },

    #[serde(rename = "send_emoji", rename_all = "camelCase")]
    SendEmoji {
        emoji: String,
        room_id: RoomId,
        sender: UserId,
    },

    #[serde(rename = "leaveRoom", rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId, user_id: UserId },
}

// ============================================================================
// Outbound Events
// ============================================================================

/// Error classification surfaced to the initiating connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    RoomNotFound,
    RoomClosed,
    RoomFull,
    UserBlocked,
    UserNotFound,
    InvalidEvent,
    StoreUnavailable,
    Internal,
}

/// One event delivered to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Sealed room snapshot, broadcast to the room and unicast to the actor.
    #[serde(rename = "roomUpdated", rename_all = "camelCase")]
    RoomUpdated { encrypted_data: String },

    #[serde(rename = "messageMarkedAsDeleted", rename_all = "camelCase")]
    MessageMarkedAsDeleted { message_id: u32, success: bool },

    #[serde(rename = "giftSent")]
    GiftSent { message: String, gift: Gift },

    #[serde(rename = "giftSentAdmin")]
    GiftSentAdmin { message: String, gift: Gift },

    #[serde(rename = "receive_emoji")]
    ReceiveEmoji { emoji: String, sender: UserId },

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
