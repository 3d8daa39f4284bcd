//! Room state containers and their persisted text representation.
//!
//! Every list-valued room field (members, history, block list, chat log)
//! is stored as one serialized blob per room. Decoding favors availability
//! over strict validation: an absent, empty, or structurally broken blob
//! yields the empty container, never an error. Encoding is the inverse and
//! round-trips for every container this system produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Numeric room identifier (server-generated, collision-checked).
pub type RoomId = i64;

/// External identity-provider user id.
pub type UserId = String;

// ============================================================================
// Chat Log
// ============================================================================

/// Kind tag for server-authored chat entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEvent {
    Joined,
    Left,
    Blocked,
    Unblocked,
    OwnerAssigned,
}

impl SystemEvent {
    /// Chat line shown for this event.
    pub fn text(&self) -> &'static str {
        match self {
            Self::Joined => "Connected to the room",
            Self::Left => "Left the room",
            Self::Blocked => "Has been blocked",
            Self::Unblocked => "Has been unblocked",
            Self::OwnerAssigned => "Has been assigned as the new owner",
        }
    }
}

/// Payload of a chat entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatBody {
    /// Ordinary user message, optionally replying to an earlier entry.
    #[serde(rename_all = "camelCase")]
    Message {
        sender_id: UserId,
        text: String,
        #[serde(default)]
        reply_to: Option<u32>,
        timestamp: DateTime<Utc>,
    },
    /// Server-authored event about a subject user.
    #[serde(rename_all = "camelCase")]
    System {
        event: SystemEvent,
        subject_id: UserId,
        text: String,
    },
    /// Gift announcement appended by the gifting intents.
    #[serde(rename_all = "camelCase")]
    Gift {
        sender_id: UserId,
        recipient_id: UserId,
        gift_name: String,
        gift_img: String,
        price: i64,
        text: String,
    },
}

/// One entry of a room's chat log.
///
/// Ids are assigned as `current length + 1` under the room's mutation lock,
/// so they are monotonic within a room. The log is append-only except for
/// the `deleted` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: u32,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub body: ChatBody,
}

// ============================================================================
// Playback + Gifts
// ============================================================================

/// Last playback-control action. Overwritten on every control intent,
/// never appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub action: String,
    pub current_time: f64,
}

/// A gift received by a user. Ids are sequential within the recipient's
/// gift list; `sender_id` is a back-reference only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: u32,
    pub name: String,
    pub img_url: String,
    pub sender_id: UserId,
    pub price: i64,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub sold: bool,
}

// ============================================================================
// Codec
// ============================================================================

fn decode_or_default<T: DeserializeOwned + Default>(raw: Option<&str>) -> T {
    match raw {
        Some(s) if !s.trim().is_empty() => serde_json::from_str(s).unwrap_or_default(),
        _ => T::default(),
    }
}

/// Decode a persisted id-set blob. Empty container on absence or garbage.
pub fn decode_ids(raw: Option<&str>) -> Vec<UserId> {
    decode_or_default(raw)
}

/// Decode a persisted chat-log blob. Empty container on absence or garbage.
pub fn decode_chat(raw: Option<&str>) -> Vec<ChatEntry> {
    decode_or_default(raw)
}

/// Decode a persisted gift-list blob. Empty container on absence or garbage.
pub fn decode_gifts(raw: Option<&str>) -> Vec<Gift> {
    decode_or_default(raw)
}

/// Decode the transient playback settings. `None` on absence or garbage.
pub fn decode_video_settings(raw: Option<&str>) -> Option<VideoSettings> {
    raw.and_then(|s| serde_json::from_str(s).ok())
}

/// Decode a user's cosmetic settings record. Empty object on absence or
/// garbage.
pub fn decode_custom_settings(raw: Option<&str>) -> serde_json::Map<String, serde_json::Value> {
    decode_or_default(raw)
}

/// Encode a container back to its persisted text representation.
pub fn encode<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string(value)
}

// ============================================================================
// Room State + Transformations
// ============================================================================

/// Result of the block/unblock toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockChange {
    Blocked,
    Unblocked,
}

/// A room's decoded mutable collections.
///
/// The methods below are the pure per-intent transformations applied by the
/// mutation pipeline. Invariant: `members` is always a subset of
/// `history_members`; blocked users leave `members` but stay in history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    pub members: Vec<UserId>,
    pub history_members: Vec<UserId>,
    pub blocked: Vec<UserId>,
    pub chat: Vec<ChatEntry>,
    pub video_settings: Option<VideoSettings>,
}

impl RoomState {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn is_blocked(&self, user_id: &str) -> bool {
        self.blocked.iter().any(|b| b == user_id)
    }

    fn next_message_id(&self) -> u32 {
        self.chat.len() as u32 + 1
    }

    fn push(&mut self, body: ChatBody) -> u32 {
        let id = self.next_message_id();
        self.chat.push(ChatEntry {
            id,
            deleted: false,
            body,
        });
        id
    }

    /// Add a user to presence and history. Idempotent: a user already
    /// present is not duplicated in either set.
    pub fn join(&mut self, user_id: &str) {
        if !self.members.iter().any(|m| m == user_id) {
            self.members.push(user_id.to_string());
        }
        if !self.history_members.iter().any(|m| m == user_id) {
            self.history_members.push(user_id.to_string());
        }
        self.push(ChatBody::System {
            event: SystemEvent::Joined,
            subject_id: user_id.to_string(),
            text: SystemEvent::Joined.text().to_string(),
        });
    }

    /// Remove a user from presence only; history is monotonic.
    pub fn leave(&mut self, user_id: &str) {
        self.members.retain(|m| m != user_id);
        self.push(ChatBody::System {
            event: SystemEvent::Left,
            subject_id: user_id.to_string(),
            text: SystemEvent::Left.text().to_string(),
        });
    }

    /// Append a user message and return its assigned id.
    pub fn push_message(
        &mut self,
        sender_id: &str,
        text: String,
        reply_to: Option<u32>,
        timestamp: DateTime<Utc>,
    ) -> u32 {
        self.push(ChatBody::Message {
            sender_id: sender_id.to_string(),
            text,
            reply_to,
            timestamp,
        })
    }

    /// Append a server-authored event entry and return its assigned id.
    pub fn push_system(&mut self, event: SystemEvent, subject_id: &str) -> u32 {
        self.push(ChatBody::System {
            event,
            subject_id: subject_id.to_string(),
            text: event.text().to_string(),
        })
    }

    /// Append a gift announcement and return its assigned id.
    pub fn push_gift_announcement(
        &mut self,
        sender_id: &str,
        recipient_id: &str,
        gift_name: &str,
        gift_img: &str,
        price: i64,
    ) -> u32 {
        self.push(ChatBody::Gift {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            gift_name: gift_name.to_string(),
            gift_img: gift_img.to_string(),
            price,
            text: format!("Gift {gift_name}"),
        })
    }

    /// Soft-delete the entry with the given id. Text is retained; only the
    /// flag changes. Returns whether the id was found.
    pub fn mark_deleted(&mut self, message_id: u32) -> bool {
        match self.chat.iter_mut().find(|m| m.id == message_id) {
            Some(entry) => {
                entry.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Toggle a user's blocked status. Blocking also removes the user from
    /// presence; unblocking does not re-add them.
    pub fn toggle_block(&mut self, user_id: &str) -> BlockChange {
        if let Some(pos) = self.blocked.iter().position(|b| b == user_id) {
            self.blocked.remove(pos);
            self.push_system(SystemEvent::Unblocked, user_id);
            BlockChange::Unblocked
        } else {
            self.blocked.push(user_id.to_string());
            self.members.retain(|m| m != user_id);
            self.push_system(SystemEvent::Blocked, user_id);
            BlockChange::Blocked
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn message(state: &mut RoomState, sender: &str, text: &str) -> u32 {
        state.push_message(sender, text.to_string(), None, Utc::now())
    }

    // ========================================================================
    // Codec Tests
    // ========================================================================

    #[test]
    fn test_decode_absent_fields_yield_empty() {
        assert!(decode_ids(None).is_empty());
        assert!(decode_chat(None).is_empty());
        assert!(decode_gifts(None).is_empty());
        assert!(decode_video_settings(None).is_none());
        assert!(decode_custom_settings(None).is_empty());
    }

    #[test]
    fn test_decode_garbage_yields_empty() {
        assert!(decode_ids(Some("not json")).is_empty());
        assert!(decode_chat(Some("{broken")).is_empty());
        assert!(decode_gifts(Some("42")).is_empty());
        assert!(decode_video_settings(Some("[]")).is_none());
        assert!(decode_custom_settings(Some("\"nope\"")).is_empty());
    }

    #[test]
    fn test_decode_blank_yields_empty() {
        assert!(decode_ids(Some("")).is_empty());
        assert!(decode_ids(Some("   ")).is_empty());
    }

    #[test]
    fn test_ids_round_trip() {
        let ids = vec!["u1".to_string(), "u2".to_string()];
        let raw = encode(&ids).unwrap();
        assert_eq!(decode_ids(Some(&raw)), ids);

        let empty: Vec<UserId> = Vec::new();
        let raw = encode(&empty).unwrap();
        assert_eq!(decode_ids(Some(&raw)), empty);
    }

    #[test]
    fn test_chat_round_trip() {
        let mut state = RoomState::default();
        state.join("u1");
        message(&mut state, "u1", "hello");
        state.push_gift_announcement("u1", "u2", "Rose", "rose.png", 50);
        state.mark_deleted(2);

        let raw = encode(&state.chat).unwrap();
        assert_eq!(decode_chat(Some(&raw)), state.chat);
    }

    #[test]
    fn test_gifts_round_trip() {
        let gifts = vec![Gift {
            id: 1,
            name: "Rose".to_string(),
            img_url: "rose.png".to_string(),
            sender_id: "u1".to_string(),
            price: 50,
            hidden: false,
            sold: false,
        }];
        let raw = encode(&gifts).unwrap();
        assert_eq!(decode_gifts(Some(&raw)), gifts);
    }

    #[test]
    fn test_video_settings_round_trip() {
        let settings = VideoSettings {
            action: "pause".to_string(),
            current_time: 63.5,
        };
        let raw = encode(&settings).unwrap();
        assert_eq!(decode_video_settings(Some(&raw)), Some(settings));
    }

    // ========================================================================
    // Transformation Tests
    // ========================================================================

    #[test]
    fn test_join_adds_member_and_history_and_system_entry() {
        let mut state = RoomState::default();
        state.join("U1");

        assert_eq!(state.members, vec!["U1"]);
        assert_eq!(state.history_members, vec!["U1"]);
        assert_eq!(state.chat.len(), 1);
        assert_eq!(state.chat[0].id, 1);
        assert_eq!(
            state.chat[0].body,
            ChatBody::System {
                event: SystemEvent::Joined,
                subject_id: "U1".to_string(),
                text: "Connected to the room".to_string(),
            }
        );
    }

    #[test]
    fn test_join_is_idempotent_for_membership() {
        let mut state = RoomState::default();
        state.join("u1");
        state.join("u1");

        assert_eq!(state.members, vec!["u1"]);
        assert_eq!(state.history_members, vec!["u1"]);
    }

    #[test]
    fn test_leave_keeps_history() {
        let mut state = RoomState::default();
        state.join("u1");
        state.join("u2");
        state.leave("u1");

        assert_eq!(state.members, vec!["u2"]);
        assert_eq!(state.history_members, vec!["u1", "u2"]);
    }

    #[test]
    fn test_members_subset_of_history_through_any_sequence() {
        let mut state = RoomState::default();
        state.join("u1");
        state.join("u2");
        state.join("u3");
        state.leave("u2");
        state.toggle_block("u3");
        state.join("u2");
        state.leave("u1");
        state.toggle_block("u3");

        for member in &state.members {
            assert!(state.history_members.contains(member));
        }
    }

    #[test]
    fn test_message_ids_are_sequential() {
        let mut state = RoomState::default();
        assert_eq!(message(&mut state, "u1", "one"), 1);
        assert_eq!(message(&mut state, "u2", "two"), 2);
        assert_eq!(state.push_system(SystemEvent::Left, "u1"), 3);
    }

    #[test]
    fn test_message_reply_reference_is_kept() {
        let mut state = RoomState::default();
        message(&mut state, "u1", "first");
        let id = state.push_message("u2", "reply".to_string(), Some(1), Utc::now());

        match &state.chat[(id - 1) as usize].body {
            ChatBody::Message { reply_to, .. } => assert_eq!(*reply_to, Some(1)),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_mark_deleted_touches_only_target() {
        let mut state = RoomState::default();
        message(&mut state, "u1", "one");
        message(&mut state, "u1", "two");
        message(&mut state, "u1", "three");

        assert!(state.mark_deleted(2));

        assert!(!state.chat[0].deleted);
        assert!(state.chat[1].deleted);
        assert!(!state.chat[2].deleted);
        // Order and content are untouched.
        let ids: Vec<u32> = state.chat.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_mark_deleted_unknown_id() {
        let mut state = RoomState::default();
        message(&mut state, "u1", "one");
        assert!(!state.mark_deleted(99));
    }

    #[test]
    fn test_block_removes_presence_and_appends_entry() {
        let mut state = RoomState::default();
        state.join("u1");
        state.join("u2");

        let change = state.toggle_block("u2");

        assert_eq!(change, BlockChange::Blocked);
        assert_eq!(state.members, vec!["u1"]);
        assert_eq!(state.blocked, vec!["u2"]);
        assert_eq!(state.history_members, vec!["u1", "u2"]);
        assert!(matches!(
            state.chat.last().map(|m| &m.body),
            Some(ChatBody::System {
                event: SystemEvent::Blocked,
                ..
            })
        ));
    }

    #[test]
    fn test_unblock_does_not_restore_presence() {
        let mut state = RoomState::default();
        state.join("u1");
        state.toggle_block("u1");

        let change = state.toggle_block("u1");

        assert_eq!(change, BlockChange::Unblocked);
        assert!(state.blocked.is_empty());
        assert!(state.members.is_empty());
        assert!(matches!(
            state.chat.last().map(|m| &m.body),
            Some(ChatBody::System {
                event: SystemEvent::Unblocked,
                ..
            })
        ));
    }
}
