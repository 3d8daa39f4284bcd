//! Room state synchronization
//!
//! Provides WebSocket-based watch-together rooms with:
//! - Shared membership, chat log, block list, and playback state per room
//! - A per-room serialized read-modify-write mutation pipeline
//! - Deterministic enrichment (presence, settings, gift provenance)
//! - Encrypted snapshot fan-out to every room subscriber
//! - A REST surface for the room lifecycle

pub mod api;
pub mod broadcast;
pub mod crypto;
pub mod enrich;
pub mod pipeline;
pub mod protocol;
pub mod state;
pub mod store;
pub mod websocket;

pub use api::{AuthUser, RoomsState, rooms_router};
pub use broadcast::Broadcaster;
pub use crypto::{CipherError, PayloadCipher};
pub use enrich::{EnrichedUser, Presence, RoomView, enrich};
pub use pipeline::{Mutation, PipelineError, RoomPipeline};
pub use protocol::{ClientEvent, ErrorCode, GiftPayload, ServerEvent};
pub use state::{ChatBody, ChatEntry, Gift, RoomId, RoomState, SystemEvent, UserId, VideoSettings};
pub use store::{NewRoom, RoomCatalog, RoomPatch, RoomRecord, Store, StoreError, UserRecord};
pub use websocket::ws_handler;
