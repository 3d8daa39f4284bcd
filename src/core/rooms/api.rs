//! REST API handlers for room management
//!
//! This module provides the HTTP API endpoints around the room lifecycle:
//! - POST /rooms                  - Create a new room
//! - GET  /rooms/public           - List open public rooms
//! - GET  /rooms/mine             - List the caller's open rooms
//! - GET  /rooms/{id}/entry       - Pre-join info for an open room
//! - POST /rooms/{id}/visibility  - Toggle the public flag
//! - POST /rooms/{id}/close       - Soft-close a room (owner only)
//!
//! Every endpoint requires a Bearer JWT. Room mutations from inside a room
//! go through the real-time surface, not this one.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::auth::JwtService;
use crate::core::rooms::broadcast::Broadcaster;
use crate::core::rooms::crypto::PayloadCipher;
use crate::core::rooms::pipeline::RoomPipeline;
use crate::core::rooms::state::{RoomId, UserId, decode_ids};
use crate::core::rooms::store::{NewRoom, RoomCatalog, Store};

/// Minutes a user must wait between room creations.
const ROOM_CREATION_COOLDOWN_MINUTES: i64 = 30;

/// Capacity limits selectable without premium.
const FREE_LIMITS: [i64; 2] = [2, 4];

/// Capacity limits selectable with premium.
const PREMIUM_LIMITS: [i64; 3] = [2, 4, 8];

/// Attempts at drawing an unused random room id before giving up.
const ROOM_ID_ATTEMPTS: usize = 32;

// ============================================================================
// Application State
// ============================================================================

/// Shared state for the room surfaces: the mutation pipeline, the broadcast
/// fan-out, the store, and the token validator. Built once at startup.
pub struct RoomsState<S> {
    pub store: Arc<S>,
    pub pipeline: Arc<RoomPipeline<S>>,
    pub broadcaster: Arc<Broadcaster>,
    pub jwt: JwtService,
}

impl<S> Clone for RoomsState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            pipeline: self.pipeline.clone(),
            broadcaster: self.broadcaster.clone(),
            jwt: self.jwt.clone(),
        }
    }
}

impl<S: Store> RoomsState<S> {
    pub fn new(store: Arc<S>, jwt: JwtService, cipher: PayloadCipher) -> Self {
        Self {
            pipeline: Arc::new(RoomPipeline::new(store.clone())),
            broadcaster: Arc::new(Broadcaster::new(cipher)),
            store,
            jwt,
        }
    }
}

// ============================================================================
// Authentication Extractor
// ============================================================================

/// The authenticated caller of a REST endpoint, extracted from the
/// `Authorization: Bearer` header and validated against the token service.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

impl<S> FromRequestParts<RoomsState<S>> for AuthUser
where
    S: Send + Sync + 'static,
{
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RoomsState<S>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        if token.is_empty() {
            return Err(unauthorized());
        }

        match state.jwt.validate_token(token) {
            Ok(claims) => Ok(AuthUser {
                user_id: claims.sub,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "rejecting request with invalid bearer token");
                Err(unauthorized())
            }
        }
    }
}

fn unauthorized() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new("Missing or invalid bearer token")),
    )
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub description: String,
    pub video_link: String,
    pub limit: i64,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub message: String,
    pub your_room_id: RoomId,
}

/// Returned instead of a new room while the creation cooldown is running.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationCooldown {
    pub remaining_minutes: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub description: String,
    pub members_count: usize,
    pub limit: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEntryInfo {
    pub members: Vec<UserId>,
    pub limit: i64,
    pub blocked: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub is_public: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// ============================================================================
// Router
// ============================================================================

/// Create the room management API router
pub fn rooms_router<S>(state: RoomsState<S>) -> Router
where
    S: Store + RoomCatalog,
{
    Router::new()
        .route("/rooms", post(create_room::<S>))
        .route("/rooms/public", get(list_public_rooms::<S>))
        .route("/rooms/mine", get(list_my_rooms::<S>))
        .route("/rooms/{room_id}/entry", get(room_entry::<S>))
        .route("/rooms/{room_id}/visibility", post(set_visibility::<S>))
        .route("/rooms/{room_id}/close", post(close_room::<S>))
        .with_state(state)
}

// ============================================================================
// API Handlers
// ============================================================================

/// Create a new room
///
/// POST /rooms
///
/// The capacity limit is validated against the caller's premium tier, and
/// creations are rate limited to one per half hour per user. The room id is
/// a random six-digit number, collision-checked against the store.
async fn create_room<S>(
    State(state): State<RoomsState<S>>,
    user: AuthUser,
    Json(request): Json<CreateRoomRequest>,
) -> impl IntoResponse
where
    S: Store + RoomCatalog,
{
    if request.description.trim().is_empty() || request.video_link.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("description and videoLink are required")),
        )
            .into_response();
    }

    let record = match state.store.user_by_id(&user.user_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(ApiError::new("User not found")))
                .into_response();
        }
        Err(e) => return store_failure(e),
    };

    let allowed: &[i64] = if record.is_premium {
        &PREMIUM_LIMITS
    } else {
        &FREE_LIMITS
    };
    if !allowed.contains(&request.limit) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("Invalid room capacity limit")),
        )
            .into_response();
    }

    if let Some(last) = record.last_room_creation {
        let elapsed = Utc::now().signed_duration_since(last).num_minutes();
        if elapsed < ROOM_CREATION_COOLDOWN_MINUTES {
            return (
                StatusCode::BAD_REQUEST,
                Json(CreationCooldown {
                    remaining_minutes: ROOM_CREATION_COOLDOWN_MINUTES - elapsed,
                }),
            )
                .into_response();
        }
    }

    let room_id = match generate_room_id(state.store.as_ref()).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("Could not allocate a room id")),
            )
                .into_response();
        }
        Err(e) => return store_failure(e),
    };

    let room = NewRoom {
        room_id,
        owner: user.user_id.clone(),
        description: request.description,
        limit: request.limit,
        video_link: request.video_link,
        is_public: request.is_public,
    };
    if let Err(e) = state.store.insert_room(room).await {
        return store_failure(e);
    }
    if let Err(e) = state.store.touch_room_creation(&user.user_id).await {
        return store_failure(e);
    }

    tracing::info!(room_id, user_id = %user.user_id, "room created");

    (
        StatusCode::CREATED,
        Json(RoomCreated {
            message: "Room created successfully".to_string(),
            your_room_id: room_id,
        }),
    )
        .into_response()
}

/// Draw random six-digit ids until one is unused.
async fn generate_room_id<S: RoomCatalog>(
    store: &S,
) -> Result<Option<RoomId>, crate::core::rooms::store::StoreError> {
    for _ in 0..ROOM_ID_ATTEMPTS {
        let candidate: RoomId = rand::thread_rng().gen_range(100_000..1_000_000);
        if !store.room_id_taken(candidate).await? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// List open public rooms owned by other users
///
/// GET /rooms/public
async fn list_public_rooms<S>(
    State(state): State<RoomsState<S>>,
    user: AuthUser,
) -> impl IntoResponse
where
    S: Store + RoomCatalog,
{
    match state.store.list_public_rooms(&user.user_id).await {
        Ok(rooms) => (StatusCode::OK, Json(summarize(rooms))).into_response(),
        Err(e) => store_failure(e),
    }
}

/// List the caller's open rooms
///
/// GET /rooms/mine
async fn list_my_rooms<S>(State(state): State<RoomsState<S>>, user: AuthUser) -> impl IntoResponse
where
    S: Store + RoomCatalog,
{
    match state.store.list_owned_rooms(&user.user_id).await {
        Ok(rooms) => (StatusCode::OK, Json(summarize(rooms))).into_response(),
        Err(e) => store_failure(e),
    }
}

fn summarize(rooms: Vec<crate::core::rooms::store::RoomRecord>) -> Vec<RoomSummary> {
    rooms
        .into_iter()
        .map(|room| RoomSummary {
            room_id: room.room_id,
            description: room.description.clone(),
            members_count: decode_ids(room.members.as_deref()).len(),
            limit: room.limit,
        })
        .collect()
}

/// Pre-join info for an open room
///
/// GET /rooms/{id}/entry
async fn room_entry<S>(
    State(state): State<RoomsState<S>>,
    _user: AuthUser,
    Path(room_id): Path<RoomId>,
) -> impl IntoResponse
where
    S: Store + RoomCatalog,
{
    match state.store.room_by_id(room_id).await {
        Ok(Some(room)) if !room.closed => {
            let info = RoomEntryInfo {
                members: decode_ids(room.members.as_deref()),
                limit: room.limit,
                blocked: decode_ids(room.blocked.as_deref()),
            };
            (StatusCode::OK, Json(info)).into_response()
        }
        Ok(_) => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Room not found or closed")),
        )
            .into_response(),
        Err(e) => store_failure(e),
    }
}

/// Toggle a room's public flag
///
/// POST /rooms/{id}/visibility
async fn set_visibility<S>(
    State(state): State<RoomsState<S>>,
    _user: AuthUser,
    Path(room_id): Path<RoomId>,
    Json(request): Json<VisibilityRequest>,
) -> impl IntoResponse
where
    S: Store + RoomCatalog,
{
    match state.store.set_visibility(room_id, request.is_public).await {
        Ok(true) => (StatusCode::OK, Json(SuccessResponse { success: true })).into_response(),
        Ok(false) => {
            (StatusCode::NOT_FOUND, Json(ApiError::new("Room not found"))).into_response()
        }
        Err(e) => store_failure(e),
    }
}

/// Soft-close a room (owner only)
///
/// POST /rooms/{id}/close
async fn close_room<S>(
    State(state): State<RoomsState<S>>,
    user: AuthUser,
    Path(room_id): Path<RoomId>,
) -> impl IntoResponse
where
    S: Store + RoomCatalog,
{
    let room = match state.store.room_by_id(room_id).await {
        Ok(Some(room)) => room,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(ApiError::new("Room not found")))
                .into_response();
        }
        Err(e) => return store_failure(e),
    };

    if room.owner != user.user_id {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiError::new("Only the owner can close the room")),
        )
            .into_response();
    }

    match state.store.close_room(room_id).await {
        Ok(_) => {
            tracing::info!(room_id, user_id = %user.user_id, "room closed");
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Err(e) => store_failure(e),
    }
}

fn store_failure(err: crate::core::rooms::store::StoreError) -> axum::response::Response {
    tracing::error!(error = %err, "store operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new("Storage unavailable")),
    )
        .into_response()
}

// ============================================================================
// Tests
// ============================================================================
