use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use watchroom::core::auth::JwtService;
use watchroom::core::config::Config;
use watchroom::core::db::{DbConfig, MySqlStore, create_pool_with_migrations};
use watchroom::core::rooms::{PayloadCipher, RoomsState, rooms_router, ws_handler};

#[tokio::main]
async fn main() {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load application config from environment variables
    let config = Config::from_env();

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: database={}, secret_key={}",
        config.has_database(),
        config.has_secret_key()
    );

    let db_config = DbConfig::from_env().expect("DATABASE_URL environment variable is not set");
    let pool = create_pool_with_migrations(&db_config)
        .await
        .expect("failed to connect to the database");

    let jwt = JwtService::from_env().expect("JWT_SECRET environment variable is not set");
    let cipher = PayloadCipher::new(config.secret_key_or_panic());

    let store = Arc::new(MySqlStore::new(pool));
    let state = RoomsState::new(store, jwt, cipher);

    let app = Router::new()
        // WebSocket endpoint for the real-time room surface: ws://{host}/ws?token={jwt}
        .route(
            "/ws",
            get(ws_handler::<MySqlStore>).with_state(state.clone()),
        )
        // REST API for the room lifecycle
        .merge(rooms_router(state))
        .layer(CorsLayer::permissive());

    let addr = config.bind_addr().to_string();
    tracing::info!("listening on http://{}", addr);
    tracing::info!("room WebSocket: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind server address");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
