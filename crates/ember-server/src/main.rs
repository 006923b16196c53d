use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use ember_api::auth::{self, AppState, AppStateInner};
use ember_api::middleware::require_auth;
use ember_api::{admin, matching, messages, profiles};
use ember_db::Database;
use ember_gateway::connection;
use ember_gateway::dispatcher::Dispatcher;
use ember_gateway::presence::PresenceRegistry;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("EMBER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("EMBER_DB_PATH").unwrap_or_else(|_| "ember.db".into());
    let host = std::env::var("EMBER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("EMBER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let uploads_dir = PathBuf::from(
        std::env::var("EMBER_UPLOADS_DIR").unwrap_or_else(|_| "uploads".into()),
    );

    // An unreachable database is fatal before the listener binds.
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    std::fs::create_dir_all(&uploads_dir)?;

    // Shared state. The presence registry lives for the whole server and
    // is injected into both the gateway dispatcher and the HTTP state.
    let presence = PresenceRegistry::new();
    let dispatcher = Dispatcher::new(presence);
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret,
        dispatcher: dispatcher.clone(),
        uploads_dir: uploads_dir.clone(),
    });

    let server_state = ServerState { dispatcher, db };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/discover", get(matching::discover))
        .route("/swipe", post(matching::swipe))
        .route("/matches", get(matching::matches))
        .route("/conversations", get(messages::conversations))
        .route("/messages/{user_id}", get(messages::get_messages))
        .route("/messages/{user_id}", post(messages::send_message))
        .route("/messages/{user_id}/read", post(messages::mark_read))
        .route("/profile", put(profiles::update_profile))
        .route("/photos", post(profiles::upload_photo))
        .route("/photos/{photo_id}/primary", post(profiles::set_primary_photo))
        .route("/photos/{photo_id}", delete(profiles::delete_photo))
        .route("/admin/video-settings", get(admin::get_video_settings))
        .route("/admin/video-settings", post(admin::update_video_settings))
        .route("/call/token", post(admin::call_token))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(server_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ember server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db))
}
