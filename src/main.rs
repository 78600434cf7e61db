mod config;
mod docs;
mod handlers;
mod models;
mod relay;
mod routes;
mod services;
mod store;
mod ws;

use std::panic;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use config::Config;
use docs::ApiDoc;
use relay::redis_relay::{spawn_subscriber, RedisRelay};
use relay::PresenceRelay;
use routes::create_api_routes;
use services::viewer_registry::ViewerRegistry;
use store::memory_store::MemoryViewerStore;
use store::redis_store::RedisViewerStore;
use store::ViewerBackend;
use ws::rooms::CaseRooms;

/// Shared application state for the presence service.
pub struct AppState {
    pub registry: ViewerRegistry,
    pub rooms: CaseRooms,
    pub relay: PresenceRelay,
    /// Identifies this process on the relay, so looped-back publishes are skipped.
    pub instance_id: String,
    /// Active WebSocket connections, for diagnostics.
    pub n_connections: AtomicU32,
}

impl AppState {
    pub fn new(registry: ViewerRegistry, rooms: CaseRooms, relay: PresenceRelay) -> Self {
        Self {
            registry,
            rooms,
            relay,
            instance_id: format!("{}.{}", std::process::id(), Uuid::new_v4().as_simple()),
            n_connections: AtomicU32::new(0),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "caseport_presence=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let viewer_ttl = Duration::from_secs(config.viewer_ttl_secs);
    let rooms = CaseRooms::new();

    // Pick the viewer store and relay. No Redis means single-instance mode:
    // presence still works, but only for connections on this process.
    let (backend, relay) = match &config.redis_url {
        Some(redis_url) => {
            let backend = match RedisViewerStore::connect(redis_url, viewer_ttl).await {
                Ok(store) => {
                    info!("Connected viewer store to Redis");
                    ViewerBackend::Redis(store)
                }
                Err(e) => {
                    error!("Failed to connect viewer store to Redis: {}", e);
                    warn!("Falling back to in-process viewer store");
                    ViewerBackend::Memory(MemoryViewerStore::new(viewer_ttl))
                }
            };
            let relay = match RedisRelay::connect(redis_url).await {
                Ok(relay) => PresenceRelay::Redis(relay),
                Err(e) => {
                    error!("Failed to connect presence relay: {}", e);
                    warn!("Viewer counts will only reach connections on this instance");
                    PresenceRelay::Local
                }
            };
            (backend, relay)
        }
        None => {
            warn!("No REDIS_URL configured - presence is limited to this instance");
            (
                ViewerBackend::Memory(MemoryViewerStore::new(viewer_ttl)),
                PresenceRelay::Local,
            )
        }
    };

    let state = Arc::new(AppState::new(ViewerRegistry::new(backend), rooms, relay));

    // Start the relay subscription when distributed fan-out is available
    if let (Some(redis_url), PresenceRelay::Redis(_)) = (&config.redis_url, &state.relay) {
        match redis::Client::open(redis_url.as_str()) {
            Ok(client) => {
                spawn_subscriber(
                    client,
                    state.rooms.clone(),
                    state.instance_id.clone(),
                    config.relay_max_reconnect_attempts,
                );
            }
            Err(e) => {
                error!("Failed to create relay subscriber client: {}", e);
                warn!("Viewer counts will only reach connections on this instance");
            }
        }
    }

    // Create API routes
    let api_routes = create_api_routes(state.clone());

    // Combine all routes
    let mut app_routes = Router::new()
        // Mount API routes
        .nest("/api", api_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    // Apply CORS when origins are configured
    if let Some(cors_origins) = &config.cors_origins {
        let origins: Vec<HeaderValue> = cors_origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        app_routes = app_routes.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    // Start the HTTP server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!(
        "📡 Presence WebSocket available at ws://{}/api/v1/presence",
        config.server_address()
    );
    info!(
        "📚 Swagger UI available at http://{}/swagger",
        config.server_address()
    );

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
