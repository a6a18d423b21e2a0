//! EventHub Server - realtime messaging for users and event communities
//!
//! This crate provides:
//! - Direct and event-group messaging with attachments, replies and forwards
//! - Delivery and read receipts, reactions, stars and deletion
//! - A WebSocket gateway for live events, typing, presence and call signaling
//! - Admin moderation: labels, internal notes and user reports

pub mod calls;
pub mod config;
pub mod conversations;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod messaging;
pub mod models;
pub mod notify;
pub mod presence;
pub mod storage;
pub mod uploads;
pub mod websocket;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::calls::CallRegistry;
use crate::config::Config;
use crate::messaging::MessagingService;
use crate::notify::{LogNotifier, OfflineNotifier};
use crate::presence::{InMemoryPresence, PresenceTracker};
use crate::storage::Storage;
use crate::uploads::AttachmentStore;
use crate::websocket::Gateway;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub messaging: MessagingService,
}

impl AppState {
    /// Wire storage, presence, gateway and uploads with the default notifier
    pub async fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let storage = Arc::new(Storage::new(&config.storage.database_path).await?);
        Self::with_storage(config, storage, Arc::new(LogNotifier)).await
    }

    pub async fn with_storage(
        config: Arc<Config>,
        storage: Arc<Storage>,
        notifier: Arc<dyn OfflineNotifier>,
    ) -> anyhow::Result<Self> {
        let uploads = AttachmentStore::new(
            &config.storage.uploads_path,
            config.limits.max_file_size_bytes(),
        )
        .await?;
        let presence: Arc<dyn PresenceTracker> = Arc::new(InMemoryPresence::new());

        let messaging = MessagingService::new(
            storage.clone(),
            presence,
            Arc::new(Gateway::new()),
            Arc::new(CallRegistry::new()),
            uploads,
            notifier,
            config.limits.clone(),
            config.realtime.clone(),
        );

        Ok(Self { config, storage, messaging })
    }
}

pub fn build_router(state: AppState) -> Router {
    // Room for every attachment of one message plus form overhead
    let body_limit = state
        .config
        .limits
        .max_file_size_bytes()
        .saturating_mul(state.config.limits.max_attachments.max(1))
        .saturating_add(1024 * 1024);
    let uploads_dir = ServeDir::new(&state.config.storage.uploads_path);

    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))

        // Messages
        .route("/api/v1/messages/conversations", get(handlers::messages::conversations))
        .route("/api/v1/messages/history/:chat_type/:chat_id", get(handlers::messages::history))
        .route("/api/v1/messages/send", post(handlers::messages::send))
        .route("/api/v1/messages/send-with-files", post(handlers::messages::send_with_files))
        .route("/api/v1/messages/send-audio", post(handlers::messages::send_audio))
        .route("/api/v1/messages/mark-read", post(handlers::messages::mark_read))
        .route("/api/v1/messages/search", get(handlers::messages::search))
        .route("/api/v1/messages/starred", get(handlers::messages::starred))
        .route("/api/v1/messages/online", get(handlers::messages::online))
        .route("/api/v1/messages/stats", get(handlers::messages::stats))
        .route("/api/v1/messages/:message_id", delete(handlers::messages::delete))
        .route(
            "/api/v1/messages/:message_id/react",
            post(handlers::messages::react).delete(handlers::messages::unreact),
        )
        .route("/api/v1/messages/:message_id/reply", post(handlers::messages::reply))
        .route("/api/v1/messages/:message_id/forward", post(handlers::messages::forward))
        .route("/api/v1/messages/:message_id/star", post(handlers::messages::star))
        .route("/api/v1/messages/:message_id/report", post(handlers::messages::report))

        // Moderation
        .route("/api/v1/admin/messages", get(handlers::admin::list_by_label))
        .route("/api/v1/admin/messages/:message_id", get(handlers::admin::get_record))
        .route("/api/v1/admin/messages/:message_id/labels", post(handlers::admin::add_label))
        .route(
            "/api/v1/admin/messages/:message_id/labels/:label",
            delete(handlers::admin::remove_label),
        )
        .route("/api/v1/admin/messages/:message_id/notes", post(handlers::admin::add_note))

        // WebSocket for real-time communication
        .route("/ws", get(handlers::websocket::websocket_handler))

        // Stored attachments
        .nest_service(uploads::URL_PREFIX, uploads_dir)

        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
