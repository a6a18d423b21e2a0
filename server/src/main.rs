//! EventHub Server - realtime messaging for events and their communities
//!
//! This binary handles:
//! - Direct and event-group messaging over HTTP
//! - Live delivery, receipts, typing and presence over WebSocket
//! - Call signaling relay
//! - Seeding users, tokens and events from the command line

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventhub_server::config::Config;
use eventhub_server::storage::Storage;
use eventhub_server::{build_router, crypto, AppState};

/// EventHub Server CLI
#[derive(Parser)]
#[command(name = "eventhub-server")]
#[command(about = "Realtime messaging server for EventHub communities")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user
    CreateUser {
        /// Admin master key for authorization
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        /// Grant moderation rights
        #[arg(long)]
        admin: bool,
    },

    /// Issue a bearer token for a user
    IssueToken {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        user_id: String,
    },

    /// Create an event; the owner becomes its first participant
    CreateEvent {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        name: String,

        /// User ID of the event owner
        #[arg(long)]
        owner: String,
    },

    /// Add a user to an event
    AddParticipant {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        event_id: String,

        #[arg(long)]
        user_id: String,
    },

    /// Deactivate a user and revoke all of their tokens
    DeactivateUser {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        user_id: String,
    },

    /// Revoke a single bearer token
    RevokeToken {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        token: String,
    },

    /// Remove a user from an event; their history stays
    RemoveParticipant {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        event_id: String,

        #[arg(long)]
        user_id: String,
    },

    /// List all users
    ListUsers {
        /// Admin master key
        #[arg(long)]
        admin_key: String,
    },

    /// Run the server
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "eventhub_server=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).await?;
    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CreateUser { admin_key, name, email, admin } => {
            create_user(&config, &admin_key, &name, &email, admin).await?;
        }
        Commands::IssueToken { admin_key, user_id } => {
            issue_token(&config, &admin_key, &user_id).await?;
        }
        Commands::CreateEvent { admin_key, name, owner } => {
            create_event(&config, &admin_key, &name, &owner).await?;
        }
        Commands::AddParticipant { admin_key, event_id, user_id } => {
            add_participant(&config, &admin_key, &event_id, &user_id).await?;
        }
        Commands::DeactivateUser { admin_key, user_id } => {
            deactivate_user(&config, &admin_key, &user_id).await?;
        }
        Commands::RevokeToken { admin_key, token } => {
            revoke_token(&config, &admin_key, &token).await?;
        }
        Commands::RemoveParticipant { admin_key, event_id, user_id } => {
            remove_participant(&config, &admin_key, &event_id, &user_id).await?;
        }
        Commands::ListUsers { admin_key } => {
            list_users(&config, &admin_key).await?;
        }
        Commands::Run => {
            run_server(config).await?;
        }
    }

    Ok(())
}

/// Open storage after checking the admin key
async fn admin_storage(config: &Config, admin_key: &str) -> anyhow::Result<Storage> {
    if admin_key != config.admin.master_key {
        anyhow::bail!("Invalid admin key");
    }
    Storage::new(&config.storage.database_path).await
}

async fn create_user(config: &Config, admin_key: &str, name: &str, email: &str, admin: bool) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    let user = storage.create_user(name, email, admin).await?;

    println!("=== New User Created ===");
    println!("User ID: {}", user.id);
    println!("Name: {}", user.name);
    println!("Email: {}", user.email);
    println!("Admin: {}", user.is_admin);
    println!("========================");

    Ok(())
}

async fn issue_token(config: &Config, admin_key: &str, user_id: &str) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    if storage.get_active_user(user_id).await?.is_none() {
        anyhow::bail!("User {} not found or inactive", user_id);
    }

    let token = crypto::generate_session_token()?;
    let expires_at = storage
        .create_session(user_id, &token, config.auth.session_ttl_hours)
        .await?;

    println!("=== Bearer Token Issued ===");
    println!("User ID: {}", user_id);
    println!("Token: {}", token);
    println!("Expires: {}", eventhub_server::models::from_millis(expires_at).to_rfc3339());
    println!("===========================");
    println!("The token will NOT be shown again!");

    Ok(())
}

async fn create_event(config: &Config, admin_key: &str, name: &str, owner: &str) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    if storage.get_active_user(owner).await?.is_none() {
        anyhow::bail!("User {} not found or inactive", owner);
    }

    let event = storage.create_event(name, owner).await?;
    storage.add_participant(&event.id, owner).await?;

    println!("Event created: {} ({})", event.name, event.id);

    Ok(())
}

async fn add_participant(config: &Config, admin_key: &str, event_id: &str, user_id: &str) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    if storage.get_event(event_id).await?.is_none() {
        anyhow::bail!("Event {} not found", event_id);
    }
    if storage.get_active_user(user_id).await?.is_none() {
        anyhow::bail!("User {} not found or inactive", user_id);
    }

    storage.add_participant(event_id, user_id).await?;
    println!("User {} added to event {}", user_id, event_id);

    Ok(())
}

async fn deactivate_user(config: &Config, admin_key: &str, user_id: &str) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    if storage.get_user(user_id).await?.is_none() {
        anyhow::bail!("User {} not found", user_id);
    }

    storage.deactivate_user(user_id).await?;
    println!("User {} has been deactivated", user_id);

    Ok(())
}

async fn revoke_token(config: &Config, admin_key: &str, token: &str) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    storage.invalidate_session(token).await?;
    println!("Token revoked");

    Ok(())
}

async fn remove_participant(config: &Config, admin_key: &str, event_id: &str, user_id: &str) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    storage.set_participant_status(event_id, user_id, "left").await?;
    println!("User {} removed from event {}", user_id, event_id);

    Ok(())
}

async fn list_users(config: &Config, admin_key: &str) -> anyhow::Result<()> {
    let storage = admin_storage(config, admin_key).await?;
    let users = storage.list_users().await?;

    println!("=== Registered Users ===");
    for user in users {
        println!(
            "User ID: {} | Name: {} | Email: {} | Admin: {} | Active: {}",
            user.id, user.name, user.email, user.is_admin, user.is_active
        );
    }

    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Starting EventHub Server v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(config.clone()).await?;
    let storage_for_cleanup = Arc::clone(&state.storage);
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;

    // Start cleanup task
    let cleanup_interval = config.storage.cleanup_interval_minutes.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(cleanup_interval * 60));
        loop {
            interval.tick().await;
            match storage_for_cleanup.cleanup_expired_sessions().await {
                Ok(removed) => {
                    if removed > 0 {
                        tracing::info!("Cleanup: removed {} expired sessions", removed);
                    }
                }
                Err(e) => {
                    tracing::error!("Cleanup failed: {}", e);
                }
            }
        }
    });

    axum::serve(listener, app).await?;

    Ok(())
}
