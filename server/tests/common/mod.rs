//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventhub_server::config::Config;
use eventhub_server::crypto;
use eventhub_server::models::{Event, MessageView, User, WsServerMessage};
use eventhub_server::notify::OfflineNotifier;
use eventhub_server::presence::ConnectionId;
use eventhub_server::storage::Storage;
use eventhub_server::AppState;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Records every offline notification instead of logging it
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[axum::async_trait]
impl OfflineNotifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, message: &MessageView) {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), message.message.id.clone()));
    }
}

pub struct TestApp {
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.database_path = dir.path().join("test.db").to_string_lossy().into_owned();
    config.storage.uploads_path = dir.path().join("uploads").to_string_lossy().into_owned();
    config.auth.socket_auth_timeout_secs = 2;
    config.realtime.delivery_check_delay_ms = 50;
    config.realtime.ring_timeout_secs = 1;
    config
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&dir));
        let storage = Arc::new(Storage::new(&config.storage.database_path).await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState::with_storage(config, storage, notifier.clone()).await.unwrap();
        Self { state, notifier, _dir: dir }
    }

    pub async fn user(&self, name: &str) -> User {
        let email = format!("{}@example.com", name.to_lowercase());
        self.state.storage.create_user(name, &email, false).await.unwrap()
    }

    pub async fn admin(&self, name: &str) -> User {
        let email = format!("{}@example.com", name.to_lowercase());
        self.state.storage.create_user(name, &email, true).await.unwrap()
    }

    pub async fn token(&self, user: &User) -> String {
        let token = crypto::generate_session_token().unwrap();
        self.state.storage.create_session(&user.id, &token, 1).await.unwrap();
        token
    }

    pub async fn event(&self, name: &str, members: &[&User]) -> Event {
        let owner = members.first().map(|u| u.id.as_str()).unwrap_or("nobody");
        let event = self.state.storage.create_event(name, owner).await.unwrap();
        for member in members {
            self.state.storage.add_participant(&event.id, &member.id).await.unwrap();
        }
        event
    }

    /// Attach an in-process "socket" for the user
    pub async fn connect(&self, user: &User) -> Client {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.messaging.connect(user, conn, tx).await.unwrap();
        Client { conn, rx }
    }
}

pub struct Client {
    pub conn: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<WsServerMessage>,
}

impl Client {
    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<WsServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Wait for the first event matching `pred`, skipping others
    pub async fn wait_for<F>(&mut self, mut pred: F) -> WsServerMessage
    where
        F: FnMut(&WsServerMessage) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                match self.rx.recv().await {
                    Some(msg) if pred(&msg) => return msg,
                    Some(_) => continue,
                    None => panic!("connection closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for socket event")
    }
}
