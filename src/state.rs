use sqlx::SqlitePool;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;

/// A bearer token issued at login.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub user_id: i64,
    pub username: String,
    /// Last time the token was used; the TTL slides from here.
    pub last_seen: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Issued bearer tokens, keyed by token.
    pub sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
