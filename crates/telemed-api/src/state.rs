//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both the CLI and
//! the REST/WebSocket API. Services are generic over repository traits, but
//! AppState pins them to the concrete infra implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use telemed_core::chat::service::{ChatService, RetryPolicy};
use telemed_core::realtime::broadcast::Broadcaster;
use telemed_core::realtime::registry::ConnectionRegistry;
use telemed_infra::config::load_chat_config;
use telemed_infra::sqlite::consultation::SqliteConsultationRepository;
use telemed_infra::sqlite::pool::{DatabasePool, resolve_data_dir};
use telemed_infra::sqlite::token::SqliteTokenRepository;
use telemed_infra::sqlite::user::SqliteUserRepository;
use telemed_types::config::ChatConfig;

/// Concrete type alias for the chat service pinned to the infra
/// implementations.
pub type ConcreteChatService = ChatService<SqliteConsultationRepository, SqliteUserRepository>;

/// Shared application state holding all services.
///
/// Used by CLI commands, REST handlers, and the WebSocket session handler.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub token_repo: Arc<SqliteTokenRepository>,
    pub user_repo: Arc<SqliteUserRepository>,
    pub registry: Arc<ConnectionRegistry>,
    pub config: ChatConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        Self::init_at(data_dir).await
    }

    /// Initialize against an explicit data directory (used by tests).
    pub async fn init_at(data_dir: PathBuf) -> anyhow::Result<Self> {
        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_chat_config(&data_dir).await;

        // Initialize database
        let db_url = format!("sqlite://{}?mode=rwc", data_dir.join("telemed.db").display());
        let db_pool = DatabasePool::new(&db_url).await?;

        // In-memory connection registry and the fan-out engine over it
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(
            Arc::clone(&registry),
            Duration::from_millis(config.send_timeout_ms),
        );

        // Wire the chat service with its repositories
        let consultation_repo = SqliteConsultationRepository::new(db_pool.clone());
        let service_users = SqliteUserRepository::new(db_pool.clone());
        let retry = RetryPolicy {
            max_attempts: config.retry_attempts,
            backoff_base: Duration::from_millis(config.retry_backoff_ms),
        };
        let chat_service = ChatService::new(consultation_repo, service_users, broadcaster, retry);

        Ok(Self {
            chat_service: Arc::new(chat_service),
            token_repo: Arc::new(SqliteTokenRepository::new(db_pool.clone())),
            user_repo: Arc::new(SqliteUserRepository::new(db_pool.clone())),
            registry,
            config,
            data_dir,
            db_pool,
        })
    }
}
