use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;

use crate::AppState;
use crate::auth::TokenSigner;
use crate::config::{AuthConfig, AuthFileConfig, ServerConfig};
use crate::db::Database;
use crate::metrics::RelayMetrics;
use crate::relay::continuity::SessionContinuity;
use crate::relay::presence::PresenceRegistry;
use crate::relay::router::EventRouter;
use crate::relay::test_helpers::{ADMIN_PASSWORD, test_secret};
use crate::repository::RelayRepository;
use crate::retry::RetryConfig;

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
pub async fn test_app_state() -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    let db = Arc::new(Database { pool: pool.clone() });
    let repo = RelayRepository::new(
        pool,
        RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        },
    );

    let auth_config = AuthConfig::from_file(&AuthFileConfig {
        admin_password: Some(ADMIN_PASSWORD.into()),
        ..Default::default()
    });
    let metrics = Arc::new(RelayMetrics::new());
    let continuity = SessionContinuity::new(repo.clone(), test_secret(), auth_config.session_ttl);
    let router = Arc::new(EventRouter::new(
        Arc::new(PresenceRegistry::new()),
        repo.clone(),
        continuity,
        metrics.clone(),
        ServerConfig::default(),
    ));

    AppState {
        auth_config: Arc::new(auth_config),
        signer: Arc::new(TokenSigner::new(b"test-key").unwrap()),
        metrics,
        db,
        repo,
        router,
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
