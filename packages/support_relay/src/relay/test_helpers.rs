use std::sync::{Arc, LazyLock};
use std::time::Duration;

use tokio::sync::mpsc;

use super::continuity::SessionContinuity;
use super::presence::PresenceRegistry;
use super::protocol::{ClientEvent, ServerEvent};
use super::router::{ConnectionContext, EventRouter};
use crate::auth::{AdminSecret, SessionToken, TokenSigner};
use crate::config::{AuthConfig, AuthFileConfig, ServerConfig};
use crate::metrics::RelayMetrics;
use crate::repository::{RelayRepository, test_helpers::test_repository};

pub(crate) const ADMIN_PASSWORD: &str = "letmein";

/// Hashing is slow; share one secret across tests.
static SECRET: LazyLock<AdminSecret> = LazyLock::new(|| {
    let config = AuthConfig::from_file(&AuthFileConfig {
        admin_password: Some(ADMIN_PASSWORD.into()),
        ..Default::default()
    });
    AdminSecret::from_config(&config).expect("hash test admin password")
});

pub(crate) fn test_secret() -> AdminSecret {
    SECRET.clone()
}

/// A router wired to an in-memory store, plus handles to inspect it.
pub(crate) struct Harness {
    pub router: EventRouter,
    pub registry: Arc<PresenceRegistry>,
    pub repo: RelayRepository,
    pub continuity: SessionContinuity,
    pub metrics: Arc<RelayMetrics>,
    pub signer: TokenSigner,
}

/// One simulated browser link.
pub(crate) struct TestClient {
    pub ctx: ConnectionContext,
    pub rx: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    /// Everything queued for this client so far.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_limits(ServerConfig::default()).await
    }

    pub async fn with_limits(limits: ServerConfig) -> Self {
        let repo = test_repository().await;
        let registry = Arc::new(PresenceRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());
        let continuity =
            SessionContinuity::new(repo.clone(), test_secret(), Duration::from_secs(3600));
        let router = EventRouter::new(
            registry.clone(),
            repo.clone(),
            continuity.clone(),
            metrics.clone(),
            limits,
        );
        Self {
            router,
            registry,
            repo,
            continuity,
            metrics,
            signer: TokenSigner::new(b"test-key").unwrap(),
        }
    }

    pub fn client(&self, id: &str) -> TestClient {
        self.client_with_token(id, self.signer.mint())
    }

    pub fn client_with_token(&self, id: &str, token: SessionToken) -> TestClient {
        self.client_with_capacity(id, token, 64)
    }

    pub fn client_with_capacity(
        &self,
        id: &str,
        token: SessionToken,
        capacity: usize,
    ) -> TestClient {
        let (tx, rx) = mpsc::channel(capacity);
        TestClient {
            ctx: ConnectionContext::new(id.to_string(), token, tx),
            rx,
        }
    }

    /// A joined client that has logged in as admin. Its events are not drained.
    pub async fn admin(&self, id: &str) -> TestClient {
        let client = self.client(id);
        self.send(&client, ClientEvent::Join).await;
        self.send(
            &client,
            ClientEvent::AdminLoginAttempt {
                password: ADMIN_PASSWORD.into(),
            },
        )
        .await;
        assert!(self.registry.is_admin(id).await, "{id} failed to log in");
        client
    }

    pub async fn send(&self, client: &TestClient, event: ClientEvent) {
        self.router.process(&client.ctx, event).await;
    }
}

/// `(user, text)` of every `new_msg`, in order.
pub(crate) fn new_msgs(events: &[ServerEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::NewMsg { user, text, .. } => Some((user.clone(), text.clone())),
            _ => None,
        })
        .collect()
}

pub(crate) fn sys_msgs(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::SysMsg { msg } => Some(msg.clone()),
            _ => None,
        })
        .collect()
}
