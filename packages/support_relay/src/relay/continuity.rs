//! Session Continuity
//!
//! Binds a browser's session token to a durable admin login so a returning
//! admin is promoted on connect without re-entering the password.

use std::time::Duration;

use tracing::{info, warn};

use crate::auth::{AdminSecret, SessionToken};
use crate::error::{RelayError, RelayResult};
use crate::models::AdminSession;
use crate::repository::RelayRepository;

#[derive(Clone)]
pub struct SessionContinuity {
    repo: RelayRepository,
    secret: AdminSecret,
    ttl: Duration,
}

impl SessionContinuity {
    pub fn new(repo: RelayRepository, secret: AdminSecret, ttl: Duration) -> Self {
        Self { repo, secret, ttl }
    }

    /// The live admin session for this token, if any.
    pub async fn recall_admin(&self, token: &SessionToken) -> RelayResult<Option<AdminSession>> {
        self.repo.get_admin_session(token.as_str()).await
    }

    /// Check the submitted password and persist the admin session.
    ///
    /// Logging in again with the same token keeps the same `ADMIN-<seq>` name.
    pub async fn attempt_login(
        &self,
        token: &SessionToken,
        submitted: &str,
    ) -> RelayResult<AdminSession> {
        if !self.secret.verify(submitted) {
            warn!("Admin login rejected");
            return Err(RelayError::Auth);
        }

        let session = self.repo.upsert_admin_session(token.as_str(), self.ttl).await?;
        info!("Admin login accepted as {}", session.display_name());
        Ok(session)
    }

    /// Clear the durable record. Returns whether one existed.
    pub async fn logout(&self, token: &SessionToken) -> RelayResult<bool> {
        self.repo.delete_admin_session(token.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenSigner;
    use crate::relay::test_helpers::test_secret;
    use crate::repository::test_helpers;

    async fn continuity() -> SessionContinuity {
        let repo = test_helpers::test_repository().await;
        SessionContinuity::new(repo, test_secret(), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn login_then_recall() {
        let continuity = continuity().await;
        let token = TokenSigner::new(b"k").unwrap().mint();

        assert!(continuity.recall_admin(&token).await.unwrap().is_none());
        let session = continuity.attempt_login(&token, "letmein").await.unwrap();
        let recalled = continuity.recall_admin(&token).await.unwrap().unwrap();
        assert_eq!(recalled.display_name(), session.display_name());
    }

    #[tokio::test]
    async fn wrong_password_is_auth_error() {
        let continuity = continuity().await;
        let token = TokenSigner::new(b"k").unwrap().mint();

        let err = continuity.attempt_login(&token, "nope").await.unwrap_err();
        assert!(matches!(err, RelayError::Auth));
        assert!(continuity.recall_admin(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn admins_get_sequential_names() {
        let continuity = continuity().await;
        let signer = TokenSigner::new(b"k").unwrap();
        let first = continuity
            .attempt_login(&signer.mint(), "letmein")
            .await
            .unwrap();
        let second = continuity
            .attempt_login(&signer.mint(), "letmein")
            .await
            .unwrap();
        assert_eq!(first.display_name(), "ADMIN-1");
        assert_eq!(second.display_name(), "ADMIN-2");
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let continuity = continuity().await;
        let token = TokenSigner::new(b"k").unwrap().mint();
        continuity.attempt_login(&token, "letmein").await.unwrap();

        assert!(continuity.logout(&token).await.unwrap());
        assert!(continuity.recall_admin(&token).await.unwrap().is_none());
        assert!(!continuity.logout(&token).await.unwrap());
    }
}
