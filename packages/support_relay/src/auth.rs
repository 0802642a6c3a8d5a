//! Session tokens and the shared admin secret.
//!
//! A browser holds one opaque token in a cookie: `<uuid>.<tag>`, where the tag
//! is HMAC-SHA256 over the uuid. Tokens whose tag does not verify are
//! treated as absent. The token keys both the durable admin session and the
//! participant id, so a reload lands on the same history.

use anyhow::Result;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Session tokens
// =============================================================================

/// A verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable participant id for this browser: first 16 bytes of
    /// SHA-256 over the token, hex.
    pub fn participant_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"sid:");
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }
}

/// Mints and verifies session tokens with a server-held key.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("Invalid session key: {e}"))?;
        Ok(Self { mac })
    }

    /// Per-process key: tokens stop verifying after a restart.
    pub fn random() -> Result<Self> {
        let mut key = [0u8; 32];
        rand::rng().fill(&mut key);
        Self::new(&key)
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        match &config.session_secret {
            Some(secret) => Self::new(secret.as_bytes()),
            None => {
                warn!(
                    "No session secret configured (auth.session_secret / SECRET_KEY); \
                     admin sessions will not survive a restart"
                );
                Self::random()
            }
        }
    }

    pub fn mint(&self) -> SessionToken {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let tag = hex::encode(self.mac(&id).finalize().into_bytes());
        SessionToken(format!("{id}.{tag}"))
    }

    pub fn verify(&self, raw: &str) -> Option<SessionToken> {
        let (id, tag) = raw.split_once('.')?;
        if id.is_empty() {
            return None;
        }
        let tag = hex::decode(tag).ok()?;
        self.mac(id).verify_slice(&tag).ok()?;
        Some(SessionToken(raw.to_string()))
    }

    fn mac(&self, id: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac
    }
}

// =============================================================================
// Cookie transport
// =============================================================================

/// The verified token from the request cookie, or a fresh one plus the jar
/// that sets it.
pub fn session_from_jar(
    jar: CookieJar,
    config: &AuthConfig,
    signer: &TokenSigner,
) -> (CookieJar, SessionToken) {
    if let Some(token) = jar
        .get(&config.cookie_name)
        .and_then(|c| signer.verify(c.value()))
    {
        return (jar, token);
    }

    let token = signer.mint();
    let jar = jar.add(session_cookie(config, &token));
    (jar, token)
}

pub fn session_cookie(config: &AuthConfig, token: &SessionToken) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token.as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(config.https)
        .same_site(SameSite::Lax)
        .permanent()
        .build()
}

// =============================================================================
// Admin secret
// =============================================================================

/// The shared admin password, held only as an Argon2id hash.
#[derive(Clone)]
pub struct AdminSecret {
    hash: Option<String>,
}

impl AdminSecret {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        match &config.admin_password {
            Some(password) => Ok(Self {
                hash: Some(hash_password(password)?),
            }),
            None => {
                warn!(
                    "No admin password configured (auth.admin_password / ADMIN_PASS); \
                     admin login is disabled"
                );
                Ok(Self { hash: None })
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.hash.is_some()
    }

    /// Always false when no password is configured.
    pub fn verify(&self, submitted: &str) -> bool {
        match &self.hash {
            Some(hash) => verify_password(submitted, hash),
            None => false,
        }
    }
}

/// Hash a password with Argon2id and a random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash admin password: {e}"))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored admin hash is unreadable: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthFileConfig;

    fn auth_config(password: Option<&str>) -> AuthConfig {
        AuthConfig::from_file(&AuthFileConfig {
            admin_password: password.map(String::from),
            session_secret: Some("test-secret".into()),
            ..Default::default()
        })
    }

    // ── tokens ──────────────────────────────────────────────────────────

    #[test]
    fn minted_tokens_verify() {
        let signer = TokenSigner::new(b"k").unwrap();
        let token = signer.mint();
        assert_eq!(signer.verify(token.as_str()), Some(token));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let signer = TokenSigner::new(b"k").unwrap();
        let token = signer.mint();
        let (id, tag) = token.as_str().split_once('.').unwrap();

        let other_id = format!("{}x.{}", id, tag);
        assert!(signer.verify(&other_id).is_none());
        assert!(signer.verify(id).is_none());
        assert!(signer.verify("").is_none());
        assert!(TokenSigner::new(b"other").unwrap().verify(token.as_str()).is_none());
    }

    #[test]
    fn tag_is_hmac_sha256_of_the_id() {
        let signer = TokenSigner::new(b"k").unwrap();
        let id = "0123456789abcdef0123456789abcdef";
        let mut mac = HmacSha256::new_from_slice(b"k").unwrap();
        mac.update(id.as_bytes());
        let tag = hex::encode(mac.finalize().into_bytes());

        let raw = format!("{id}.{tag}");
        assert_eq!(signer.verify(&raw).map(|t| t.as_str().to_string()), Some(raw));
        // Truncated, non-hex and padded tags do not verify
        assert!(signer.verify(&format!("{id}.{}", &tag[..32])).is_none());
        assert!(signer.verify(&format!("{id}.zz{}", &tag[2..])).is_none());
        assert!(signer.verify(&format!("{id}.{tag}00")).is_none());
    }

    #[test]
    fn participant_id_is_stable_and_short() {
        let signer = TokenSigner::new(b"k").unwrap();
        let token = signer.mint();
        let pid = token.participant_id();
        assert_eq!(pid.len(), 32);
        assert_eq!(pid, token.participant_id());
        assert_ne!(pid, signer.mint().participant_id());
    }

    // ── cookies ─────────────────────────────────────────────────────────

    #[test]
    fn missing_cookie_mints_and_sets() {
        let config = auth_config(None);
        let signer = TokenSigner::from_config(&config).unwrap();
        let (jar, token) = session_from_jar(CookieJar::new(), &config, &signer);
        let cookie = jar.get("relay_session").unwrap();
        assert_eq!(cookie.value(), token.as_str());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn valid_cookie_is_reused() {
        let config = auth_config(None);
        let signer = TokenSigner::from_config(&config).unwrap();
        let existing = signer.mint();
        let jar = CookieJar::new().add(session_cookie(&config, &existing));
        let (_, token) = session_from_jar(jar, &config, &signer);
        assert_eq!(token, existing);
    }

    #[test]
    fn forged_cookie_is_replaced() {
        let config = auth_config(None);
        let signer = TokenSigner::from_config(&config).unwrap();
        let jar = CookieJar::new().add(Cookie::new("relay_session", "abc.def"));
        let (jar, token) = session_from_jar(jar, &config, &signer);
        assert_ne!(token.as_str(), "abc.def");
        assert_eq!(jar.get("relay_session").unwrap().value(), token.as_str());
    }

    // ── admin secret ────────────────────────────────────────────────────

    #[test]
    fn admin_secret_verifies() {
        let secret = AdminSecret::from_config(&auth_config(Some("hunter2"))).unwrap();
        assert!(secret.is_configured());
        assert!(secret.verify("hunter2"));
        assert!(!secret.verify("hunter3"));
        assert!(!secret.verify(""));
    }

    #[test]
    fn unconfigured_secret_rejects_everything() {
        let secret = AdminSecret::from_config(&auth_config(None)).unwrap();
        assert!(!secret.is_configured());
        assert!(!secret.verify(""));
        assert!(!secret.verify("anything"));
    }
}
