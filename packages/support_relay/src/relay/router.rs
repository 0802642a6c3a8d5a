//! Routing Engine
//!
//! Decides, for every inbound event, who receives what and whether it is
//! persisted. Handlers return [`Envelope`]s; [`EventRouter::deliver`] puts
//! them on recipients' outboxes without ever waiting on another link.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::continuity::SessionContinuity;
use super::presence::{Outbox, PresenceRegistry};
use super::protocol::{AckStatus, ClientEvent, ServerEvent};
use super::roster::RosterBroadcaster;
use super::{Envelope, visitor_name};
use crate::auth::SessionToken;
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::models::{ADMIN_SENDER_NAME, ADMINS_RECEIVER};
use crate::repository::RelayRepository;

/// Label on the echo of a visitor's own message.
const YOU_LABEL: &str = "You";
/// Stand-in for a reply target that has disconnected.
const OFFLINE_TARGET: &str = "visitor (offline)";

/// How long a link's own reply may wait for room in its outbox.
const OWN_SEND_TIMEOUT: Duration = Duration::from_secs(5);

const NO_ADMIN_NOTICE: &str =
    "No admin is online right now. Your message has been saved and will be answered soon.";

/// Per-connection state owned by the transport and passed into the router.
pub struct ConnectionContext {
    pub connection_id: String,
    pub token: SessionToken,
    pub outbox: Outbox,
    /// Set once this link holds `connection_id` in the registry
    joined: AtomicBool,
    failed_logins: AtomicU32,
}

impl ConnectionContext {
    pub fn new(connection_id: String, token: SessionToken, outbox: Outbox) -> Self {
        Self {
            connection_id,
            token,
            outbox,
            joined: AtomicBool::new(false),
            failed_logins: AtomicU32::new(0),
        }
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }
}

pub struct EventRouter {
    registry: Arc<PresenceRegistry>,
    repo: RelayRepository,
    continuity: SessionContinuity,
    roster: RosterBroadcaster,
    metrics: Arc<RelayMetrics>,
    limits: ServerConfig,
}

impl EventRouter {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        repo: RelayRepository,
        continuity: SessionContinuity,
        metrics: Arc<RelayMetrics>,
        limits: ServerConfig,
    ) -> Self {
        Self {
            roster: RosterBroadcaster::new(registry.clone()),
            registry,
            repo,
            continuity,
            metrics,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &ServerConfig {
        &self.limits
    }

    /// Route one client event and deliver the result.
    pub async fn process(&self, ctx: &ConnectionContext, event: ClientEvent) {
        self.metrics.event_received();
        let envelopes = self.handle(ctx, event).await;
        self.deliver(ctx, envelopes).await;
    }

    pub async fn handle(&self, ctx: &ConnectionContext, event: ClientEvent) -> Vec<Envelope> {
        if event != ClientEvent::Join && !ctx.is_joined() {
            debug!(conn_id = %ctx.connection_id, "Ignoring event before join");
            return Vec::new();
        }

        match event {
            ClientEvent::Join => self.connect(ctx).await,
            ClientEvent::AdminLoginAttempt { password } => self.admin_login(ctx, &password).await,
            ClientEvent::Message { text, target_sid } => {
                self.chat_message(ctx, &text, target_sid.as_deref()).await
            }
            ClientEvent::ClearMyChat => self.clear_own_chat(ctx).await,
        }
    }

    /// Unregister the link and tell the remaining admins.
    pub async fn disconnect(&self, ctx: &ConnectionContext) {
        if !ctx.joined.swap(false, Ordering::SeqCst) {
            return;
        }
        let id = &ctx.connection_id;
        let Some(departed) = self.registry.unregister(id).await else {
            return;
        };
        debug!(conn_id = %id, name = %departed.name, "Disconnected");

        let mut out = Vec::new();
        if departed.was_admin {
            let notice = format!("{} has left", departed.name);
            for admin in self.registry.list_admins().await {
                out.push(Envelope::new(admin, ServerEvent::sys(notice.clone())));
            }
        }
        out.extend(self.roster.publish().await);
        self.deliver(ctx, out).await;
    }

    /// Queue each envelope on its recipient's outbox. This link's own events
    /// wait for outbox space (bounded by [`OWN_SEND_TIMEOUT`]) so a long
    /// history replay is never truncated; fan-out to other links never waits,
    /// and a missing or full outbox is a delivery failure for that recipient
    /// only.
    pub async fn deliver(&self, ctx: &ConnectionContext, envelopes: Vec<Envelope>) {
        for Envelope { to, event } in envelopes {
            let event_name = event.name();

            // Own events go to this link even when the id is held elsewhere
            if to == ctx.connection_id {
                match tokio::time::timeout(OWN_SEND_TIMEOUT, ctx.outbox.send(event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => self.delivery_failed(&to, event_name, "connection closed"),
                    Err(_) => self.delivery_failed(&to, event_name, "outbox stalled"),
                }
                continue;
            }

            let Some(outbox) = self.registry.outbox_of(&to).await else {
                self.delivery_failed(&to, event_name, "not connected");
                continue;
            };

            if let Err(e) = outbox.try_send(event) {
                let reason = match e {
                    TrySendError::Full(_) => "outbox full",
                    TrySendError::Closed(_) => "connection closed",
                };
                self.delivery_failed(&to, event_name, reason);
            }
        }
    }

    fn delivery_failed(&self, to: &str, event_name: &str, reason: &str) {
        let err = RelayError::Delivery {
            connection_id: to.to_string(),
        };
        warn!(event = event_name, "{} ({})", err, reason);
        self.metrics.delivery_failed();
    }

    // ── connect ─────────────────────────────────────────────────────────

    async fn connect(&self, ctx: &ConnectionContext) -> Vec<Envelope> {
        let id = &ctx.connection_id;

        if ctx.is_joined() {
            debug!(conn_id = %id, "Repeated join, re-sending identity and history");
            let Some(identity) = self.registry.identity_of(id).await else {
                return Vec::new();
            };
            let mut out = vec![Envelope::new(
                id,
                ServerEvent::SetIdentity {
                    name: identity.name,
                    id: id.clone(),
                },
            )];
            out.extend(self.history(id).await);
            return out;
        }

        let session = match self.continuity.recall_admin(&ctx.token).await {
            Ok(session) => session,
            Err(e) => {
                warn!(conn_id = %id, "Admin session lookup failed: {}", e);
                self.metrics.persistence_failed();
                None
            }
        };

        // Recalled admins never pass through visitor state
        let (name, is_admin) = match session {
            Some(session) => (session.display_name(), true),
            None => (visitor_name(), false),
        };
        let registered = if is_admin {
            self.registry
                .register_admin(id, &name, ctx.outbox.clone())
                .await
        } else {
            self.registry.register(id, &name, ctx.outbox.clone()).await
        };
        if let Err(e) = registered {
            warn!(conn_id = %id, "Join refused: {}", e);
            return vec![Envelope::new(
                id,
                ServerEvent::sys("This chat is already open in another window"),
            )];
        }
        ctx.joined.store(true, Ordering::SeqCst);

        let mut out = vec![Envelope::new(
            id,
            ServerEvent::SetIdentity {
                name: name.clone(),
                id: id.clone(),
            },
        )];

        if is_admin {
            info!(conn_id = %id, "Admin session restored for {}", name);
            out.push(Envelope::new(
                id,
                ServerEvent::AdminStatus {
                    is_admin: true,
                    message: Some(format!("Welcome back, {name}")),
                },
            ));
        }

        out.extend(self.history(id).await);

        if !is_admin {
            let notice = format!("{name} joined the chat");
            for admin in self.registry.list_admins().await {
                out.push(Envelope::new(admin, ServerEvent::sys(notice.clone())));
            }
        }

        out.extend(self.roster.publish().await);
        out
    }

    /// Visible history for `id`, oldest first, under the stored sender names.
    async fn history(&self, id: &str) -> Vec<Envelope> {
        match self.repo.visible_messages(id).await {
            Ok(messages) => messages
                .into_iter()
                .map(|m| {
                    Envelope::new(
                        id,
                        ServerEvent::NewMsg {
                            user: m.sender_name,
                            text: m.text,
                            from_sid: None,
                        },
                    )
                })
                .collect(),
            Err(e) => {
                warn!(conn_id = %id, "History replay failed: {}", e);
                self.metrics.persistence_failed();
                vec![Envelope::new(
                    id,
                    ServerEvent::sys("Chat history is unavailable right now"),
                )]
            }
        }
    }

    // ── admin login / logout ────────────────────────────────────────────

    async fn admin_login(&self, ctx: &ConnectionContext, password: &str) -> Vec<Envelope> {
        let id = &ctx.connection_id;

        if ctx.failed_logins.load(Ordering::SeqCst) >= self.limits.max_login_failures {
            warn!(conn_id = %id, "Admin login refused after repeated failures");
            self.metrics.login_rejected();
            return vec![Envelope::new(
                id,
                ServerEvent::AdminStatus {
                    is_admin: self.registry.is_admin(id).await,
                    message: Some("Too many failed attempts".into()),
                },
            )];
        }

        match self.continuity.attempt_login(&ctx.token, password).await {
            Ok(session) => {
                let name = session.display_name();
                if !self.registry.promote_to_admin(id, &name).await {
                    return Vec::new();
                }
                self.metrics.admin_login();
                info!(conn_id = %id, "Promoted to admin as {}", name);

                let mut out = vec![
                    Envelope::new(
                        id,
                        ServerEvent::AdminStatus {
                            is_admin: true,
                            message: Some(format!("Logged in as {name}")),
                        },
                    ),
                    Envelope::new(
                        id,
                        ServerEvent::SetIdentity {
                            name,
                            id: id.clone(),
                        },
                    ),
                ];
                out.extend(self.roster.publish().await);
                out
            }
            Err(RelayError::Auth) => {
                ctx.failed_logins.fetch_add(1, Ordering::SeqCst);
                self.metrics.login_rejected();
                // A rejection never changes the role the client shows
                vec![Envelope::new(
                    id,
                    ServerEvent::AdminStatus {
                        is_admin: self.registry.is_admin(id).await,
                        message: Some("Incorrect password".into()),
                    },
                )]
            }
            Err(e) => {
                warn!(conn_id = %id, "Admin login could not be recorded: {}", e);
                self.metrics.persistence_failed();
                vec![Envelope::new(
                    id,
                    ServerEvent::AdminStatus {
                        is_admin: self.registry.is_admin(id).await,
                        message: Some("Login is unavailable right now, please try again".into()),
                    },
                )]
            }
        }
    }

    async fn logout(&self, ctx: &ConnectionContext) -> Vec<Envelope> {
        let id = &ctx.connection_id;

        if !self.registry.is_admin(id).await {
            return vec![Envelope::new(
                id,
                ServerEvent::sys("You are not logged in as admin"),
            )];
        }

        if let Err(e) = self.continuity.logout(&ctx.token).await {
            warn!(conn_id = %id, "Logout failed: {}", e);
            self.metrics.persistence_failed();
            return vec![Envelope::new(
                id,
                ServerEvent::sys("Logout failed, please try again"),
            )];
        }

        let name = visitor_name();
        self.registry.demote(id, &name).await;
        info!(conn_id = %id, "Admin logged out");

        let mut out = vec![
            Envelope::new(
                id,
                ServerEvent::AdminStatus {
                    is_admin: false,
                    message: Some("Logged out".into()),
                },
            ),
            Envelope::new(
                id,
                ServerEvent::SetIdentity {
                    name,
                    id: id.clone(),
                },
            ),
        ];
        out.extend(self.roster.publish().await);
        out
    }

    // ── chat ────────────────────────────────────────────────────────────

    async fn chat_message(
        &self,
        ctx: &ConnectionContext,
        text: &str,
        target: Option<&str>,
    ) -> Vec<Envelope> {
        let id = &ctx.connection_id;
        let text = text.trim();

        if text.is_empty() {
            debug!(conn_id = %id, "Ignoring empty message");
            return Vec::new();
        }
        if let Some(password) = legacy_login(text) {
            return self.admin_login(ctx, password).await;
        }
        if text == "/logout" {
            return self.logout(ctx).await;
        }

        let limit = self.limits.max_message_chars;
        if text.chars().count() > limit {
            let err = RelayError::validation(format!("message longer than {limit} characters"));
            debug!(conn_id = %id, "{}", err);
            return vec![Envelope::new(
                id,
                ServerEvent::sys(format!("Message is too long (limit {limit} characters)")),
            )];
        }

        let Some(identity) = self.registry.identity_of(id).await else {
            debug!(conn_id = %id, "Message from unregistered connection dropped");
            return Vec::new();
        };

        if identity.is_admin {
            self.admin_reply(ctx, text, target).await
        } else {
            self.visitor_message(ctx, &identity.name, text).await
        }
    }

    async fn visitor_message(&self, ctx: &ConnectionContext, name: &str, text: &str) -> Vec<Envelope> {
        let id = &ctx.connection_id;
        let persisted = self.persist(id, ADMINS_RECEIVER, name, text).await;

        let mut out = Vec::new();
        let admins = self.registry.list_admins().await;
        if admins.is_empty() {
            out.push(Envelope::new(id, ServerEvent::sys(NO_ADMIN_NOTICE)));
        } else {
            let notice = format!("New message from {name}");
            for admin in admins {
                out.push(Envelope::new(
                    admin.clone(),
                    ServerEvent::NewMsg {
                        user: name.to_string(),
                        text: text.to_string(),
                        from_sid: Some(id.clone()),
                    },
                ));
                out.push(Envelope::new(admin, ServerEvent::sys(notice.clone())));
            }
        }

        out.push(Envelope::new(
            id,
            ServerEvent::NewMsg {
                user: YOU_LABEL.to_string(),
                text: text.to_string(),
                from_sid: None,
            },
        ));
        out.push(self.ack(id, persisted));
        out
    }

    async fn admin_reply(
        &self,
        ctx: &ConnectionContext,
        text: &str,
        target: Option<&str>,
    ) -> Vec<Envelope> {
        let id = &ctx.connection_id;

        let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
            let err = RelayError::validation("admin reply without target_sid");
            debug!(conn_id = %id, "{}", err);
            return vec![Envelope::new(
                id,
                ServerEvent::sys("Select a visitor to reply to"),
            )];
        };

        let persisted = self.persist(id, target, ADMIN_SENDER_NAME, text).await;

        let mut out = Vec::new();
        let target_name = self.registry.name_of(target).await;
        if target_name.is_some() {
            out.push(Envelope::new(
                target,
                ServerEvent::NewMsg {
                    user: ADMIN_SENDER_NAME.to_string(),
                    text: text.to_string(),
                    from_sid: None,
                },
            ));
        } else {
            debug!(conn_id = %id, target = %target, "Reply target offline, stored for later");
        }

        // Other admins see the thread was answered; the author gets its own echo
        let target_label = target_name.as_deref().unwrap_or(OFFLINE_TARGET);
        for admin in self.registry.list_admins().await {
            let user = if admin == *id {
                format!("You to {target_label}")
            } else {
                format!("Reply to {target_label}")
            };
            out.push(Envelope::new(
                admin,
                ServerEvent::NewMsg {
                    user,
                    text: text.to_string(),
                    from_sid: Some(target.to_string()),
                },
            ));
        }

        out.push(self.ack(id, persisted));
        out
    }

    async fn clear_own_chat(&self, ctx: &ConnectionContext) -> Vec<Envelope> {
        let id = &ctx.connection_id;
        match self.repo.soft_delete_by_sender(id).await {
            Ok(hidden) => {
                debug!(conn_id = %id, hidden, "Cleared own chat");
                vec![Envelope::new(id, ServerEvent::ClearScreen)]
            }
            Err(e) => {
                warn!(conn_id = %id, "Clearing chat failed: {}", e);
                self.metrics.persistence_failed();
                vec![Envelope::new(
                    id,
                    ServerEvent::sys("Could not clear your chat, please try again"),
                )]
            }
        }
    }

    /// Store id on commit, `None` when the store failed.
    async fn persist(&self, sender: &str, receiver: &str, name: &str, text: &str) -> Option<i64> {
        match self.repo.append_message(sender, receiver, name, text).await {
            Ok(message_id) => {
                self.metrics.message_persisted();
                debug!(conn_id = %sender, message_id, receiver = %receiver, "Message saved");
                Some(message_id)
            }
            Err(e) => {
                warn!(conn_id = %sender, "Message not saved: {}", e);
                self.metrics.persistence_failed();
                None
            }
        }
    }

    fn ack(&self, to: &str, persisted: Option<i64>) -> Envelope {
        self.metrics.ack_sent();
        let status = if persisted.is_some() {
            AckStatus::Saved
        } else {
            AckStatus::Failed
        };
        Envelope::new(
            to,
            ServerEvent::MessageAck {
                status,
                id: persisted,
            },
        )
    }
}

/// Password from a `/login <password>` chat line.
fn legacy_login(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("/login")?;
    if rest.is_empty() {
        return Some("");
    }
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}
