//! Presence Registry
//!
//! Process-wide map of live connections to display names, plus the subset
//! that are admins. All state sits behind one lock, so every mutation and
//! every fan-out read sees a consistent snapshot.

use std::collections::{HashMap, HashSet};

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use super::protocol::{RosterEntry, ServerEvent};
use crate::error::{RelayError, RelayResult};

/// Per-connection outbound queue, drained by the connection's sender task.
pub type Outbox = mpsc::Sender<ServerEvent>;

#[derive(Debug)]
struct Participant {
    name: String,
    outbox: Outbox,
    /// Registration order, for a stable roster
    joined: u64,
}

#[derive(Debug, Default)]
struct PresenceState {
    participants: HashMap<String, Participant>,
    /// Always a subset of `participants` keys
    admins: HashSet<String>,
    next_join: u64,
}

impl PresenceState {
    fn insert(&mut self, connection_id: &str, name: &str, outbox: Outbox) -> RelayResult<()> {
        if self.participants.contains_key(connection_id) {
            return Err(RelayError::AlreadyConnected {
                connection_id: connection_id.to_string(),
            });
        }
        let joined = self.next_join;
        self.next_join += 1;
        self.participants.insert(
            connection_id.to_string(),
            Participant {
                name: name.to_string(),
                outbox,
                joined,
            },
        );
        Ok(())
    }
}

/// Who a live connection currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub is_admin: bool,
}

/// Returned by [`PresenceRegistry::unregister`] for the departed party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub name: String,
    pub was_admin: bool,
}

/// Roster and its admin recipients, taken under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub users: Vec<RosterEntry>,
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceCounts {
    pub admins: u64,
    pub visitors: u64,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    state: RwLock<PresenceState>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection as a visitor.
    pub async fn register(&self, connection_id: &str, name: &str, outbox: Outbox) -> RelayResult<()> {
        let mut state = self.state.write().await;
        state.insert(connection_id, name, outbox)?;
        debug!(conn_id = %connection_id, name = %name, "registered");
        Ok(())
    }

    /// Add a connection that is an admin from its first moment, as when a
    /// stored admin session is recalled on join.
    pub async fn register_admin(
        &self,
        connection_id: &str,
        admin_name: &str,
        outbox: Outbox,
    ) -> RelayResult<()> {
        let mut state = self.state.write().await;
        state.insert(connection_id, admin_name, outbox)?;
        state.admins.insert(connection_id.to_string());
        debug!(conn_id = %connection_id, name = %admin_name, "registered as admin");
        Ok(())
    }

    /// Mark a registered connection as admin and rename it. Returns false
    /// if the connection is not registered.
    pub async fn promote_to_admin(&self, connection_id: &str, admin_name: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(participant) = state.participants.get_mut(connection_id) else {
            return false;
        };
        participant.name = admin_name.to_string();
        state.admins.insert(connection_id.to_string());
        debug!(conn_id = %connection_id, name = %admin_name, "promoted to admin");
        true
    }

    /// Drop admin status and rename the connection back to a visitor name.
    pub async fn demote(&self, connection_id: &str, visitor_name: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(participant) = state.participants.get_mut(connection_id) else {
            return false;
        };
        participant.name = visitor_name.to_string();
        state.admins.remove(connection_id);
        debug!(conn_id = %connection_id, name = %visitor_name, "demoted");
        true
    }

    pub async fn is_admin(&self, connection_id: &str) -> bool {
        self.state.read().await.admins.contains(connection_id)
    }

    pub async fn name_of(&self, connection_id: &str) -> Option<String> {
        self.state
            .read()
            .await
            .participants
            .get(connection_id)
            .map(|p| p.name.clone())
    }

    pub async fn identity_of(&self, connection_id: &str) -> Option<Identity> {
        let state = self.state.read().await;
        state.participants.get(connection_id).map(|p| Identity {
            name: p.name.clone(),
            is_admin: state.admins.contains(connection_id),
        })
    }

    /// Remove a connection from both the name map and the admin set.
    /// Absent ids are a no-op.
    pub async fn unregister(&self, connection_id: &str) -> Option<Departed> {
        let mut state = self.state.write().await;
        let participant = state.participants.remove(connection_id)?;
        let was_admin = state.admins.remove(connection_id);
        debug!(conn_id = %connection_id, was_admin, "unregistered");
        Some(Departed {
            name: participant.name,
            was_admin,
        })
    }

    /// Admin connection ids, sorted.
    pub async fn list_admins(&self) -> Vec<String> {
        let state = self.state.read().await;
        sorted_admins(&state)
    }

    /// Non-admin participants in registration order.
    pub async fn list_non_admin_users(&self) -> Vec<RosterEntry> {
        let state = self.state.read().await;
        non_admin_users(&state)
    }

    pub async fn outbox_of(&self, connection_id: &str) -> Option<Outbox> {
        self.state
            .read()
            .await
            .participants
            .get(connection_id)
            .map(|p| p.outbox.clone())
    }

    pub async fn roster_snapshot(&self) -> RosterSnapshot {
        let state = self.state.read().await;
        RosterSnapshot {
            users: non_admin_users(&state),
            admins: sorted_admins(&state),
        }
    }

    pub async fn counts(&self) -> PresenceCounts {
        let state = self.state.read().await;
        let admins = state.admins.len() as u64;
        PresenceCounts {
            admins,
            visitors: state.participants.len() as u64 - admins,
        }
    }
}

fn non_admin_users(state: &PresenceState) -> Vec<RosterEntry> {
    let mut users: Vec<(u64, RosterEntry)> = state
        .participants
        .iter()
        .filter(|(id, _)| !state.admins.contains(*id))
        .map(|(id, p)| {
            (
                p.joined,
                RosterEntry {
                    sid: id.clone(),
                    name: p.name.clone(),
                },
            )
        })
        .collect();
    users.sort_by_key(|(joined, _)| *joined);
    users.into_iter().map(|(_, entry)| entry).collect()
}

fn sorted_admins(state: &PresenceState) -> Vec<String> {
    let mut admins: Vec<String> = state.admins.iter().cloned().collect();
    admins.sort();
    admins
}
