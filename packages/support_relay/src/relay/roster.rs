//! Roster Broadcaster
//!
//! After any presence change, every admin receives the full list of
//! non-admin participants. No diffing.

use std::sync::Arc;

use super::Envelope;
use super::presence::PresenceRegistry;
use super::protocol::ServerEvent;

#[derive(Clone)]
pub struct RosterBroadcaster {
    registry: Arc<PresenceRegistry>,
}

impl RosterBroadcaster {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// One `update_user_list` per connected admin, from a single snapshot.
    pub async fn publish(&self) -> Vec<Envelope> {
        let snapshot = self.registry.roster_snapshot().await;
        snapshot
            .admins
            .into_iter()
            .map(|admin| {
                Envelope::new(
                    admin,
                    ServerEvent::UpdateUserList {
                        users: snapshot.users.clone(),
                    },
                )
            })
            .collect()
    }
}
