//! Real-time relay core: presence, admin session continuity, routing, and
//! roster updates, plus the websocket transport that drives them.

pub mod continuity;
pub mod handler;
pub mod presence;
pub mod protocol;
pub mod roster;
pub mod router;

#[cfg(test)]
pub(crate) mod test_helpers;

use rand::Rng;

use protocol::ServerEvent;

/// One outbound event addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub event: ServerEvent,
}

impl Envelope {
    pub fn new(to: impl Into<String>, event: ServerEvent) -> Self {
        Self {
            to: to.into(),
            event,
        }
    }
}

/// Fresh anonymous display name, `User-<4 digits>`.
pub fn visitor_name() -> String {
    format!("User-{}", rand::rng().random_range(1000..=9999))
}
