use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::connection::Connection;
use crate::core::message::WireMessage;

/// Outcome of a best-effort broadcast
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub failed: usize,
}

impl PushReport {
    pub(crate) fn record(&mut self, delivered: bool) {
        if delivered {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Members of one room that live in a single bucket
///
/// A room seen by clients is the union of same-named entries across all
/// buckets. Members are ordered by connection id so single delivery always
/// prefers the oldest live connection.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    members: BTreeMap<u64, Arc<Connection>>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            members: BTreeMap::new(),
        }
    }

    /// Adds a member; returns false if it was already present
    pub fn join(&mut self, conn: Arc<Connection>) -> bool {
        self.members.insert(conn.id, conn).is_none()
    }

    /// Removes a member; returns false if it was not present
    pub fn leave(&mut self, conn_id: u64) -> bool {
        self.members.remove(&conn_id).is_some()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sends to every member; a failed send does not stop the broadcast
    pub fn push(&self, message: &WireMessage) -> PushReport {
        let mut report = PushReport::default();
        for conn in self.members.values() {
            report.record(!conn.is_closed() && conn.send_wire(message).is_ok());
        }
        report
    }

    /// Sends to the first member that accepts the message
    pub fn push_one(&self, message: &WireMessage) -> PushReport {
        let mut report = PushReport::default();
        for conn in self.members.values() {
            let delivered = !conn.is_closed() && conn.send_wire(message).is_ok();
            report.record(delivered);
            if delivered {
                break;
            }
        }
        report
    }
}
