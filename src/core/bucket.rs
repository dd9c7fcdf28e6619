//! Connection shard owning a subset of connections and their room index

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::connection::Connection;
use crate::core::message::WireMessage;
use crate::core::room::{PushReport, Room};
use crate::error::{Result, RustyPushError};
use crate::metrics::GatewayStats;

#[derive(Debug, Default)]
struct BucketState {
    connections: HashMap<u64, Arc<Connection>>,
    rooms: HashMap<String, Room>,
}

/// A shard of the connection set
///
/// Several job workers drain the same bucket concurrently, so membership and
/// room mutations take the write lock while broadcasts share the read lock.
#[derive(Debug)]
pub struct Bucket {
    index: usize,
    state: RwLock<BucketState>,
    stats: Arc<GatewayStats>,
}

impl Bucket {
    pub fn new(index: usize, stats: Arc<GatewayStats>) -> Self {
        Self {
            index,
            state: RwLock::new(BucketState::default()),
            stats,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    // A panicking writer cannot leave the maps half-updated, so a poisoned
    // lock is still safe to use.
    fn read_state(&self) -> RwLockReadGuard<'_, BucketState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BucketState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection; returns false if it was already registered
    pub fn add_conn(&self, conn: Arc<Connection>) -> bool {
        let mut state = self.write_state();
        state.connections.insert(conn.id, conn).is_none()
    }

    /// Unregisters a connection and drops any room membership it still holds
    pub fn del_conn(&self, conn_id: u64) -> bool {
        let mut state = self.write_state();
        let removed = state.connections.remove(&conn_id).is_some();

        let before = state.rooms.len();
        let index = self.index;
        state.rooms.retain(|_, room| {
            room.leave(conn_id);
            if room.is_empty() {
                debug!("Bucket {} dropped empty room {}", index, room.id);
                return false;
            }
            true
        });
        for _ in state.rooms.len()..before {
            self.stats.room_count.decr();
        }

        removed
    }

    pub fn join_room(&self, room_id: &str, conn: &Arc<Connection>) -> Result<()> {
        let mut state = self.write_state();
        if !state.connections.contains_key(&conn.id) {
            return Err(RustyPushError::ConnectionNotInBucket(conn.id));
        }

        let room = state.rooms.entry(room_id.to_string()).or_insert_with(|| {
            self.stats.room_count.incr();
            Room::new(room_id.to_string())
        });
        room.join(conn.clone());
        Ok(())
    }

    pub fn leave_room(&self, room_id: &str, conn_id: u64) -> Result<()> {
        let mut state = self.write_state();
        if !state.connections.contains_key(&conn_id) {
            return Err(RustyPushError::ConnectionNotInBucket(conn_id));
        }

        let now_empty = match state.rooms.get_mut(room_id) {
            Some(room) => {
                room.leave(conn_id);
                room.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.rooms.remove(room_id);
            self.stats.room_count.decr();
        }
        Ok(())
    }

    pub fn conn_count(&self) -> usize {
        self.read_state().connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.read_state().rooms.len()
    }

    pub fn room_member_count(&self, room_id: &str) -> usize {
        self.read_state()
            .rooms
            .get(room_id)
            .map(Room::member_count)
            .unwrap_or(0)
    }

    /// Sends to every connection of the bucket
    pub fn push_all(&self, message: &WireMessage) -> PushReport {
        let state = self.read_state();
        let mut report = PushReport::default();
        for conn in state.connections.values() {
            report.record(conn.send_wire(message).is_ok());
        }
        drop(state);

        self.record(report);
        report
    }

    /// Sends to the local members of a room; an unknown room has no members
    pub fn push_room(&self, room_id: &str, message: &WireMessage) -> PushReport {
        let report = match self.read_state().rooms.get(room_id) {
            Some(room) => room.push(message),
            None => PushReport::default(),
        };

        self.record(report);
        report
    }

    /// Sends to exactly one local member of a room; returns whether one was reached
    pub fn push_room_one(&self, room_id: &str, message: &WireMessage) -> bool {
        let report = match self.read_state().rooms.get(room_id) {
            Some(room) => room.push_one(message),
            None => PushReport::default(),
        };

        self.record(report);
        if report.delivered == 0 {
            debug!("Bucket {} has no reachable member in room {}", self.index, room_id);
        }
        report.delivered > 0
    }

    fn record(&self, report: PushReport) {
        self.stats
            .send_message_total
            .incr_by(report.delivered as u64);
        self.stats.push_fail.incr_by(report.failed as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use warp::ws::Message;

    fn conn(id: u64) -> (Arc<Connection>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Connection::new(id, tx)), rx)
    }

    #[test]
    fn test_add_and_del_are_idempotent() {
        let bucket = Bucket::new(0, Arc::new(GatewayStats::default()));
        let (c1, _rx) = conn(1);

        assert!(bucket.add_conn(c1.clone()));
        assert!(!bucket.add_conn(c1));
        assert_eq!(bucket.conn_count(), 1);

        assert!(bucket.del_conn(1));
        assert!(!bucket.del_conn(1));
        assert_eq!(bucket.conn_count(), 0);
    }

    #[test]
    fn test_join_requires_membership() {
        let bucket = Bucket::new(0, Arc::new(GatewayStats::default()));
        let (stranger, _rx) = conn(5);

        assert!(matches!(
            bucket.join_room("r", &stranger),
            Err(RustyPushError::ConnectionNotInBucket(5))
        ));
        assert!(bucket.leave_room("r", 5).is_err());
    }

    #[test]
    fn test_room_lifecycle_tracks_room_count() {
        let stats = Arc::new(GatewayStats::default());
        let bucket = Bucket::new(0, stats.clone());
        let (c1, _rx1) = conn(1);
        let (c2, _rx2) = conn(2);
        bucket.add_conn(c1.clone());
        bucket.add_conn(c2.clone());

        bucket.join_room("r", &c1).unwrap();
        bucket.join_room("r", &c2).unwrap();
        assert_eq!(bucket.room_member_count("r"), 2);
        assert_eq!(stats.room_count.get(), 1);

        bucket.leave_room("r", 1).unwrap();
        // Leaving a room twice or leaving an unknown room is a no-op
        bucket.leave_room("r", 1).unwrap();
        bucket.leave_room("missing", 1).unwrap();
        assert_eq!(bucket.room_member_count("r"), 1);

        bucket.leave_room("r", 2).unwrap();
        assert_eq!(bucket.room_count(), 0);
        assert_eq!(stats.room_count.get(), 0);
    }

    #[test]
    fn test_del_conn_purges_rooms() {
        let stats = Arc::new(GatewayStats::default());
        let bucket = Bucket::new(0, stats.clone());
        let (c1, _rx) = conn(1);
        bucket.add_conn(c1.clone());
        bucket.join_room("a", &c1).unwrap();
        bucket.join_room("b", &c1).unwrap();

        bucket.del_conn(1);
        assert_eq!(bucket.room_count(), 0);
        assert_eq!(stats.room_count.get(), 0);
    }

    #[test]
    fn test_push_all_is_best_effort() {
        let bucket = Bucket::new(0, Arc::new(GatewayStats::default()));
        let (c1, mut rx1) = conn(1);
        let (c2, rx2) = conn(2);
        bucket.add_conn(c1);
        bucket.add_conn(c2);
        drop(rx2);

        let report = bucket.push_all(&WireMessage::text("hello"));
        assert_eq!(report, PushReport { delivered: 1, failed: 1 });
        assert_eq!(rx1.try_recv().unwrap().to_str(), Ok("hello"));
    }

    #[test]
    fn test_push_room_only_reaches_members() {
        let bucket = Bucket::new(0, Arc::new(GatewayStats::default()));
        let (member, mut member_rx) = conn(1);
        let (other, mut other_rx) = conn(2);
        bucket.add_conn(member.clone());
        bucket.add_conn(other);
        bucket.join_room("r", &member).unwrap();

        bucket.push_room("r", &WireMessage::text("m"));
        assert!(member_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());

        assert_eq!(bucket.push_room("empty", &WireMessage::text("m")).delivered, 0);
    }

    #[test]
    fn test_push_room_one_delivers_once() {
        let bucket = Bucket::new(0, Arc::new(GatewayStats::default()));
        let (c1, mut rx1) = conn(1);
        let (c2, mut rx2) = conn(2);
        bucket.add_conn(c1.clone());
        bucket.add_conn(c2.clone());
        bucket.join_room("r", &c1).unwrap();
        bucket.join_room("r", &c2).unwrap();

        assert!(bucket.push_room_one("r", &WireMessage::text("one")));
        let received = [rx1.try_recv().is_ok(), rx2.try_recv().is_ok()];
        assert_eq!(received.iter().filter(|r| **r).count(), 1);

        assert!(!bucket.push_room_one("nobody", &WireMessage::text("one")));
    }
}
