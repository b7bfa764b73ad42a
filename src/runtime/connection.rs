//! Connection table for the readiness-based backend.
//!
//! Each live session sits in a slab slot whose key doubles as its poll
//! token. A session stays in the table exactly as long as it is waiting on
//! readiness; it is removed once it reaches `Closed`.
//!
//! Every worker owns its own table. An optional `ConnectionLimit` shared by
//! all tables caps the number of live sessions across the whole server.

use crate::runtime::session::{Session, Wait};
use slab::Slab;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A live session plus the readiness it is currently registered for.
pub struct Connection<S> {
    pub session: Session<S>,
    pub waiting: Wait,
}

impl<S: Read + Write> Connection<S> {
    /// New connection, initially registered for reads.
    pub fn new(stream: S, buffer_size: usize) -> Self {
        Self {
            session: Session::new(stream, buffer_size),
            waiting: Wait::Readable,
        }
    }
}

/// Server-wide cap on live sessions, shared by every worker's table.
#[derive(Debug)]
pub struct ConnectionLimit {
    max: usize,
    live: AtomicUsize,
}

impl ConnectionLimit {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            live: AtomicUsize::new(0),
        }
    }

    /// Claim a slot, or return `false` if the server is at capacity.
    fn try_acquire(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.max).then_some(live + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Live sessions across all tables.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Slab of live connections, optionally bounded by a shared limit.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionTable<S> {
    connections: Slab<Connection<S>>,
    limit: Option<Arc<ConnectionLimit>>,
}

impl<S> ConnectionTable<S> {
    /// Create a table; `None` means unbounded.
    pub fn new(limit: Option<Arc<ConnectionLimit>>) -> Self {
        Self {
            connections: Slab::new(),
            limit,
        }
    }

    /// Insert a connection, returning its id.
    ///
    /// Returns the connection back if the server is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Result<usize, Connection<S>> {
        if let Some(limit) = &self.limit {
            if !limit.try_acquire() {
                return Err(conn);
            }
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        let conn = self.connections.try_remove(id)?;
        if let Some(limit) = &self.limit {
            limit.release();
        }
        Some(conn)
    }

    pub fn is_full(&self) -> bool {
        self.limit
            .as_ref()
            .is_some_and(|limit| limit.live() >= limit.max)
    }

    /// Number of live connections in this table.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn conn(bytes: &[u8]) -> Connection<Cursor<Vec<u8>>> {
        Connection::new(Cursor::new(bytes.to_vec()), 64)
    }

    #[test]
    fn test_connection_table() {
        let mut table = ConnectionTable::new(Some(Arc::new(ConnectionLimit::new(2))));

        let id1 = table.insert(conn(b"a")).ok().unwrap();
        let id2 = table.insert(conn(b"b")).ok().unwrap();

        // At capacity
        assert!(table.is_full());
        assert!(table.insert(conn(b"c")).is_err());

        assert_eq!(table.len(), 2);
        assert!(matches!(table.get_mut(id2).unwrap().waiting, Wait::Readable));

        assert!(table.remove(id1).is_some());
        assert!(table.get_mut(id1).is_none());
        assert!(table.remove(id1).is_none());
        assert_eq!(table.len(), 1);

        // Freed slot is reused
        let id3 = table.insert(conn(b"d")).ok().unwrap();
        assert_eq!(id3, id1);
    }

    #[test]
    fn test_limit_is_shared_across_tables() {
        let limit = Arc::new(ConnectionLimit::new(2));
        let mut first = ConnectionTable::new(Some(Arc::clone(&limit)));
        let mut second = ConnectionTable::new(Some(Arc::clone(&limit)));

        let id = first.insert(conn(b"a")).ok().unwrap();
        assert!(second.insert(conn(b"b")).is_ok());
        assert_eq!(limit.live(), 2);

        // Both tables see the server at capacity
        assert!(first.is_full());
        assert!(second.is_full());
        assert!(first.insert(conn(b"c")).is_err());
        assert!(second.insert(conn(b"d")).is_err());

        // A close in one table frees a slot for the other
        assert!(first.remove(id).is_some());
        assert_eq!(limit.live(), 1);
        assert!(second.insert(conn(b"e")).is_ok());
        assert_eq!(second.len(), 2);
        assert!(first.is_empty());
    }

    #[test]
    fn test_unbounded_table() {
        let mut table = ConnectionTable::new(None);
        for _ in 0..1000 {
            assert!(table.insert(conn(b"x")).is_ok());
        }
        assert!(!table.is_full());
        assert_eq!(table.len(), 1000);
    }
}
