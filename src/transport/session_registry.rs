//! # Session Registry
//!
//! Maps live connections to their handshake key material.
//!
//! ## Features
//! - **Sharded locking**: backed by `DashMap`, so accept, send and receive
//!   paths on different connections never contend on one global lock
//! - **Immutable sessions**: entries are `Arc<Session>`; readers need no
//!   synchronization beyond the lookup
//! - **Connection-scoped**: one entry per connection, removed on disconnect
//!
//! Session ids come from a `u32` counter that wraps from `u32::MAX` back to
//! `0`. Ids only identify a session to the client for the lifetime of one
//! connection, so reuse after four billion accepts is harmless.
//!
//! ## Usage
//! ```ignore
//! let registry = SessionRegistry::new();
//! let session = registry.create(connection, key_factory.generate()?)?;
//! let again = registry.get(connection)?;
//! registry.remove(connection);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::KeyMaterial;
use crate::protocol::message::ConnectionId;

/// Cryptographic state of one connection, fixed at accept time.
#[derive(Debug)]
pub struct Session {
    connection: ConnectionId,
    session_id: u32,
    keys: KeyMaterial,
}

impl Session {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }
}

/// Thread-safe registry of live sessions. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<ConnectionId, Arc<Session>>>,
    next_session_id: Arc<AtomicU32>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the session id counter at `first` instead of zero.
    pub fn with_first_session_id(first: u32) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_session_id: Arc::new(AtomicU32::new(first)),
        }
    }

    /// Register key material for a newly accepted connection.
    ///
    /// A second create for a live connection is a protocol violation and
    /// fails with [`ProtocolError::DuplicateSession`]; the rejected key
    /// material is dropped (and zeroized) here.
    pub fn create(&self, connection: ConnectionId, keys: KeyMaterial) -> Result<Arc<Session>> {
        match self.sessions.entry(connection) {
            Entry::Occupied(_) => {
                warn!(%connection, "Connection already has a session");
                Err(ProtocolError::DuplicateSession(connection))
            }
            Entry::Vacant(slot) => {
                // fetch_add wraps on overflow
                let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                let session = Arc::new(Session {
                    connection,
                    session_id,
                    keys,
                });
                slot.insert(session.clone());
                debug!(%connection, session_id, "Session created");
                Ok(session)
            }
        }
    }

    /// Look up the session of a live connection.
    pub fn get(&self, connection: ConnectionId) -> Result<Arc<Session>> {
        match self.sessions.get(&connection) {
            Some(entry) => {
                trace!(%connection, "Session lookup hit");
                Ok(entry.value().clone())
            }
            None => Err(ProtocolError::UnknownSession(connection)),
        }
    }

    /// Drop the session of a closed connection. In-flight `Arc`s stay valid
    /// until their holders finish, but new lookups fail.
    pub fn remove(&self, connection: ConnectionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&connection).map(|(_, s)| s);
        if let Some(session) = &removed {
            debug!(%connection, session_id = session.session_id, "Session removed");
        }
        removed
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session
    pub fn clear(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        debug!(cleared_count = count, "Session registry cleared");
    }
}
