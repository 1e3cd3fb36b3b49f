use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use caramel_core::ids::ConnectionId;

/// Which route a connection came in on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Rpc,
    Joints,
    Poses,
}

impl ConnectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Joints => "joints",
            Self::Poses => "poses",
        }
    }
}

/// A live WebSocket connection.
pub struct Connection {
    pub id: ConnectionId,
    pub kind: ConnectionKind,
    pub peer: SocketAddr,
    pub opened_at: DateTime<Utc>,
    messages: AtomicU64,
}

impl Connection {
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

/// Serializable view of a connection for `/health`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub kind: ConnectionKind,
    pub peer: String,
    pub opened_at: DateTime<Utc>,
    pub messages: u64,
}

/// Registry of open connections across all routes.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: ConnectionKind, peer: SocketAddr) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                kind,
                peer,
                opened_at: Utc::now(),
                messages: AtomicU64::new(0),
            },
        );
        id
    }

    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Count one inbound message on a connection.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.messages.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn count_kind(&self, kind: ConnectionKind) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .count()
    }

    pub fn summaries(&self) -> Vec<ConnectionSummary> {
        let mut list: Vec<ConnectionSummary> = self
            .connections
            .iter()
            .map(|entry| {
                let c = entry.value();
                ConnectionSummary {
                    id: c.id.clone(),
                    kind: c.kind,
                    peer: c.peer.to_string(),
                    opened_at: c.opened_at,
                    messages: c.messages(),
                }
            })
            .collect();
        list.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        list
    }

    pub fn clear(&self) {
        self.connections.clear();
    }
}
