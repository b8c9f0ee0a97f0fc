// Per-report room membership and message fan-out.
//
// Each WebSocket connection registers here with an outbound channel. Joining
// a report adds the connection to that report's room; broadcasts walk the
// room's member set and push frames onto each member's outbound queue.

use civica_common::{
    protocol::ws::WsMessage,
    types::{Department, Role},
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct RoomRouter {
    state: Arc<RwLock<RouterState>>,
}

#[derive(Debug, Default)]
struct RouterState {
    connections: HashMap<Uuid, ConnectionRecord>,
    /// report_id -> connection ids currently joined. Empty rooms are removed.
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

#[derive(Debug)]
struct ConnectionRecord {
    user_id: Uuid,
    name: String,
    role: Role,
    department: Option<Department>,
    outbound: mpsc::UnboundedSender<WsMessage>,
    rooms: HashSet<Uuid>,
}

/// Snapshot of one room member, as seen by broadcast and presence code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub department: Option<Department>,
}

impl RoomRouter {
    /// Register a freshly authenticated connection. Returns its connection id.
    pub async fn register(
        &self,
        user_id: Uuid,
        name: String,
        role: Role,
        department: Option<Department>,
        outbound: mpsc::UnboundedSender<WsMessage>,
    ) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut guard = self.state.write().await;
        guard.connections.insert(
            connection_id,
            ConnectionRecord { user_id, name, role, department, outbound, rooms: HashSet::new() },
        );
        connection_id
    }

    /// Remove a connection and all of its room memberships.
    /// Returns the report ids the connection was joined to.
    pub async fn unregister(&self, connection_id: Uuid) -> Vec<Uuid> {
        let mut guard = self.state.write().await;
        let Some(record) = guard.connections.remove(&connection_id) else {
            return Vec::new();
        };
        let mut left = Vec::with_capacity(record.rooms.len());
        for report_id in record.rooms {
            if let Some(members) = guard.rooms.get_mut(&report_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    guard.rooms.remove(&report_id);
                }
            }
            left.push(report_id);
        }
        left.sort();
        left
    }

    /// Add the connection to a report room. Idempotent: returns `false` when
    /// the connection was already a member, and errs only if the connection
    /// is unknown.
    pub async fn join(&self, connection_id: Uuid, report_id: Uuid) -> Result<bool, UnknownConnection> {
        let mut guard = self.state.write().await;
        let Some(record) = guard.connections.get_mut(&connection_id) else {
            return Err(UnknownConnection);
        };
        let newly_joined = record.rooms.insert(report_id);
        guard.rooms.entry(report_id).or_default().insert(connection_id);
        Ok(newly_joined)
    }

    /// Remove the connection from a report room. Returns `true` if it was a member.
    pub async fn leave(&self, connection_id: Uuid, report_id: Uuid) -> bool {
        let mut guard = self.state.write().await;
        let Some(record) = guard.connections.get_mut(&connection_id) else {
            return false;
        };
        let was_member = record.rooms.remove(&report_id);
        if let Some(members) = guard.rooms.get_mut(&report_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.rooms.remove(&report_id);
            }
        }
        was_member
    }

    pub async fn is_member(&self, connection_id: Uuid, report_id: Uuid) -> bool {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|record| record.rooms.contains(&report_id))
            .unwrap_or(false)
    }

    /// Current members of a report room, sorted by connection id for
    /// deterministic iteration.
    pub async fn members_of(&self, report_id: Uuid) -> Vec<RoomMember> {
        let guard = self.state.read().await;
        let Some(member_ids) = guard.rooms.get(&report_id) else {
            return Vec::new();
        };
        let mut members: Vec<RoomMember> = member_ids
            .iter()
            .filter_map(|connection_id| {
                guard.connections.get(connection_id).map(|record| RoomMember {
                    connection_id: *connection_id,
                    user_id: record.user_id,
                    name: record.name.clone(),
                    role: record.role,
                    department: record.department,
                })
            })
            .collect();
        members.sort_by_key(|member| member.connection_id);
        members
    }

    /// Send a frame to every member of the report room. Returns delivery count.
    pub async fn broadcast_to_report(&self, report_id: Uuid, message: WsMessage) -> usize {
        self.broadcast_internal(report_id, message, None, None).await
    }

    /// Broadcast to the room, skipping one connection (typically the sender's
    /// own socket).
    pub async fn broadcast_to_report_excluding_connection(
        &self,
        report_id: Uuid,
        message: WsMessage,
        exclude_connection: Uuid,
    ) -> usize {
        self.broadcast_internal(report_id, message, Some(exclude_connection), None).await
    }

    /// Broadcast to the room, skipping every connection owned by one user.
    /// Used when the originating action arrived over REST rather than this
    /// socket, so all of the author's tabs must be excluded.
    pub async fn broadcast_to_report_excluding_user(
        &self,
        report_id: Uuid,
        message: WsMessage,
        exclude_user: Uuid,
    ) -> usize {
        self.broadcast_internal(report_id, message, None, Some(exclude_user)).await
    }

    async fn broadcast_internal(
        &self,
        report_id: Uuid,
        message: WsMessage,
        exclude_connection: Option<Uuid>,
        exclude_user: Option<Uuid>,
    ) -> usize {
        let mut recipients = Vec::new();
        {
            let guard = self.state.read().await;
            let Some(member_ids) = guard.rooms.get(&report_id) else {
                return 0;
            };
            for connection_id in member_ids {
                if exclude_connection == Some(*connection_id) {
                    continue;
                }
                let Some(record) = guard.connections.get(connection_id) else {
                    continue;
                };
                if exclude_user == Some(record.user_id) {
                    continue;
                }
                recipients.push(record.outbound.clone());
            }
        }

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        sent_count
    }
}

/// Returned when an operation names a connection that is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownConnection;
