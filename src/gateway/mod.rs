//! Observer gateway: session admission, rooms and room-scoped fan-out.
//!
//! Exactly one admin session may be connected at a time and it must present
//! the configured shared secret. Client sessions are unlimited. A client that
//! reconnects with a known client id has its reconnection counter bumped and
//! the admin room is told about it; a second live session with the same client
//! id and role displaces the first. A live id is never taken over across roles.

mod envelope;
mod fanout;

pub use envelope::{event, room, Envelope};
pub use fanout::{run_dispatcher, Dispatch, Fanout};

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::observability::{ADMIN_REJECTED_TOTAL, SESSIONS_ACTIVE, SESSION_DROPS_TOTAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Client,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("admin sessions are disabled")]
    AdminDisabled,
    #[error("invalid admin secret")]
    BadSecret,
    #[error("an admin session is already connected")]
    AdminAlreadyConnected,
    #[error("unknown session: {0}")]
    UnknownSession(Ulid),
    #[error("room not joinable: {0}")]
    RoomNotAllowed(String),
    #[error("too many rooms joined")]
    TooManyRooms,
    #[error("invalid client id")]
    InvalidClientId,
}

/// A freshly admitted session. `rx` yields everything addressed to it; when
/// it returns `None` the session was displaced or disconnected.
#[derive(Debug)]
pub struct Admission {
    pub session_id: Ulid,
    pub role: Role,
    pub reconnects: u32,
    pub rx: mpsc::Receiver<Envelope>,
}

struct Session {
    role: Role,
    client_key: Option<String>,
    tx: mpsc::Sender<Envelope>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct ClientRecord {
    session: Option<Ulid>,
    reconnects: u32,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<Ulid, Session>,
    admin: Option<Ulid>,
    rooms: HashMap<String, HashSet<Ulid>>,
    clients: HashMap<String, ClientRecord>,
}

impl Registry {
    fn enter_room(&mut self, id: Ulid, room: &str) {
        self.rooms.entry(room.to_string()).or_default().insert(id);
        if let Some(s) = self.sessions.get_mut(&id) {
            s.rooms.insert(room.to_string());
        }
    }

    fn exit_room(&mut self, id: Ulid, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        if let Some(s) = self.sessions.get_mut(&id) {
            s.rooms.remove(room);
        }
    }

    /// Drop a session and its memberships. Dropping its sender ends its writer.
    fn remove(&mut self, id: Ulid) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        for room in &session.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        if self.admin == Some(id) {
            self.admin = None;
        }
        if let Some(key) = &session.client_key
            && let Some(record) = self.clients.get_mut(key)
            && record.session == Some(id)
        {
            record.session = None;
        }
        Some(session)
    }

    fn broadcast(&self, room: &str, envelope: &Envelope) -> usize {
        let Some(members) = self.rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for id in members {
            let Some(session) = self.sessions.get(id) else { continue };
            match session.tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!(SESSION_DROPS_TOTAL).increment(1);
                    warn!("session {id} queue full, dropping {}", envelope.kind);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    fn forget_idle_clients(&mut self) {
        if self.clients.len() > MAX_TRACKED_CLIENTS {
            self.clients.retain(|_, r| r.session.is_some());
        }
    }
}

pub struct Gateway {
    admin_secret: Option<String>,
    registry: Mutex<Registry>,
}

fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl Gateway {
    /// With no secret, admin claims are always refused.
    pub fn new(admin_secret: Option<String>) -> Self {
        Self {
            admin_secret: admin_secret.filter(|s| !s.is_empty()),
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A poisoned registry is still structurally sound: every mutation
        // completes before the guard drops.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connect(
        &self,
        role: Role,
        secret: Option<&str>,
        client_key: Option<&str>,
    ) -> Result<Admission, GatewayError> {
        let client_key = match client_key.map(str::trim) {
            Some("") | None => None,
            Some(k) if k.len() > MAX_CLIENT_ID_LEN => return Err(GatewayError::InvalidClientId),
            Some(k) => Some(k.to_string()),
        };

        if role == Role::Admin {
            let Some(expected) = self.admin_secret.as_deref() else {
                metrics::counter!(ADMIN_REJECTED_TOTAL).increment(1);
                return Err(GatewayError::AdminDisabled);
            };
            if !secret.is_some_and(|s| secrets_match(s, expected)) {
                metrics::counter!(ADMIN_REJECTED_TOTAL).increment(1);
                warn!("admin claim with bad secret rejected");
                return Err(GatewayError::BadSecret);
            }
        }

        let mut reg = self.registry();
        if role == Role::Admin && reg.admin.is_some() {
            metrics::counter!(ADMIN_REJECTED_TOTAL).increment(1);
            warn!("second admin claim rejected");
            return Err(GatewayError::AdminAlreadyConnected);
        }

        let session_id = Ulid::new();
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let mut reconnects = 0;
        let mut reconnected = false;
        if let Some(key) = &client_key {
            let held_by = reg
                .clients
                .get(key)
                .and_then(|r| r.session)
                .and_then(|id| reg.sessions.get(&id))
                .map(|s| s.role);
            if let Some(held) = held_by
                && held != role
            {
                warn!("client id {key} is held by a live {held:?} session, refusing {role:?}");
                return Err(GatewayError::InvalidClientId);
            }
            reg.forget_idle_clients();
            reconnected = reg.clients.contains_key(key);
            let record = reg.clients.entry(key.clone()).or_default();
            if reconnected {
                record.reconnects += 1;
            }
            reconnects = record.reconnects;
            let previous = record.session.replace(session_id);
            if let Some(old) = previous {
                reg.remove(old);
                info!("session {old} displaced by {session_id} for client {key}");
            }
        }

        reg.sessions.insert(
            session_id,
            Session {
                role,
                client_key: client_key.clone(),
                tx,
                rooms: HashSet::new(),
            },
        );
        reg.enter_room(session_id, room::ALL);
        if role == Role::Admin {
            reg.admin = Some(session_id);
            reg.enter_room(session_id, room::ADMIN);
            if let Some(s) = reg.sessions.get(&session_id) {
                let confirm = Envelope::new(
                    event::ADMIN_CONFIRMATION,
                    serde_json::json!({ "message": "Admin connected", "sessionId": session_id }),
                );
                let _ = s.tx.try_send(confirm);
            }
        }
        if reconnected && let Some(key) = &client_key {
            let notice = Envelope::new(
                event::CLIENT_RECONNECTED,
                serde_json::json!({ "clientId": key, "reconnectCount": reconnects }),
            );
            reg.broadcast(room::ADMIN, &notice);
        }
        metrics::gauge!(SESSIONS_ACTIVE).set(reg.sessions.len() as f64);
        info!("session {session_id} connected as {role:?} (reconnects: {reconnects})");

        Ok(Admission {
            session_id,
            role,
            reconnects,
            rx,
        })
    }

    pub fn disconnect(&self, session_id: Ulid) {
        let mut reg = self.registry();
        if reg.remove(session_id).is_some() {
            info!("session {session_id} disconnected");
        }
        metrics::gauge!(SESSIONS_ACTIVE).set(reg.sessions.len() as f64);
    }

    /// Only resource rooms are joinable; `all` and `admin_room` are assigned.
    pub fn join(&self, session_id: Ulid, room_name: &str) -> Result<(), GatewayError> {
        if !room::is_resource(room_name) || room_name.len() > MAX_CLIENT_ID_LEN + 16 {
            return Err(GatewayError::RoomNotAllowed(room_name.to_string()));
        }
        let mut reg = self.registry();
        let session = reg
            .sessions
            .get(&session_id)
            .ok_or(GatewayError::UnknownSession(session_id))?;
        if !session.rooms.contains(room_name) && session.rooms.len() >= MAX_ROOMS_PER_SESSION {
            return Err(GatewayError::TooManyRooms);
        }
        reg.enter_room(session_id, room_name);
        Ok(())
    }

    pub fn leave(&self, session_id: Ulid, room_name: &str) -> Result<(), GatewayError> {
        if !room::is_resource(room_name) {
            return Err(GatewayError::RoomNotAllowed(room_name.to_string()));
        }
        let mut reg = self.registry();
        if !reg.sessions.contains_key(&session_id) {
            return Err(GatewayError::UnknownSession(session_id));
        }
        reg.exit_room(session_id, room_name);
        Ok(())
    }

    /// Returns how many sessions accepted the envelope.
    pub fn broadcast(&self, room_name: &str, envelope: &Envelope) -> usize {
        self.registry().broadcast(room_name, envelope)
    }

    pub fn send_to(&self, session_id: Ulid, envelope: Envelope) -> Result<(), GatewayError> {
        let reg = self.registry();
        let session = reg
            .sessions
            .get(&session_id)
            .ok_or(GatewayError::UnknownSession(session_id))?;
        if session.tx.try_send(envelope).is_err() {
            metrics::counter!(SESSION_DROPS_TOTAL).increment(1);
        }
        Ok(())
    }

    pub fn role_of(&self, session_id: Ulid) -> Option<Role> {
        self.registry().sessions.get(&session_id).map(|s| s.role)
    }

    pub fn session_count(&self) -> usize {
        self.registry().sessions.len()
    }

    pub fn admin_connected(&self) -> bool {
        self.registry().admin.is_some()
    }

    pub fn reconnects(&self, client_key: &str) -> Option<u32> {
        self.registry().clients.get(client_key).map(|r| r.reconnects)
    }
}
