//! Connection table and master-role arbitration.
//!
//! Exactly one connection (the "master") may submit table data; every
//! other connection only receives broadcasts. When the master drops,
//! its device keeps a claim on the role for a grace period; if it does
//! not return in time, the longest-connected peer is promoted.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    role: Role,
    device_key: String,
    connected_at: Instant,
}

struct MasterGrace {
    device_key: String,
    deadline: Instant,
}

pub struct ConnectionManager {
    clients: DashMap<Uuid, ClientHandle>,
    master: RwLock<Option<Uuid>>,
    grace: Mutex<Option<MasterGrace>>,
    grace_period: Duration,
}

impl ConnectionManager {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            master: RwLock::new(None),
            grace: Mutex::new(None),
            grace_period,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Register a connection and decide its role. The device key (the
    /// peer address) lets a dropped master resume within the grace
    /// period.
    pub fn register(
        &self,
        id: Uuid,
        device_key: String,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Role {
        let resumed = {
            let mut grace = self.grace.lock();
            match grace.as_ref() {
                Some(g) if g.device_key == device_key => {
                    *grace = None;
                    true
                }
                _ => false,
            }
        };

        let role = if resumed {
            Role::Master
        } else if self.master.read().is_none() && self.grace.lock().is_none() {
            Role::Master
        } else {
            Role::Slave
        };

        if role == Role::Master {
            *self.master.write() = Some(id);
        }

        self.clients.insert(
            id,
            ClientHandle {
                tx: tx.clone(),
                role,
                device_key,
                connected_at: Instant::now(),
            },
        );

        let reason = resumed.then(|| "reconectado dentro do periodo de graca".to_string());
        let assigned = Outbound::RoleAssigned {
            role: role.as_str().to_string(),
            reason,
        };
        let _ = tx.send(Message::Text(assigned.to_json()));

        info!(client_id = %id, role = role.as_str(), "Client registered");
        role
    }

    /// Drop a connection. A departing master leaves a grace claim
    /// behind; the caller is responsible for scheduling
    /// [`ConnectionManager::expire_grace`] after the grace period.
    pub fn unregister(&self, id: Uuid) -> Option<String> {
        let removed = self.clients.remove(&id).map(|(_, h)| h);
        let was_master = *self.master.read() == Some(id);
        if !was_master {
            debug!(client_id = %id, "Client unregistered");
            return None;
        }

        *self.master.write() = None;
        let device_key = removed.map(|h| h.device_key)?;
        *self.grace.lock() = Some(MasterGrace {
            device_key: device_key.clone(),
            deadline: Instant::now() + self.grace_period,
        });
        info!(client_id = %id, grace_secs = self.grace_period.as_secs(), "Master disconnected, grace period started");
        Some(device_key)
    }

    /// End an elapsed grace claim and promote the longest-connected
    /// peer, if any. No-op when the master already resumed.
    pub fn expire_grace(&self, device_key: &str) {
        {
            let mut grace = self.grace.lock();
            match grace.as_ref() {
                Some(g) if g.device_key == device_key && Instant::now() >= g.deadline => {
                    *grace = None;
                }
                _ => return,
            }
        }

        if self.master.read().is_some() {
            return;
        }

        let promoted = self
            .clients
            .iter()
            .min_by_key(|entry| entry.value().connected_at)
            .map(|entry| *entry.key());

        match promoted {
            Some(id) => {
                if let Some(mut handle) = self.clients.get_mut(&id) {
                    handle.role = Role::Master;
                    *self.master.write() = Some(id);
                    let msg = Outbound::RoleChanged {
                        role: Role::Master.as_str().to_string(),
                        reason: Some("master anterior nao retornou".to_string()),
                    };
                    let _ = handle.tx.send(Message::Text(msg.to_json()));
                    info!(client_id = %id, "Promoted longest-waiting client to master");
                }
            }
            None => {
                debug!("Grace expired with no clients to promote");
            }
        }
    }

    pub fn is_master(&self, id: Uuid) -> bool {
        *self.master.read() == Some(id)
    }

    pub fn master_id(&self) -> Option<Uuid> {
        *self.master.read()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Send a message to one client.
    pub fn send_to(&self, id: Uuid, msg: &Outbound) {
        if let Some(handle) = self.clients.get(&id) {
            if handle.tx.send(Message::Text(msg.to_json())).is_err() {
                warn!(client_id = %id, "Failed to queue message for client");
            }
        }
    }

    /// Send a message to every connected client.
    pub fn broadcast(&self, msg: &Outbound) {
        let text = msg.to_json();
        for entry in self.clients.iter() {
            let _ = entry.value().tx.send(Message::Text(text.clone()));
        }
    }

    /// Ask every client to close, used at shutdown.
    pub fn close_all(&self) {
        for entry in self.clients.iter() {
            let _ = entry.value().tx.send(Message::Close(None));
        }
    }
}
