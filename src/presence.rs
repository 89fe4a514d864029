//! Waiting-room presence: a status label per user, a listener set, and a
//! channel-13 status-change broadcast. Mutation and broadcast happen under
//! the same lock so every listener observes updates in the order they were
//! accepted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::auth::AuthManager;
use crate::connection::{ConnId, Registry};
use crate::error::{Code, Error, Result};
use crate::persistence::Store;
use crate::value::{map, Value};

const CHANNEL_STATUS_CHANGE: i64 = 13;
const DISCONNECTED: &str = "disconnected";

struct State {
    status: HashMap<i64, String>,
    listeners: HashSet<ConnId>,
}

pub struct PresenceManager {
    state: Mutex<State>,
    store: std::sync::Arc<Store>,
}

impl PresenceManager {
    pub fn new(store: std::sync::Arc<Store>) -> Self {
        PresenceManager {
            state: Mutex::new(State {
                status: HashMap::new(),
                listeners: HashSet::new(),
            }),
            store,
        }
    }

    pub fn handle(
        &self,
        conn: ConnId,
        auth: &AuthManager,
        registry: &Registry,
        command: &str,
        fields: &Value,
    ) -> Result<Value> {
        match command {
            "start-listening" => self.start_listening(conn),
            "stop-listening" => self.stop_listening(conn),
            "get-status" => self.get_status(fields),
            "set-status" => self.set_status(conn, auth, registry, fields),
            "get-waiting-room" => self.get_waiting_room(),
            "get-ranking" => self.get_ranking(),
            _ => Err(Error::protocol(format!("unknown presence command {command}"))),
        }
    }

    fn start_listening(&self, conn: ConnId) -> Result<Value> {
        self.state.lock().unwrap().listeners.insert(conn);
        Ok(map().set("status", "ok").build())
    }

    fn stop_listening(&self, conn: ConnId) -> Result<Value> {
        let removed = self.state.lock().unwrap().listeners.remove(&conn);
        if !removed {
            return Err(Error::business(Code::NotListening));
        }
        Ok(map().set("status", "ok").build())
    }

    fn get_status(&self, fields: &Value) -> Result<Value> {
        let id = fields.as_map().and_then(|m| m.get("id")).and_then(Value::as_int);
        let id = id.ok_or_else(|| Error::business(Code::NoId))?;
        let status = self
            .state
            .lock()
            .unwrap()
            .status
            .get(&id)
            .cloned()
            .unwrap_or_else(|| DISCONNECTED.to_string());
        Ok(map().set("status", "ok").set("user-status", status).build())
    }

    fn set_status(&self, conn: ConnId, auth: &AuthManager, registry: &Registry, fields: &Value) -> Result<Value> {
        let uid = auth.user_id_of(conn).ok_or_else(|| Error::business(Code::InvalidUser))?;
        if let Some(claimed) = fields.as_map().and_then(|m| m.get("uid")).and_then(Value::as_int) {
            if claimed != uid {
                return Err(Error::business(Code::InvalidUser));
            }
        }
        let new_status = fields
            .as_map()
            .and_then(|m| m.get("new-status"))
            .and_then(Value::as_str)
            .unwrap_or(DISCONNECTED)
            .to_string();

        let mut state = self.state.lock().unwrap();
        let listeners: Vec<ConnId> = state.listeners.iter().copied().collect();
        for listener in &listeners {
            registry.push(
                *listener,
                CHANNEL_STATUS_CHANGE,
                map()
                    .set("notification", "status-change")
                    .set("user", uid)
                    .set("status", new_status.as_str())
                    .build(),
            );
        }
        if new_status == DISCONNECTED {
            state.status.remove(&uid);
        } else {
            state.status.insert(uid, new_status);
        }
        Ok(map().set("status", "ok").build())
    }

    fn get_waiting_room(&self) -> Result<Value> {
        let state = self.state.lock().unwrap();
        let mut dict = BTreeMap::new();
        for (uid, status) in state.status.iter() {
            dict.insert(uid.to_string(), Value::Str(status.clone()));
        }
        Ok(map().set("status", "ok").set("waiting-dict", Value::Map(dict)).build())
    }

    fn get_ranking(&self) -> Result<Value> {
        let users = self.store.list_users_ordered_by_rating_desc()?;
        let list: Vec<Value> = users
            .into_iter()
            .map(|u| map().set("name", u.name).set("points", u.rating).build())
            .collect();
        Ok(map().set("status", "ok").set("ranking", Value::List(list)).build())
    }

    /// Called from the disconnect hook so a departing authenticated user's
    /// listeners observe a final "disconnected" status change.
    pub fn on_disconnect(&self, uid: i64, registry: &Registry) {
        let mut state = self.state.lock().unwrap();
        let listeners: Vec<ConnId> = state.listeners.iter().copied().collect();
        for listener in &listeners {
            registry.push(
                *listener,
                CHANNEL_STATUS_CHANGE,
                map()
                    .set("notification", "status-change")
                    .set("user", uid)
                    .set("status", DISCONNECTED)
                    .build(),
            );
        }
        state.status.remove(&uid);
    }
}
