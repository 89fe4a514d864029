//! Identity module: sign-up, sign-in, sign-out, and id/name lookups.
//!
//! Maintains the bijection between authenticated connections and user ids.
//! The command table below is authoritative; the legacy Python server's
//! auth handlers were stubs (`sign-in` unconditionally returned success)
//! and are not a source of behavior here.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::connection::ConnId;
use crate::error::{Code, Error, Result};
use crate::persistence::Store;
use crate::value::{map, Value};

pub struct AuthManager {
    store: std::sync::Arc<Store>,
    by_connection: Mutex<HashMap<ConnId, i64>>,
    by_user: Mutex<HashMap<i64, ConnId>>,
}

impl AuthManager {
    pub fn new(store: std::sync::Arc<Store>) -> Self {
        AuthManager {
            store,
            by_connection: Mutex::new(HashMap::new()),
            by_user: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_id_of(&self, conn: ConnId) -> Option<i64> {
        self.by_connection.lock().unwrap().get(&conn).copied()
    }

    pub fn is_authenticated(&self, conn: ConnId) -> bool {
        self.user_id_of(conn).is_some()
    }

    /// Removes both halves of the bijection for a disconnecting connection,
    /// returning the user id it held, if any.
    pub fn on_disconnect(&self, conn: ConnId) -> Option<i64> {
        let uid = self.by_connection.lock().unwrap().remove(&conn)?;
        self.by_user.lock().unwrap().remove(&uid);
        Some(uid)
    }

    fn field<'a>(fields: &'a Value, name: &str) -> Option<&'a str> {
        fields.as_map()?.get(name)?.as_str()
    }

    pub fn handle(&self, conn: ConnId, command: &str, fields: &Value) -> Result<Value> {
        match command {
            "sign-up" => self.sign_up(fields),
            "sign-in" => self.sign_in(conn, fields),
            "sign-out" => self.sign_out(conn),
            "get-status" => self.get_status(conn),
            "get-name" => self.get_name(fields),
            _ => Err(Error::protocol(format!("unknown auth command {command}"))),
        }
    }

    fn sign_up(&self, fields: &Value) -> Result<Value> {
        let name = Self::field(fields, "username").filter(|s| !s.is_empty());
        let name = name.ok_or_else(|| Error::business(Code::NoUsername))?;
        let password = Self::field(fields, "password").filter(|s| !s.is_empty());
        let password = password.ok_or_else(|| Error::business(Code::NoPassword))?;
        if self.store.find_user_by_name(name)?.is_some() {
            return Err(Error::business(Code::LoginTaken));
        }
        self.store.insert_user(name, password)?;
        Ok(map().set("status", "ok").build())
    }

    fn sign_in(&self, conn: ConnId, fields: &Value) -> Result<Value> {
        if self.is_authenticated(conn) {
            return Err(Error::business(Code::AlreadyLoggedIn));
        }
        let name = Self::field(fields, "username").filter(|s| !s.is_empty());
        let name = name.ok_or_else(|| Error::business(Code::NoUsername))?;
        let password = Self::field(fields, "password").filter(|s| !s.is_empty());
        let password = password.ok_or_else(|| Error::business(Code::NoPassword))?;
        let user = self
            .store
            .find_user_by_name(name)?
            .ok_or_else(|| Error::business(Code::NoSuchUser))?;
        if user.password != password {
            return Err(Error::business(Code::WrongPassword));
        }
        self.by_connection.lock().unwrap().insert(conn, user.id);
        self.by_user.lock().unwrap().insert(user.id, conn);
        Ok(map().set("status", "ok").build())
    }

    fn sign_out(&self, conn: ConnId) -> Result<Value> {
        if self.on_disconnect(conn).is_none() {
            return Err(Error::business(Code::NotSignedIn));
        }
        Ok(map().set("status", "ok").build())
    }

    fn get_status(&self, conn: ConnId) -> Result<Value> {
        match self.user_id_of(conn) {
            Some(uid) => {
                let user = self.store.find_user_by_id(uid)?;
                let name = user.map(|u| u.name).unwrap_or_default();
                Ok(map()
                    .set("status", "ok")
                    .set("authenticated", true)
                    .set("username", name)
                    .set("id", uid)
                    .build())
            }
            None => Ok(map().set("status", "ok").set("authenticated", false).build()),
        }
    }

    fn get_name(&self, fields: &Value) -> Result<Value> {
        let id = fields
            .as_map()
            .and_then(|m| m.get("id"))
            .and_then(Value::as_int)
            .ok_or_else(|| Error::business(Code::NoId))?;
        let user = self
            .store
            .find_user_by_id(id)?
            .ok_or_else(|| Error::business(Code::NoSuchUser))?;
        Ok(map().set("status", "ok").set("name", user.name).build())
    }
}
