//! Connection multiplexer: decodes a request frame's `(module, fields)`
//! body, checks the permission predicate, dispatches to the owning
//! module, and wraps the result as a channel-0 response frame.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::AuthManager;
use crate::connection::{decode_frame, encode_frame, ConnId, Registry};
use crate::error::{Code, Error, Result};
use crate::game::GameManager;
use crate::presence::PresenceManager;
use crate::value::{map, Value};

pub const MODULE_AUTH: i64 = 3;
pub const MODULE_PRESENCE: i64 = 4;
pub const MODULE_GAME: i64 = 5;

/// Channel reserved for the unimplemented friend-invite feature; documented
/// and never emitted.
pub const CHANNEL_GAME_INVITATION: i64 = 16;

pub struct Mux {
    pub auth: AuthManager,
    pub presence: PresenceManager,
    pub game: GameManager,
    pub registry: Registry,
}

impl Mux {
    pub fn new(store: Arc<crate::persistence::Store>) -> Self {
        Mux {
            auth: AuthManager::new(store.clone()),
            presence: PresenceManager::new(store.clone()),
            game: GameManager::new(store),
            registry: Registry::default(),
        }
    }

    fn permitted(&self, module: i64, conn: ConnId) -> bool {
        match module {
            MODULE_AUTH => true,
            MODULE_PRESENCE | MODULE_GAME => self.auth.is_authenticated(conn),
            _ => false,
        }
    }

    /// Processes one complete inbound frame payload for `conn`. Returns the
    /// encoded response frame bytes to write back, or an `Err` that the
    /// caller should treat according to `Error::is_fatal`.
    pub fn dispatch(&self, conn: ConnId, payload: &[u8]) -> Result<Vec<u8>> {
        let (channel, body) = decode_frame(payload)?;
        if channel != 0 {
            return Err(Error::protocol(format!("client frame used non-zero channel {channel}")));
        }
        let items = body
            .as_list()
            .ok_or_else(|| Error::protocol("request body must be a (module, fields) pair"))?;
        if items.len() != 2 {
            return Err(Error::protocol("request body must have exactly 2 elements"));
        }
        let module = items[0].as_int().ok_or_else(|| Error::protocol("module must be an integer"))?;
        let fields = items[1].clone();
        let command = fields
            .as_map()
            .and_then(|m| m.get("command"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("fields must contain a string \"command\""))?
            .to_string();

        if !self.permitted(module, conn) {
            warn!(module, conn, "rejected unpermitted module access");
            return Ok(encode_frame(
                0,
                map().set("status", "error").set("code", Code::InvalidUser.to_string()).build(),
            ));
        }

        debug!(module, command = %command, conn, "dispatching command");

        let result = match module {
            MODULE_AUTH => self.auth.handle(conn, &command, &fields),
            MODULE_PRESENCE => self.presence.handle(conn, &self.auth, &self.registry, &command, &fields),
            MODULE_GAME => self.game.handle(conn, &self.auth, &self.registry, &command, &fields),
            _ => Err(Error::protocol(format!("unknown module {module}"))),
        };

        match result {
            Ok(body) => Ok(encode_frame(0, body)),
            Err(err) if !err.is_fatal() => {
                let code = match &err {
                    Error::Business(b) => b.0,
                    _ => unreachable!(),
                };
                Ok(encode_frame(0, map().set("status", "error").set("code", code.to_string()).build()))
            }
            Err(err) => Err(err),
        }
    }

    /// Runs the disconnect hook: breaks the auth bijection, implicitly
    /// abandons any games the connection still occupies, and notifies
    /// presence listeners.
    pub fn on_disconnect(&self, conn: ConnId) {
        self.game.on_disconnect(conn);
        self.game.on_player_disconnect(conn, &self.registry);
        if let Some(uid) = self.auth.on_disconnect(conn) {
            self.presence.on_disconnect(uid, &self.registry);
        }
        self.registry.unregister(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::encode_frame;
    use crate::persistence::Store;
    use std::sync::Arc;

    fn request(module: i64, fields: Value) -> Vec<u8> {
        let encoded = encode_frame(0, Value::List(vec![Value::Int(module), fields]));
        // encode_frame already length-prefixes; dispatch expects the raw
        // payload (post length-prefix), so strip the 4-byte length header.
        encoded[4..].to_vec()
    }

    fn mux() -> Mux {
        Mux::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn auth_module_is_always_permitted() {
        let mux = mux();
        let fields = map().set("command", "sign-up").set("username", "john").set("password", "pw").build();
        let payload = request(MODULE_AUTH, fields);
        let response_frame = mux.dispatch(1, &payload).unwrap();
        let len = u32::from_le_bytes(response_frame[0..4].try_into().unwrap()) as usize;
        let (_, body) = decode_frame(&response_frame[4..4 + len]).unwrap();
        assert_eq!(body.as_map().unwrap().get("status").unwrap().as_str(), Some("ok"));
    }

    #[test]
    fn presence_module_rejected_before_auth() {
        let mux = mux();
        let fields = map().set("command", "start-listening").build();
        let payload = request(MODULE_PRESENCE, fields);
        let response_frame = mux.dispatch(1, &payload).unwrap();
        let len = u32::from_le_bytes(response_frame[0..4].try_into().unwrap()) as usize;
        let (_, body) = decode_frame(&response_frame[4..4 + len]).unwrap();
        assert_eq!(body.as_map().unwrap().get("status").unwrap().as_str(), Some("error"));
    }

    #[test]
    fn business_error_becomes_response_not_fatal() {
        let mux = mux();
        let fields = map().set("command", "sign-out").build();
        let payload = request(MODULE_AUTH, fields);
        let result = mux.dispatch(1, &payload);
        assert!(result.is_ok());
    }

    #[test]
    fn malformed_body_is_fatal() {
        let mux = mux();
        let payload = Value::Int(5).to_bytes();
        let result = mux.dispatch(1, &payload);
        assert!(result.is_err());
    }
}
