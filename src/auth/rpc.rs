//! Built-in application handler for session requests.
//!
//! Payload shapes (colon separated, fields are base64 so never contain `:`):
//! - `:<cipher>`: session opening, encrypted with the application key.
//! - `<sessionId>:<cipher>`: call within a session, encrypted with its
//!   communication key.
//! - `<sessionId>:<conKey>:<cipher>`: same, pinned to the current
//!   connection key.

use async_trait::async_trait;
use std::sync::Arc;

use super::messages::{error_response, expired_response, Request, RequestError, NO_SESSION_KEY};
use super::store::{SessionStore, KEY_LEN};
use super::fatal;
use crate::cipher::derive_key;
use crate::gateway::Handler;

/// Answers session requests against one [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SessionRpc {
    store: Arc<SessionStore>,
    app_key: String,
}

impl SessionRpc {
    /// `app_name` seeds the key clients use for `:<cipher>` payloads.
    pub fn new(store: Arc<SessionStore>, app_name: &str) -> Self {
        Self {
            store,
            app_key: derive_key(app_name, KEY_LEN),
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Processes one payload and returns the encrypted answer.
    pub fn process(&self, payload: &str) -> String {
        let payload = payload.trim();
        let parts: Vec<&str> = payload.split(':').collect();
        match parts.as_slice() {
            ["", cipher_text] => self.open(cipher_text),
            [session_id, cipher_text] => self.in_session(session_id, "", cipher_text),
            [session_id, con_key, cipher_text] => {
                self.in_session(session_id, con_key, cipher_text)
            }
            _ => {
                tracing::warn!(parts = parts.len(), "Unrecognized session payload");
                error_response(NO_SESSION_KEY, "Malformed request")
            }
        }
    }

    fn open(&self, cipher_text: &str) -> String {
        let rq = match Request::decode(&self.app_key, cipher_text) {
            Ok(rq) => rq,
            Err(e) => {
                tracing::warn!("Undecodable session opening: {e}");
                return error_response(NO_SESSION_KEY, "Bad request");
            }
        };

        match self.open_request(&rq) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Rejected session opening: {e}");
                error_response(NO_SESSION_KEY, "Bad request")
            }
        }
    }

    fn open_request(&self, rq: &Request) -> Result<String, RequestError> {
        let result = match rq.try_string("rq")? {
            "authentication" => self.store.authenticate(
                rq.try_string("key")?,
                rq.try_string("user")?,
                rq.try_string("pass")?,
                rq.try_bool("withExpiration")?,
            ),
            "connect" => self.store.connect(rq.try_string("sessionId")?),
            other => {
                return Ok(error_response(
                    NO_SESSION_KEY,
                    &format!("Unknown request '{other}'"),
                ));
            }
        };
        Ok(result.unwrap_or_else(|e| fatal(e)))
    }

    fn in_session(&self, session_id: &str, con_key: &str, cipher_text: &str) -> String {
        let com_key = match self.store.get_com_key(session_id, con_key) {
            Ok(Some(k)) => k,
            Ok(None) => return expired_response(),
            Err(e) => fatal(e),
        };

        let rq = match Request::decode(&com_key, cipher_text) {
            Ok(rq) => rq,
            Err(e) => {
                tracing::warn!("Undecodable session request: {e}");
                return error_response(&com_key, "Bad request");
            }
        };

        match self.session_request(&rq, &com_key, session_id) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Rejected session request: {e}");
                error_response(&com_key, "Bad request")
            }
        }
    }

    fn session_request(
        &self,
        rq: &Request,
        com_key: &str,
        session_id: &str,
    ) -> Result<String, RequestError> {
        let result = match rq.try_string("rq")? {
            "changePass" => self.store.change_password(
                com_key,
                rq.try_string("user")?,
                rq.try_string("old")?,
                rq.try_string("new")?,
            ),
            "logout" => self.store.delete_session(com_key, session_id),
            other => return Ok(error_response(com_key, &format!("Unknown request '{other}'"))),
        };
        Ok(result.unwrap_or_else(|e| fatal(e)))
    }
}

#[async_trait]
impl Handler for SessionRpc {
    async fn handle(&self, request: &str) -> Vec<u8> {
        let rpc = self.clone();
        let request = request.to_string();
        // Store access is blocking file I/O.
        match tokio::task::spawn_blocking(move || rpc.process(&request)).await {
            Ok(answer) => answer.into_bytes(),
            Err(e) => {
                tracing::error!("Session request worker failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::messages::{decode_response, response};
    use crate::config::StoreConfig;
    use crate::value::Value;
    use tempfile::TempDir;

    fn rpc() -> (TempDir, SessionRpc) {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            home: tmp.path().to_path_buf(),
            expiration_secs: 600,
            ..StoreConfig::default()
        };
        let store = Arc::new(SessionStore::initialize(&config).unwrap());
        store.put_user("ana", "secret", "1").unwrap();
        (tmp, SessionRpc::new(store, "testapp"))
    }

    fn open_request(rpc: &SessionRpc, body: Value) -> String {
        format!(":{}", response(rpc.app_key(), body))
    }

    fn login(rpc: &SessionRpc) -> Value {
        let rq = open_request(
            rpc,
            Value::object([
                ("rq", Value::from("authentication")),
                ("key", Value::from("clientkey")),
                ("user", Value::from("ana")),
                ("pass", Value::from("secret")),
                ("withExpiration", Value::Bool(true)),
            ]),
        );
        decode_response("clientkey", &rpc.process(&rq)).unwrap()
    }

    fn text(v: &Value, k: &str) -> String {
        v.get(k).unwrap().as_str().unwrap().to_string()
    }

    #[test]
    fn app_key_is_derived_from_app_name() {
        let (_tmp, rpc) = rpc();
        assert_eq!(rpc.app_key(), derive_key("testapp", KEY_LEN));
    }

    #[test]
    fn authentication_then_connect() {
        let (_tmp, rpc) = rpc();
        let auth = login(&rpc);
        assert_eq!(text(&auth, "level"), "1");

        let rq = open_request(
            &rpc,
            Value::object([
                ("rq", Value::from("connect")),
                ("sessionId", Value::from(text(&auth, "sessionId"))),
            ]),
        );
        let rp = decode_response(&text(&auth, "key"), &rpc.process(&rq)).unwrap();
        assert_eq!(text(&rp, "user"), "ana");
    }

    #[test]
    fn session_calls_use_communication_key() {
        let (_tmp, rpc) = rpc();
        let auth = login(&rpc);
        let ss = text(&auth, "sessionId");
        let ck = text(&auth, "key");
        let con = text(&auth, "conKey");

        let change = response(
            &ck,
            Value::object([
                ("rq", Value::from("changePass")),
                ("user", Value::from("ana")),
                ("old", Value::from("secret")),
                ("new", Value::from("better")),
            ]),
        );
        let rp = decode_response(&ck, &rpc.process(&format!("{ss}:{con}:{change}"))).unwrap();
        assert!(rp.get("ok").unwrap().as_bool().unwrap());

        let unknown = response(&ck, Value::object([("rq", Value::from("dance"))]));
        let rp = decode_response(&ck, &rpc.process(&format!("{ss}:{unknown}"))).unwrap();
        assert_eq!(text(&rp, "error"), "Unknown request 'dance'");

        let logout = response(&ck, Value::object([("rq", Value::from("logout"))]));
        let rp = decode_response(&ck, &rpc.process(&format!("{ss}:{logout}"))).unwrap();
        assert_eq!(rp, Value::empty_object());

        let rp = rpc.process(&format!("{ss}:{logout}"));
        let rp = decode_response(NO_SESSION_KEY, &rp).unwrap();
        assert!(rp.get("expired").unwrap().as_bool().unwrap());
    }

    #[test]
    fn stale_connection_key_is_expired() {
        let (_tmp, rpc) = rpc();
        let auth = login(&rpc);
        let ss = text(&auth, "sessionId");
        let ck = text(&auth, "key");
        let logout = response(&ck, Value::object([("rq", Value::from("logout"))]));
        let rp = rpc.process(&format!("{ss}:stale:{logout}"));
        assert_eq!(rp, expired_response());
    }

    #[test]
    fn garbage_gets_error_with_fallback_key() {
        let (_tmp, rpc) = rpc();
        for payload in [":%%%", "a:b:c:d"] {
            let rp = decode_response(NO_SESSION_KEY, &rpc.process(payload)).unwrap();
            assert!(rp.get("error").is_some(), "payload {payload}");
        }
    }

    fn bad_request(rp: &str, key: &str) -> bool {
        let rp = decode_response(key, rp).unwrap();
        rp.get("error").and_then(|e| e.as_str().ok()) == Some("Bad request")
    }

    #[test]
    fn incomplete_openings_get_error_response() {
        let (_tmp, rpc) = rpc();
        let incomplete = [
            Value::object([("rq", Value::from("connect"))]),
            Value::object([
                ("rq", Value::from("authentication")),
                ("key", Value::from("k")),
                ("user", Value::from("ana")),
                ("withExpiration", Value::Bool(true)),
            ]),
            Value::object([("sessionId", Value::from("x"))]),
            Value::object([("rq", Value::Int(3))]),
        ];
        for body in incomplete {
            let rp = rpc.process(&open_request(&rpc, body.clone()));
            assert!(bad_request(&rp, NO_SESSION_KEY), "body {}", body.encode());
        }
        // Still serving afterwards.
        assert_eq!(text(&login(&rpc), "level"), "1");
    }

    #[test]
    fn incomplete_session_calls_get_error_response() {
        let (_tmp, rpc) = rpc();
        let auth = login(&rpc);
        let ss = text(&auth, "sessionId");
        let ck = text(&auth, "key");

        for body in [
            Value::object([("rq", Value::from("changePass")), ("user", Value::from("ana"))]),
            Value::object([("user", Value::from("ana"))]),
        ] {
            let rp = rpc.process(&format!("{ss}:{}", response(&ck, body)));
            assert!(bad_request(&rp, &ck));
        }
        assert_eq!(rpc.store().check_user("ana", "secret").unwrap(), Some("1".into()));
    }

    #[tokio::test]
    async fn handler_returns_raw_bytes() {
        let (_tmp, rpc) = rpc();
        let bytes = rpc.handle("a:b:c:d").await;
        assert_eq!(bytes, rpc.process("a:b:c:d").into_bytes());
    }
}
