//! Encrypted protocol messages exchanged with session clients.
//!
//! A message is a value-codec object encrypted with one of the session keys.
//! Responses are built here; requests are decrypted into a [`Request`]. Its
//! plain accessors treat a missing field as a caller bug; the `try_*` ones
//! are for fields that arrive from the network.

use crate::cipher::{self, CipherError};
use crate::value::{Value, ValueError};

/// Well-known key for responses sent when no session is active.
pub const NO_SESSION_KEY: &str = "nosession";

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("cannot decrypt message: {0}")]
    Cipher(#[from] CipherError),
    #[error("malformed message: {0}")]
    Value(#[from] ValueError),
    #[error("key '{0}' not found in request")]
    MissingField(String),
}

/// Encodes `body` and encrypts it with `key`.
pub fn response(key: &str, body: Value) -> String {
    cipher::encode(key, &body.encode())
}

/// `{}` encrypted with `key`.
pub fn empty_response(key: &str) -> String {
    response(key, Value::empty_object())
}

/// `{error: message}` encrypted with `key`.
pub fn error_response(key: &str, message: &str) -> String {
    response(key, Value::object([("error", Value::from(message))]))
}

/// `{expired: true}` encrypted with [`NO_SESSION_KEY`].
pub fn expired_response() -> String {
    response(NO_SESSION_KEY, Value::object([("expired", Value::Bool(true))]))
}

/// Decrypts and parses a message built with [`response`].
pub fn decode_response(key: &str, cipher_text: &str) -> Result<Value, RequestError> {
    let text = cipher::decode(key, cipher_text)?;
    Ok(Value::decode(&text)?)
}

/// A decrypted request object.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    fields: Value,
}

impl Request {
    /// Decrypts `cipher_text` with `key`. The payload must be an object.
    pub fn decode(key: &str, cipher_text: &str) -> Result<Self, RequestError> {
        Self::from_value(decode_response(key, cipher_text)?)
    }

    pub fn from_value(fields: Value) -> Result<Self, RequestError> {
        fields.as_object()?;
        Ok(Self { fields })
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields.get(key).is_some()
    }

    fn field(&self, key: &str) -> &Value {
        match self.fields.get(key) {
            Some(v) => v,
            None => panic!("Key '{key}' not found in request"),
        }
    }

    fn typed<'a, T>(&'a self, key: &str, read: impl FnOnce(&'a Value) -> Result<T, ValueError>) -> T {
        match read(self.field(key)) {
            Ok(v) => v,
            Err(e) => panic!("Bad value for key '{key}' in request: {e}"),
        }
    }

    fn try_typed<'a, T>(
        &'a self,
        key: &str,
        read: impl FnOnce(&'a Value) -> Result<T, ValueError>,
    ) -> Result<T, RequestError> {
        let value = self
            .fields
            .get(key)
            .ok_or_else(|| RequestError::MissingField(key.to_string()))?;
        Ok(read(value)?)
    }

    /// Like [`Request::string`], for fields sent by remote clients.
    pub fn try_string(&self, key: &str) -> Result<&str, RequestError> {
        self.try_typed(key, Value::as_str)
    }

    /// Like [`Request::bool`], for fields sent by remote clients.
    pub fn try_bool(&self, key: &str) -> Result<bool, RequestError> {
        self.try_typed(key, Value::as_bool)
    }

    // The accessors below panic when `key` is missing or has the wrong type.

    pub fn bool(&self, key: &str) -> bool {
        self.typed(key, Value::as_bool)
    }

    pub fn int(&self, key: &str) -> i64 {
        self.typed(key, Value::as_i64)
    }

    pub fn float(&self, key: &str) -> f64 {
        self.typed(key, Value::as_f64)
    }

    pub fn string(&self, key: &str) -> &str {
        self.typed(key, Value::as_str)
    }

    pub fn array(&self, key: &str) -> &[Value] {
        self.typed(key, Value::as_array)
    }

    pub fn object(&self, key: &str) -> &[(String, Value)] {
        self.typed(key, Value::as_object)
    }
}
