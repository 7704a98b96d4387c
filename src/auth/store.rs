//! Encrypted file-backed user and session store.
//!
//! Files under the store home:
//! - `users.db`: rows `[id, passwordHash, level]`
//! - `sessions.db`: rows `[id, comKey, conKey, userId, level, issuedAt, lapseSeconds]`
//!
//! Both are read whole, mutated in memory and rewritten whole. Each file has
//! its own lock held across the full read-modify-write cycle, so concurrent
//! callers never lose each other's updates.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::messages::{response, NO_SESSION_KEY};
use super::table::{EncryptedTable, Row};
use crate::cipher::{derive_key, generate_key};
use crate::config::{StoreConfig, DEFAULT_KEY_SEED};
use crate::value::{Value, ValueError};

/// Length of generated keys, session ids and password hashes.
pub const KEY_LEN: usize = 300;

/// Lapse for sessions opened without expiration: 30 days.
pub const NO_EXPIRATION_SECS: i64 = 2_592_000;

/// User seeded into an empty store.
pub const ADMIN_ID: &str = "admin";
pub const ADMIN_LEVEL: &str = "0";

/// Well-known password of the seeded admin. Change it after installing.
pub const BOOTSTRAP_PASSWORD: &str = DEFAULT_KEY_SEED;

const USERS_FILE: &str = "users.db";
const SESSIONS_FILE: &str = "sessions.db";

/// Source of the current Unix time in seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    /// `derive_key(password, KEY_LEN)`.
    pub password_hash: String,
    pub level: String,
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Communication key: encrypts ordinary responses of this session.
    pub com_key: String,
    /// Connection key: rotated on every successful connect.
    pub con_key: String,
    pub user_id: String,
    pub level: String,
    /// Unix seconds of creation or last refresh.
    pub issued_at: i64,
    pub lapse_secs: i64,
}

impl Session {
    pub fn is_active(&self, now: i64) -> bool {
        now <= self.issued_at + self.lapse_secs
    }
}

fn field<'a>(fields: &'a [Value], index: usize, row: &Value) -> Result<&'a Value, ValueError> {
    fields
        .get(index)
        .ok_or_else(|| ValueError::MissingElement(row.encode()))
}

impl Row for User {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.id.as_str()),
            Value::from(self.password_hash.as_str()),
            Value::from(self.level.as_str()),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let f = value.as_array()?;
        Ok(Self {
            id: field(f, 0, value)?.as_str()?.to_string(),
            password_hash: field(f, 1, value)?.as_str()?.to_string(),
            level: field(f, 2, value)?.as_str()?.to_string(),
        })
    }
}

impl Row for Session {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.id.as_str()),
            Value::from(self.com_key.as_str()),
            Value::from(self.con_key.as_str()),
            Value::from(self.user_id.as_str()),
            Value::from(self.level.as_str()),
            Value::Int(self.issued_at),
            Value::Int(self.lapse_secs),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let f = value.as_array()?;
        Ok(Self {
            id: field(f, 0, value)?.as_str()?.to_string(),
            com_key: field(f, 1, value)?.as_str()?.to_string(),
            con_key: field(f, 2, value)?.as_str()?.to_string(),
            user_id: field(f, 3, value)?.as_str()?.to_string(),
            level: field(f, 4, value)?.as_str()?.to_string(),
            issued_at: field(f, 5, value)?.as_i64()?,
            lapse_secs: field(f, 6, value)?.as_i64()?,
        })
    }
}

/// Session/identity store rooted at one home directory.
pub struct SessionStore {
    home: PathBuf,
    expiration_secs: i64,
    users: Mutex<EncryptedTable<User>>,
    sessions: Mutex<EncryptedTable<Session>>,
    clock: Clock,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("home", &self.home)
            .field("expiration_secs", &self.expiration_secs)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Opens the store, creating the home directory and seeding the admin
    /// user and an empty session table on first use.
    pub fn initialize(config: &StoreConfig) -> Result<Self> {
        Self::initialize_with_clock(config, system_clock())
    }

    /// Like [`SessionStore::initialize`] with an explicit time source.
    pub fn initialize_with_clock(config: &StoreConfig, clock: Clock) -> Result<Self> {
        let home = config.home.clone();
        std::fs::create_dir_all(&home)
            .with_context(|| format!("Failed to create store home {}", home.display()))?;

        let file_key = derive_key(&config.key_seed, config.key_seed.len());
        let store = Self {
            users: Mutex::new(EncryptedTable::new(home.join(USERS_FILE), file_key.clone())),
            sessions: Mutex::new(EncryptedTable::new(home.join(SESSIONS_FILE), file_key)),
            home,
            expiration_secs: config.expiration_secs,
            clock,
        };

        if !store.users.lock().exists() {
            store.users.lock().write(&[])?;
            store.put_user(ADMIN_ID, BOOTSTRAP_PASSWORD, ADMIN_LEVEL)?;
            store.sessions.lock().write(&[])?;
            tracing::info!(home = %store.home.display(), "Session store created with bootstrap admin");
        } else if !store.sessions.lock().exists() {
            store.sessions.lock().write(&[])?;
        }

        Ok(store)
    }

    /// Directory holding the store files.
    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    // ── Users ───────────────────────────────────────────────────────

    /// Creates or replaces user `id`.
    pub fn put_user(&self, id: &str, password: &str, level: &str) -> Result<()> {
        let password_hash = derive_key(password, KEY_LEN);
        let table = self.users.lock();
        let mut users = table.read()?;
        match users.iter_mut().find(|u| u.id == id) {
            Some(user) => {
                user.password_hash = password_hash;
                user.level = level.to_string();
            }
            None => users.push(User {
                id: id.to_string(),
                password_hash,
                level: level.to_string(),
            }),
        }
        table.write(&users)
    }

    /// All users, in table order.
    pub fn users(&self) -> Result<Vec<User>> {
        self.users.lock().read()
    }

    /// Level of `id` when `password` matches, `None` otherwise.
    pub fn check_user(&self, id: &str, password: &str) -> Result<Option<String>> {
        let password_hash = derive_key(password, KEY_LEN);
        let users = self.users.lock().read()?;
        Ok(users
            .into_iter()
            .find(|u| u.id == id && u.password_hash == password_hash)
            .map(|u| u.level))
    }

    /// Replaces the password of `user_id` when `old_password` matches.
    /// Answers `{ok: bool}` encrypted with `com_key`.
    pub fn change_password(
        &self,
        com_key: &str,
        user_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<String> {
        let old_hash = derive_key(old_password, KEY_LEN);
        let table = self.users.lock();
        let mut users = table.read()?;

        let changed = match users.iter_mut().find(|u| u.id == user_id) {
            Some(user) if user.password_hash == old_hash => {
                user.password_hash = derive_key(new_password, KEY_LEN);
                true
            }
            _ => false,
        };
        if changed {
            table.write(&users)?;
            tracing::info!(user = user_id, "Password changed");
        } else {
            tracing::warn!(user = user_id, "Password change rejected");
        }

        Ok(response(com_key, Value::object([("ok", Value::Bool(changed))])))
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// All stored sessions, expired ones included.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.sessions.lock().read()
    }

    /// Verifies credentials and opens a session.
    ///
    /// Answers `{sessionId, key, conKey, level}` encrypted with
    /// `request_key`; every field is empty when the user is unknown or the
    /// password is wrong.
    pub fn authenticate(
        &self,
        request_key: &str,
        user_id: &str,
        password: &str,
        with_expiration: bool,
    ) -> Result<String> {
        let Some(level) = self.check_user(user_id, password)? else {
            tracing::warn!(user = user_id, "Authentication failed");
            return Ok(response(
                request_key,
                Value::object([
                    ("sessionId", Value::from("")),
                    ("key", Value::from("")),
                    ("conKey", Value::from("")),
                    ("level", Value::from("")),
                ]),
            ));
        };

        let session = Session {
            id: generate_key(KEY_LEN),
            com_key: generate_key(KEY_LEN),
            con_key: generate_key(KEY_LEN),
            user_id: user_id.to_string(),
            level: level.clone(),
            issued_at: self.now(),
            lapse_secs: if with_expiration {
                self.expiration_secs
            } else {
                NO_EXPIRATION_SECS
            },
        };

        {
            let table = self.sessions.lock();
            let now = self.now();
            let mut sessions = table.read()?;
            let before = sessions.len();
            sessions.retain(|s| s.is_active(now));
            if sessions.len() != before {
                tracing::debug!(purged = before - sessions.len(), "Purged expired sessions");
            }
            sessions.push(session.clone());
            table.write(&sessions)?;
        }
        tracing::info!(user = user_id, with_expiration, "Session opened");

        Ok(response(
            request_key,
            Value::object([
                ("sessionId", Value::from(session.id)),
                ("key", Value::from(session.com_key)),
                ("conKey", Value::from(session.con_key)),
                ("level", Value::from(level)),
            ]),
        ))
    }

    /// Resumes `session_id`, refreshing its expiration and rotating its
    /// connection key.
    ///
    /// Answers `{key, conKey, user, level}` encrypted with the session's
    /// communication key, or the same fields empty encrypted with
    /// [`NO_SESSION_KEY`] when there is no active session.
    pub fn connect(&self, session_id: &str) -> Result<String> {
        let table = self.sessions.lock();
        let now = self.now();
        let mut sessions = table.read()?;

        let Some(session) = sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.is_active(now))
        else {
            return Ok(response(
                NO_SESSION_KEY,
                Value::object([
                    ("key", Value::from("")),
                    ("conKey", Value::from("")),
                    ("user", Value::from("")),
                    ("level", Value::from("")),
                ]),
            ));
        };

        session.issued_at = now;
        session.con_key = generate_key(KEY_LEN);
        let reply = response(
            &session.com_key,
            Value::object([
                ("key", Value::from(session.com_key.as_str())),
                ("conKey", Value::from(session.con_key.as_str())),
                ("user", Value::from(session.user_id.as_str())),
                ("level", Value::from(session.level.as_str())),
            ]),
        );
        table.write(&sessions)?;
        Ok(reply)
    }

    /// Communication key of an active session.
    ///
    /// A non-empty `con_key` must equal the session's current connection key.
    /// Refreshes the session's expiration on success.
    pub fn get_com_key(&self, session_id: &str, con_key: &str) -> Result<Option<String>> {
        let table = self.sessions.lock();
        let now = self.now();
        let mut sessions = table.read()?;

        let Some(session) = sessions.iter_mut().find(|s| {
            s.id == session_id && (con_key.is_empty() || s.con_key == con_key) && s.is_active(now)
        }) else {
            return Ok(None);
        };

        session.issued_at = now;
        let com_key = session.com_key.clone();
        table.write(&sessions)?;
        Ok(Some(com_key))
    }

    /// Removes `session_id`. Answers an empty object encrypted with `com_key`.
    pub fn delete_session(&self, com_key: &str, session_id: &str) -> Result<String> {
        {
            let table = self.sessions.lock();
            let mut sessions = table.read()?;
            sessions.retain(|s| s.id != session_id);
            table.write(&sessions)?;
        }
        Ok(response(com_key, Value::empty_object()))
    }
}
