//! Username directory populated by `POST /register`.
//!
//! Maps each registered username to the public key it registered with. The
//! relay uses it only to flag an `auth` frame whose key disagrees with the
//! registration; unregistered users may still join rooms.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Errors that can occur when registering a user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The username is already registered.
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),
    /// A required field is empty or whitespace.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

/// How a presented key relates to a username's registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    /// The username was never registered.
    Unregistered,
    /// The key matches the registered one.
    Matches,
    /// The username is registered with a different key.
    Mismatch,
}

/// In-memory, process-lifetime user directory.
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, String>>,
}

impl UserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `username` with `public_key`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::EmptyField`] for blank input and
    /// [`DirectoryError::UsernameTaken`] if the name is already registered.
    pub async fn register(&self, username: &str, public_key: &str) -> Result<(), DirectoryError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(DirectoryError::EmptyField("username"));
        }
        if public_key.trim().is_empty() {
            return Err(DirectoryError::EmptyField("public_key"));
        }

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(DirectoryError::UsernameTaken(username.to_string()));
        }
        users.insert(username.to_string(), public_key.to_string());
        drop(users);

        tracing::info!(username = %username, "user registered");
        Ok(())
    }

    /// Compares `public_key` against the key registered for `username`.
    ///
    /// Keys are compared after trimming, so PEM with or without a trailing
    /// newline is treated alike.
    pub async fn check_key(&self, username: &str, public_key: &str) -> KeyCheck {
        let users = self.users.read().await;
        match users.get(username.trim()) {
            None => KeyCheck::Unregistered,
            Some(k) if k.trim() == public_key.trim() => KeyCheck::Matches,
            Some(_) => KeyCheck::Mismatch,
        }
    }

    /// Number of registered users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Whether no user has registered yet.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}
