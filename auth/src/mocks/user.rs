//! Mock user repository for testing.

use crate::error::{AuthError, Result};
use crate::users::{User, UserFuture, UserRepository};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock user repository.
///
/// Uses in-memory storage for testing. Clones share the same accounts.
#[derive(Debug, Clone, Default)]
pub struct MockUserRepository {
    users: Arc<Mutex<HashMap<String, User>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MockUserRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account.
    pub fn insert(&self, user: User) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.username.clone(), user);
        }
    }

    /// Remove an account.
    pub fn remove(&self, username: &str) {
        if let Ok(mut users) = self.users.lock() {
            users.remove(username);
        }
    }

    /// Current copy of an account.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<User> {
        self.users.lock().ok()?.get(username).cloned()
    }

    /// Make every call fail with [`AuthError::DatabaseError`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.lock() {
            *flag = unavailable;
        }
    }

    fn check_available(&self) -> Result<()> {
        let unavailable = self.unavailable.lock().map_or(true, |flag| *flag);
        if unavailable {
            Err(AuthError::DatabaseError("user store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl UserRepository for MockUserRepository {
    fn find_by_username(&self, username: &str) -> UserFuture<'_, Option<User>> {
        let username = username.to_string();
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .users
                .lock()
                .map_err(|_| AuthError::DatabaseError("lock poisoned".to_string()))?
                .get(&username)
                .cloned())
        })
    }

    fn insert_if_absent(&self, user: &User) -> UserFuture<'_, bool> {
        let user = user.clone();
        Box::pin(async move {
            self.check_available()?;
            let mut users = self
                .users
                .lock()
                .map_err(|_| AuthError::DatabaseError("lock poisoned".to_string()))?;
            if users.contains_key(&user.username) {
                return Ok(false);
            }
            users.insert(user.username.clone(), user);
            Ok(true)
        })
    }
}
