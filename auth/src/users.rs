//! User accounts and their storage.

use crate::error::Result;
use crate::password::PasswordHasher;
use conversion_report_core::principal::{Principal, Role};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`UserRepository`] methods.
pub type UserFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique login name.
    pub username: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    /// Authorization role.
    pub role: Role,
}

impl User {
    /// The principal this account authenticates as.
    #[must_use]
    pub fn principal(&self) -> Principal {
        Principal::new(self.username.clone(), self.role)
    }
}

/// User repository.
///
/// This trait abstracts over user storage (`PostgreSQL` in production).
pub trait UserRepository: Send + Sync {
    /// Look a user up by login name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AuthError::DatabaseError`] if the lookup fails.
    fn find_by_username(&self, username: &str) -> UserFuture<'_, Option<User>>;

    /// Insert a user unless the username is taken.
    ///
    /// Returns `true` if the user was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AuthError::DatabaseError`] if the insert fails.
    fn insert_if_absent(&self, user: &User) -> UserFuture<'_, bool>;
}

/// Accounts created at startup when seeding is enabled.
pub const DEFAULT_USERS: &[(&str, &str, Role)] = &[
    ("user", "password", Role::User),
    ("admin", "admin", Role::Admin),
];

/// Create [`DEFAULT_USERS`] that do not exist yet.
///
/// Returns how many accounts were created. Existing accounts are left alone,
/// including their passwords.
///
/// # Errors
///
/// Returns an error if hashing or storage fails.
pub async fn seed_default_users(
    users: &dyn UserRepository,
    hasher: &PasswordHasher,
) -> Result<usize> {
    let mut created = 0;
    for (username, password, role) in DEFAULT_USERS {
        if users.find_by_username(username).await?.is_some() {
            continue;
        }
        let user = User {
            username: (*username).to_string(),
            password_hash: hasher.hash(password).await?,
            role: *role,
        };
        if users.insert_if_absent(&user).await? {
            tracing::info!(username, role = %role, "Seeded default user");
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::MockUserRepository;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let users = MockUserRepository::new();
        let hasher = PasswordHasher::new(4).unwrap();

        assert_eq!(seed_default_users(&users, &hasher).await.unwrap(), 2);
        assert_eq!(seed_default_users(&users, &hasher).await.unwrap(), 0);

        let admin = users.find_by_username("admin").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(hasher.verify("admin", &admin.password_hash).await.unwrap());
    }

    #[tokio::test]
    async fn seeding_keeps_existing_accounts() {
        let users = MockUserRepository::new();
        let hasher = PasswordHasher::new(4).unwrap();
        users.insert(User {
            username: "admin".to_string(),
            password_hash: hasher.hash("changed").await.unwrap(),
            role: Role::Admin,
        });

        assert_eq!(seed_default_users(&users, &hasher).await.unwrap(), 1);

        let admin = users.find_by_username("admin").await.unwrap().unwrap();
        assert!(hasher.verify("changed", &admin.password_hash).await.unwrap());
    }
}
