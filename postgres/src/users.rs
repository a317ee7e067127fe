//! Login accounts in the `users` table.

use conversion_report_auth::{AuthError, User, UserFuture, UserRepository};
use conversion_report_core::principal::Role;
use sqlx::{PgPool, Row};

/// PostgreSQL user repository.
#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserRepository for PostgresUserRepository {
    fn find_by_username(&self, username: &str) -> UserFuture<'_, Option<User>> {
        let username = username.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT username, password, role FROM users WHERE username = $1")
                .bind(&username)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AuthError::DatabaseError(format!("Failed to get user: {e}")))?;

            let Some(row) = row else {
                return Ok(None);
            };

            let corrupt = |e: sqlx::Error| {
                AuthError::DatabaseError(format!("Corrupt user row for {username}: {e}"))
            };
            let role: String = row.try_get("role").map_err(corrupt)?;
            let role = Role::parse(&role).ok_or_else(|| {
                AuthError::DatabaseError(format!("Unknown role {role:?} for {username}"))
            })?;

            Ok(Some(User {
                username: row.try_get("username").map_err(corrupt)?,
                password_hash: row.try_get("password").map_err(corrupt)?,
                role,
            }))
        })
    }

    fn insert_if_absent(&self, user: &User) -> UserFuture<'_, bool> {
        let user = user.clone();
        Box::pin(async move {
            let inserted = sqlx::query(
                "INSERT INTO users (username, password, role) VALUES ($1, $2, $3) \
                 ON CONFLICT (username) DO NOTHING",
            )
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::DatabaseError(format!("Failed to create user: {e}")))?
            .rows_affected();

            Ok(inserted > 0)
        })
    }
}
