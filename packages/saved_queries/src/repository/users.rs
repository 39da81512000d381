use std::time::Duration;

use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, StoreError, ValidationError};
use crate::models::User;

use super::{parse_uuid, with_deadline};

/// Users that saved queries can be shared to.
#[derive(Clone)]
pub struct UserDirectory {
    pool: SqlitePool,
    timeout: Option<Duration>,
}

impl UserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn create(&self, principal_name: &str) -> Result<User> {
        let principal_name = principal_name.trim();
        if principal_name.is_empty() {
            return Err(ValidationError::Empty("principal name").into());
        }

        with_deadline(self.timeout, async move {
            let user = User {
                id: Uuid::new_v4(),
                principal_name: principal_name.to_string(),
                created_at: chrono::Utc::now().timestamp(),
            };

            sqlx::query("INSERT INTO users (id, principal_name, created_at) VALUES (?, ?, ?)")
                .bind(user.id.to_string())
                .bind(&user.principal_name)
                .bind(user.created_at)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    StoreError::from_write(e, || {
                        format!("user {:?} already exists", principal_name)
                    })
                })?;

            info!("Created user {} ({})", user.id, user.principal_name);
            Ok::<_, StoreError>(user)
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<User> {
        with_deadline(self.timeout, async move {
            let row = sqlx::query("SELECT id, principal_name, created_at FROM users WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::not_found("user", id))?;

            Ok::<_, StoreError>(User {
                id: parse_uuid(row.try_get::<&str, _>("id")?)?,
                principal_name: row.try_get("principal_name")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .await
    }

    /// Looks a user up by principal name.
    pub async fn find_by_principal(&self, principal_name: &str) -> Result<Option<User>> {
        with_deadline(self.timeout, async move {
            let row = sqlx::query(
                "SELECT id, principal_name, created_at FROM users WHERE principal_name = ?",
            )
            .bind(principal_name)
            .fetch_optional(&self.pool)
            .await?;

            let user = match row {
                Some(row) => Some(User {
                    id: parse_uuid(row.try_get::<&str, _>("id")?)?,
                    principal_name: row.try_get("principal_name")?,
                    created_at: row.try_get("created_at")?,
                }),
                None => None,
            };
            Ok::<_, StoreError>(user)
        })
        .await
    }
}
