//! Sharing edges between saved queries and users.
//!
//! A duplicate grant for the same (query, user) pair is rejected with
//! [`StoreError::Conflict`]; the composite primary key enforces it. Revoking a
//! grant that does not exist is a no-op.

use std::time::Duration;

use sqlx::Row;
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::Grant;

use super::{query_exists, user_exists, with_deadline};

#[derive(Clone)]
pub struct SharingLedger {
    pool: SqlitePool,
    timeout: Option<Duration>,
}

impl SharingLedger {
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

    /// Shares `query_id` with `user_id`. Both must exist.
    pub async fn grant(&self, query_id: i64, user_id: Uuid) -> Result<Grant> {
        with_deadline(self.timeout, async move {
            let mut tx = self.pool.begin().await?;
            let grant = insert_grant(&mut tx, query_id, user_id).await?;
            tx.commit().await?;
            info!("Shared saved query {} to user {}", query_id, user_id);
            Ok::<_, StoreError>(grant)
        })
        .await
    }

    /// Shares `query_id` with every user in `user_ids`, or with none of them
    /// if any grant fails.
    pub async fn grant_many(&self, query_id: i64, user_ids: &[Uuid]) -> Result<Vec<Grant>> {
        with_deadline(self.timeout, async move {
            let mut tx = self.pool.begin().await?;
            let mut grants = Vec::with_capacity(user_ids.len());
            for user_id in user_ids {
                grants.push(insert_grant(&mut tx, query_id, *user_id).await?);
            }
            tx.commit().await?;
            info!(
                "Shared saved query {} to {} user(s)",
                query_id,
                grants.len()
            );
            Ok::<_, StoreError>(grants)
        })
        .await
    }

    /// Removes the grant if present.
    pub async fn revoke(&self, query_id: i64, user_id: Uuid) -> Result<()> {
        with_deadline(self.timeout, async move {
            let removed = sqlx::query(
                "DELETE FROM saved_queries_permissions WHERE query_id = ? AND shared_to_user_id = ?",
            )
            .bind(query_id)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();

            if removed > 0 {
                info!("Revoked saved query {} from user {}", query_id, user_id);
            }
            Ok::<_, StoreError>(())
        })
        .await
    }

    /// True iff a grant exists for exactly this pair. Errors only when the
    /// query itself is unknown.
    pub async fn is_shared(&self, query_id: i64, user_id: Uuid) -> Result<bool> {
        with_deadline(self.timeout, async move {
            let row = sqlx::query(
                r#"
                SELECT
                    EXISTS(SELECT 1 FROM saved_queries WHERE id = ?) as query_found,
                    EXISTS(
                        SELECT 1 FROM saved_queries_permissions
                        WHERE query_id = ? AND shared_to_user_id = ?
                    ) as shared
                "#,
            )
            .bind(query_id)
            .bind(query_id)
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;

            if row.try_get::<i64, _>("query_found")? == 0 {
                return Err(StoreError::not_found("saved query", query_id));
            }
            Ok::<_, StoreError>(row.try_get::<i64, _>("shared")? != 0)
        })
        .await
    }
}

async fn insert_grant(conn: &mut SqliteConnection, query_id: i64, user_id: Uuid) -> Result<Grant> {
    if !query_exists(conn, query_id).await? {
        return Err(StoreError::not_found("saved query", query_id));
    }
    if !user_exists(conn, user_id).await? {
        return Err(StoreError::not_found("user", user_id));
    }

    let now = chrono::Utc::now().timestamp();
    let inserted = sqlx::query(
        "INSERT INTO saved_queries_permissions (query_id, shared_to_user_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(query_id)
    .bind(user_id.to_string())
    .bind(now)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => {}
        // Query or user deleted between the existence check and the insert
        Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
            return Err(missing_grant_target(conn, query_id, user_id).await);
        }
        Err(e) => {
            return Err(StoreError::from_write(e, || {
                format!("saved query {} is already shared to user {}", query_id, user_id)
            }));
        }
    }

    Ok(Grant {
        query_id,
        user_id,
        created_at: now,
    })
}

/// Names whichever side of a rejected grant no longer exists.
async fn missing_grant_target(
    conn: &mut SqliteConnection,
    query_id: i64,
    user_id: Uuid,
) -> StoreError {
    match query_exists(conn, query_id).await {
        Ok(false) => StoreError::not_found("saved query", query_id),
        Ok(true) => StoreError::not_found("user", user_id),
        Err(e) => StoreError::Storage(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers;

    #[tokio::test]
    async fn grant_then_is_shared() {
        let db = test_helpers::test_database().await;
        let user = db.users().create("user@example.com").await.unwrap();
        let query = db
            .saved_queries()
            .create(user.id, "Test Query", "Example", "TESTING")
            .await
            .unwrap();

        let grant = db.sharing().grant(query.id, user.id).await.unwrap();
        assert_eq!(grant.query_id, query.id);
        assert_eq!(grant.user_id, user.id);

        assert!(db.sharing().is_shared(query.id, user.id).await.unwrap());
    }

    #[tokio::test]
    async fn never_granted_is_false_not_error() {
        let db = test_helpers::test_database().await;
        let owner = Uuid::new_v4();
        let query = db
            .saved_queries()
            .create(owner, "private", "", "")
            .await
            .unwrap();

        let other = Uuid::new_v4();
        assert!(!db.sharing().is_shared(query.id, other).await.unwrap());
        // Repeated reads agree
        assert!(!db.sharing().is_shared(query.id, other).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_round_trip() {
        let db = test_helpers::test_database().await;
        let ledger = db.sharing();
        let reader = db.users().create("reader").await.unwrap();
        let query = db
            .saved_queries()
            .create(Uuid::new_v4(), "shared", "", "")
            .await
            .unwrap();

        ledger.grant(query.id, reader.id).await.unwrap();
        assert!(ledger.is_shared(query.id, reader.id).await.unwrap());

        ledger.revoke(query.id, reader.id).await.unwrap();
        assert!(!ledger.is_shared(query.id, reader.id).await.unwrap());

        // Revoking again is a no-op
        ledger.revoke(query.id, reader.id).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_grant_conflicts() {
        let db = test_helpers::test_database().await;
        let ledger = db.sharing();
        let reader = db.users().create("reader").await.unwrap();
        let query = db
            .saved_queries()
            .create(Uuid::new_v4(), "shared", "", "")
            .await
            .unwrap();

        ledger.grant(query.id, reader.id).await.unwrap();
        let err = ledger.grant(query.id, reader.id).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(ledger.is_shared(query.id, reader.id).await.unwrap());
    }

    #[tokio::test]
    async fn grant_requires_existing_query_and_user() {
        let db = test_helpers::test_database().await;
        let ledger = db.sharing();
        let reader = db.users().create("reader").await.unwrap();
        let query = db
            .saved_queries()
            .create(Uuid::new_v4(), "shared", "", "")
            .await
            .unwrap();

        let err = ledger.grant(9999, reader.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "saved query", .. }));

        let err = ledger.grant(query.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));
    }

    #[tokio::test]
    async fn vanished_grant_target_is_named() {
        let db = test_helpers::test_database().await;
        let query = db
            .saved_queries()
            .create(Uuid::new_v4(), "q", "", "")
            .await
            .unwrap();
        let mut conn = db.pool.acquire().await.unwrap();

        let err = missing_grant_target(&mut conn, query.id, Uuid::new_v4()).await;
        assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));

        let err = missing_grant_target(&mut conn, 9999, Uuid::new_v4()).await;
        assert!(matches!(err, StoreError::NotFound { entity: "saved query", .. }));
    }

    #[tokio::test]
    async fn is_shared_on_unknown_query_is_not_found() {
        let db = test_helpers::test_database().await;
        let err = db
            .sharing()
            .is_shared(12345, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_cascades_grants() {
        let db = test_helpers::test_database().await;
        let ledger = db.sharing();
        let reader = db.users().create("reader").await.unwrap();
        let query = db
            .saved_queries()
            .create(Uuid::new_v4(), "doomed", "", "")
            .await
            .unwrap();
        ledger.grant(query.id, reader.id).await.unwrap();

        db.saved_queries().delete(query.id).await.unwrap();

        assert!(
            ledger
                .is_shared(query.id, reader.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
        let grants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM saved_queries_permissions")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(grants, 0);
    }

    #[tokio::test]
    async fn grant_many_is_all_or_nothing() {
        let db = test_helpers::test_database().await;
        let ledger = db.sharing();
        let a = db.users().create("a").await.unwrap();
        let b = db.users().create("b").await.unwrap();
        let query = db
            .saved_queries()
            .create(Uuid::new_v4(), "team", "", "")
            .await
            .unwrap();

        // Unknown user in the batch aborts every grant
        let err = ledger
            .grant_many(query.id, &[a.id, Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!ledger.is_shared(query.id, a.id).await.unwrap());

        let grants = ledger.grant_many(query.id, &[a.id, b.id]).await.unwrap();
        assert_eq!(grants.len(), 2);
        assert!(ledger.is_shared(query.id, a.id).await.unwrap());
        assert!(ledger.is_shared(query.id, b.id).await.unwrap());
    }

    #[tokio::test]
    async fn shared_state_is_per_pair() {
        let db = test_helpers::test_database().await;
        let ledger = db.sharing();
        let a = db.users().create("a").await.unwrap();
        let b = db.users().create("b").await.unwrap();
        let store = db.saved_queries();
        let q1 = store.create(Uuid::new_v4(), "q1", "", "").await.unwrap();
        let q2 = store.create(Uuid::new_v4(), "q2", "", "").await.unwrap();

        ledger.grant(q1.id, a.id).await.unwrap();

        assert!(ledger.is_shared(q1.id, a.id).await.unwrap());
        assert!(!ledger.is_shared(q1.id, b.id).await.unwrap());
        assert!(!ledger.is_shared(q2.id, a.id).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_user_removes_their_grants() {
        let db = test_helpers::test_database().await;
        let reader = db.users().create("reader").await.unwrap();
        let query = db
            .saved_queries()
            .create(Uuid::new_v4(), "q", "", "")
            .await
            .unwrap();
        db.sharing().grant(query.id, reader.id).await.unwrap();

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(reader.id.to_string())
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(!db.sharing().is_shared(query.id, reader.id).await.unwrap());
    }
}
