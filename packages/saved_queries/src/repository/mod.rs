// Repository layer: one file per store, each holding its own pool handle.
//
// Every public operation runs under an optional deadline. Dropping the future
// (timeout or caller cancellation) drops any open transaction, which rolls it
// back.

use std::future::Future;
use std::time::Duration;

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::{Result, StoreError};

mod saved_queries;
mod sharing;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use saved_queries::{ListRequest, ListScope, SavedQueryStore};
pub use sharing::SharingLedger;
pub use users::UserDirectory;

pub(crate) async fn with_deadline<T, F>(deadline: Option<Duration>, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| StoreError::Timeout(limit))?,
        None => op.await,
    }
}

pub(crate) fn parse_uuid(raw: &str) -> std::result::Result<Uuid, sqlx::Error> {
    Uuid::parse_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(crate) async fn query_exists(
    conn: &mut SqliteConnection,
    query_id: i64,
) -> std::result::Result<bool, sqlx::Error> {
    let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM saved_queries WHERE id = ?)")
        .bind(query_id)
        .fetch_one(conn)
        .await?;
    Ok(found != 0)
}

pub(crate) async fn user_exists(
    conn: &mut SqliteConnection,
    user_id: Uuid,
) -> std::result::Result<bool, sqlx::Error> {
    let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
        .bind(user_id.to_string())
        .fetch_one(conn)
        .await?;
    Ok(found != 0)
}
