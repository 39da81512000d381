use std::time::Duration;

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ListingConfig;
use crate::error::{Result, StoreError, ValidationError};
use crate::filter::{FilterValue, Predicate};
use crate::models::{Page, SavedQuery, SavedQueryUpdate};
use crate::sort::SortList;

use super::{parse_uuid, with_deadline};

const SELECT_COLUMNS: &str = "id, user_id, name, query, description, created_at, updated_at";

/// Which rows a listing may see before any filter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// Queries owned by the user.
    Owned(Uuid),
    /// Queries owned by the user plus those shared to them.
    OwnedOrSharedWith(Uuid),
    /// Every query; for administrative callers.
    All,
}

#[derive(Debug, Clone)]
pub struct ListRequest {
    pub scope: ListScope,
    pub name_prefix: String,
    pub predicate: Predicate,
    pub sort: SortList,
    pub skip: i64,
    /// `None` uses the configured default page size.
    pub limit: Option<i64>,
}

impl ListRequest {
    pub fn new(scope: ListScope) -> Self {
        Self {
            scope,
            name_prefix: String::new(),
            predicate: Predicate::match_all(),
            sort: SortList::default(),
            skip: 0,
            limit: None,
        }
    }

    pub fn owned_by(owner: Uuid) -> Self {
        Self::new(ListScope::Owned(owner))
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn sort(mut self, sort: SortList) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, skip: i64, limit: i64) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }
}

#[derive(Clone)]
pub struct SavedQueryStore {
    pool: SqlitePool,
    listing: ListingConfig,
    timeout: Option<Duration>,
}

impl SavedQueryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            listing: ListingConfig::default(),
            timeout: None,
        }
    }

    pub fn with_listing(mut self, listing: ListingConfig) -> Self {
        self.listing = listing;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn create(
        &self,
        owner: Uuid,
        name: &str,
        description: &str,
        query: &str,
    ) -> Result<SavedQuery> {
        let name = validate_name(name)?;
        with_deadline(self.timeout, self.insert(owner, name, description, query)).await
    }

    pub async fn get(&self, id: i64) -> Result<SavedQuery> {
        with_deadline(self.timeout, self.fetch(id)).await
    }

    /// Applies the set fields of `update`. The owner never changes.
    pub async fn update(&self, id: i64, update: &SavedQueryUpdate) -> Result<SavedQuery> {
        let name = update.name.as_deref().map(validate_name).transpose()?;
        with_deadline(self.timeout, self.apply_update(id, name, update)).await
    }

    /// Deletes the query and every grant on it in one transaction.
    pub async fn delete(&self, id: i64) -> Result<()> {
        with_deadline(self.timeout, self.delete_cascade(id)).await
    }

    /// Lists `owner`'s queries matching `name_prefix` and `predicate`.
    ///
    /// `Page::total` counts every match regardless of `skip`/`limit`.
    pub async fn list(
        &self,
        owner: Uuid,
        name_prefix: &str,
        predicate: &Predicate,
        skip: i64,
        limit: i64,
    ) -> Result<Page<SavedQuery>> {
        let request = ListRequest::owned_by(owner)
            .name_prefix(name_prefix)
            .predicate(predicate.clone())
            .page(skip, limit);
        self.list_matching(&request).await
    }

    pub async fn list_matching(&self, request: &ListRequest) -> Result<Page<SavedQuery>> {
        if request.skip < 0 {
            return Err(ValidationError::Negative {
                name: "skip",
                value: request.skip,
            }
            .into());
        }
        let limit = match request.limit {
            Some(limit) if limit < 0 => {
                return Err(ValidationError::Negative {
                    name: "limit",
                    value: limit,
                }
                .into());
            }
            Some(limit) => limit.min(self.listing.max_limit),
            None => self.listing.default_limit,
        };

        with_deadline(self.timeout, self.fetch_page(request, limit)).await
    }

    async fn insert(
        &self,
        owner: Uuid,
        name: &str,
        description: &str,
        query: &str,
    ) -> Result<SavedQuery> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO saved_queries (user_id, name, query, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(owner.to_string())
        .bind(name)
        .bind(query)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::from_write(e, || {
                format!("saved query {:?} already exists for user {}", name, owner)
            })
        })?;

        let id = result.last_insert_rowid();
        info!("Created saved query {} for user {}", id, owner);

        Ok(SavedQuery {
            id,
            user_id: owner,
            name: name.to_string(),
            query: query.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn fetch(&self, id: i64) -> Result<SavedQuery> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM saved_queries WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(row_to_saved_query(&r)?),
            None => Err(StoreError::not_found("saved query", id)),
        }
    }

    async fn apply_update(
        &self,
        id: i64,
        name: Option<&str>,
        update: &SavedQueryUpdate,
    ) -> Result<SavedQuery> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM saved_queries WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("saved query", id))?;
        let current = row_to_saved_query(&row)?;

        let updated = SavedQuery {
            name: name.map(str::to_string).unwrap_or_else(|| current.name.clone()),
            query: update
                .query
                .clone()
                .unwrap_or_else(|| current.query.clone()),
            description: update
                .description
                .clone()
                .unwrap_or_else(|| current.description.clone()),
            updated_at: chrono::Utc::now().timestamp(),
            ..current
        };

        sqlx::query(
            r#"
            UPDATE saved_queries SET name = ?, query = ?, description = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&updated.name)
        .bind(&updated.query)
        .bind(&updated.description)
        .bind(updated.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            StoreError::from_write(e, || {
                format!(
                    "saved query {:?} already exists for user {}",
                    updated.name, updated.user_id
                )
            })
        })?;

        tx.commit().await?;
        info!("Updated saved query {}", id);
        Ok(updated)
    }

    async fn delete_cascade(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let grants = sqlx::query("DELETE FROM saved_queries_permissions WHERE query_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM saved_queries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::not_found("saved query", id));
        }

        tx.commit().await?;
        info!("Deleted saved query {} and {} grant(s)", id, grants);
        Ok(())
    }

    async fn fetch_page(&self, request: &ListRequest, limit: i64) -> Result<Page<SavedQuery>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut binds: Vec<FilterValue> = Vec::new();

        match request.scope {
            ListScope::Owned(owner) => {
                conditions.push("user_id = ?".to_string());
                binds.push(FilterValue::Text(owner.to_string()));
            }
            ListScope::OwnedOrSharedWith(user) => {
                conditions.push(
                    "(user_id = ? OR EXISTS (SELECT 1 FROM saved_queries_permissions p WHERE p.query_id = saved_queries.id AND p.shared_to_user_id = ?))"
                        .to_string(),
                );
                binds.push(FilterValue::Text(user.to_string()));
                binds.push(FilterValue::Text(user.to_string()));
            }
            ListScope::All => {}
        }

        if !request.name_prefix.is_empty() {
            // Exact, case-sensitive prefix; LIKE would fold ASCII case
            conditions.push("substr(name, 1, length(?)) = ?".to_string());
            binds.push(FilterValue::Text(request.name_prefix.clone()));
            binds.push(FilterValue::Text(request.name_prefix.clone()));
        }

        if let Some(clause) = request.predicate.clause() {
            conditions.push(format!("({})", clause));
            binds.extend(request.predicate.params().iter().cloned());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count and page from the same snapshot
        let mut tx = self.pool.begin().await?;

        let count_sql = format!(
            "SELECT COUNT(*) as total FROM saved_queries {}",
            where_clause
        );
        let mut count_query = sqlx::query(&count_sql);
        for value in &binds {
            count_query = value.bind(count_query);
        }
        let total: i64 = count_query.fetch_one(&mut *tx).await?.try_get("total")?;

        let items = if limit == 0 {
            Vec::new()
        } else {
            let page_sql = format!(
                "SELECT {} FROM saved_queries {} ORDER BY {} LIMIT ? OFFSET ?",
                SELECT_COLUMNS,
                where_clause,
                request.sort.order_by()
            );
            let mut page_query = sqlx::query(&page_sql);
            for value in &binds {
                page_query = value.bind(page_query);
            }
            let rows = page_query
                .bind(limit)
                .bind(request.skip)
                .fetch_all(&mut *tx)
                .await?;
            rows.iter()
                .map(row_to_saved_query)
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        tx.commit().await?;
        debug!(
            "Listed {} of {} saved queries (skip={}, limit={})",
            items.len(),
            total,
            request.skip,
            limit
        );

        Ok(Page {
            items,
            total,
            skip: request.skip,
            limit,
        })
    }
}

fn validate_name(name: &str) -> std::result::Result<&str, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("name"));
    }
    Ok(trimmed)
}

fn row_to_saved_query(r: &SqliteRow) -> std::result::Result<SavedQuery, sqlx::Error> {
    Ok(SavedQuery {
        id: r.try_get("id")?,
        user_id: parse_uuid(r.try_get::<&str, _>("user_id")?)?,
        name: r.try_get("name")?,
        query: r.try_get("query")?,
        description: r.try_get("description")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}
