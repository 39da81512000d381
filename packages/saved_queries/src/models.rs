use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::{Column, ValueKind};

/// Columns of `saved_queries` that filters and sorts may reference.
pub const SAVED_QUERY_COLUMNS: &[Column] = &[
    Column {
        name: "id",
        kind: ValueKind::Numeric,
        filterable: true,
        sortable: true,
    },
    Column {
        name: "user_id",
        kind: ValueKind::String,
        filterable: true,
        sortable: false,
    },
    Column {
        name: "name",
        kind: ValueKind::String,
        filterable: true,
        sortable: true,
    },
    Column {
        name: "query",
        kind: ValueKind::String,
        filterable: true,
        sortable: false,
    },
    Column {
        name: "description",
        kind: ValueKind::String,
        filterable: true,
        sortable: true,
    },
    Column {
        name: "created_at",
        kind: ValueKind::Numeric,
        filterable: true,
        sortable: true,
    },
    Column {
        name: "updated_at",
        kind: ValueKind::Numeric,
        filterable: true,
        sortable: true,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: i64,
    /// Owner; fixed at creation.
    pub user_id: Uuid,
    pub name: String,
    pub query: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Partial update for a saved query. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedQueryUpdate {
    pub name: Option<String>,
    pub query: Option<String>,
    pub description: Option<String>,
}

/// Sharing edge: `user_id` may see `query_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub query_id: i64,
    pub user_id: Uuid,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub principal_name: String,
    pub created_at: i64,
}

/// One page of a listing. `total` counts every match, not just `items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.skip + (self.items.len() as i64) < self.total
    }
}
