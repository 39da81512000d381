//! Validated `ORDER BY` lists for listings.

use crate::error::ValidationError;
use crate::filter::{Column, find_column};
use crate::models::SAVED_QUERY_COLUMNS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortItem {
    column: &'static str,
    descending: bool,
}

impl SortItem {
    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }
}

/// Ordering for a listing. Always ends with `id ASC` so ties resolve the same
/// way on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortList {
    items: Vec<SortItem>,
}

impl SortList {
    /// Parses a comma-separated list like `-created_at,name` against the
    /// saved-query columns. A leading `-` sorts descending.
    pub fn parse(spec: &str) -> Result<Self, ValidationError> {
        Self::parse_for(SAVED_QUERY_COLUMNS, spec)
    }

    pub fn parse_for(columns: &[Column], spec: &str) -> Result<Self, ValidationError> {
        let mut items = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, descending) = match part.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (part, false),
            };
            let column = find_column(columns, name).ok_or_else(|| {
                ValidationError::UnknownField {
                    field: name.to_string(),
                }
            })?;
            if !column.sortable {
                return Err(ValidationError::NotSortable {
                    field: name.to_string(),
                });
            }
            items.push(SortItem {
                column: column.name,
                descending,
            });
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[SortItem] {
        &self.items
    }

    pub(crate) fn order_by(&self) -> String {
        let mut parts: Vec<String> = self
            .items
            .iter()
            .map(|item| {
                format!(
                    "{} {}",
                    item.column,
                    if item.descending { "DESC" } else { "ASC" }
                )
            })
            .collect();
        if !self.items.iter().any(|item| item.column == "id") {
            parts.push("id ASC".to_string());
        }
        parts.join(", ")
    }
}
