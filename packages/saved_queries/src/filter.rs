//! Declarative filters and their compilation into a bound SQL predicate.
//!
//! A [`FilterMap`] collects [`FilterSpec`]s keyed by field name. Compiling it
//! checks every spec against a column registry and produces a [`Predicate`]:
//! SQL text with `?` placeholders plus the typed values to bind. Column names in
//! the SQL always come from the registry, never from caller input, and literal
//! values only ever reach SQLite as bound parameters.
//!
//! ```ignore
//! let mut filters = FilterMap::new();
//! filters.push(FilterSpec::new("id", FilterOperator::GreaterThan, "4", ValueKind::Numeric)?);
//! let predicate = filters.compile()?;
//! let page = store.list(owner, "", &predicate, 0, 10).await?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use tracing::debug;

use crate::error::ValidationError;
use crate::models::SAVED_QUERY_COLUMNS;

/// Query-string keys that carry paging or ordering rather than a filter.
pub const RESERVED_PARAMS: &[&str] = &["skip", "limit", "sort_by", "prefix"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    /// Substring match; string data only.
    Contains,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 7] = [
        Self::Equals,
        Self::NotEquals,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterThanOrEquals,
        Self::LessThanOrEquals,
        Self::Contains,
    ];

    /// Token used in `field=op:value` query parameters.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::NotEquals => "neq",
            Self::GreaterThan => "gt",
            Self::LessThan => "lt",
            Self::GreaterThanOrEquals => "gte",
            Self::LessThanOrEquals => "lte",
            Self::Contains => "~eq",
        }
    }

    pub fn supports(&self, kind: ValueKind) -> bool {
        match self {
            Self::Contains => kind == ValueKind::String,
            _ => true,
        }
    }

    fn sql_operator(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "<>",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterThanOrEquals => ">=",
            Self::LessThanOrEquals => "<=",
            Self::Contains => "LIKE",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for FilterOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.token() == s)
            .ok_or_else(|| ValidationError::UnknownOperator(s.to_string()))
    }
}

/// How a filter value is compared: as text or as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Numeric,
}

impl ValueKind {
    pub fn from_is_string(is_string_data: bool) -> Self {
        if is_string_data {
            Self::String
        } else {
            Self::Numeric
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Numeric => "numeric",
        }
    }
}

/// A listable column of a table, as seen by the filter compiler and sorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ValueKind,
    pub filterable: bool,
    pub sortable: bool,
}

pub(crate) fn find_column<'a>(columns: &'a [Column], name: &str) -> Option<&'a Column> {
    columns.iter().find(|c| c.name == name)
}

/// A single filter condition.
///
/// Construction rejects operators that cannot apply to the declared value
/// kind, so an invalid pairing never makes it as far as compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    field: String,
    operator: FilterOperator,
    value: String,
    kind: ValueKind,
}

impl FilterSpec {
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<String>,
        kind: ValueKind,
    ) -> Result<Self, ValidationError> {
        let field = field.into();
        if field.is_empty() {
            return Err(ValidationError::Empty("filter field"));
        }
        if !operator.supports(kind) {
            return Err(ValidationError::OperatorNotSupported {
                field,
                operator,
                kind: kind.label(),
            });
        }
        Ok(Self {
            field,
            operator,
            value: value.into(),
            kind,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

/// Field name → the specs applied to that field, in insertion order.
///
/// Specs on one field are ANDed together, and the per-field predicates are
/// ANDed again. An empty map matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterMap {
    fields: BTreeMap<String, Vec<FilterSpec>>,
}

impl FilterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spec: FilterSpec) -> &mut Self {
        self.fields
            .entry(spec.field.clone())
            .or_default()
            .push(spec);
        self
    }

    pub fn with(mut self, spec: FilterSpec) -> Self {
        self.push(spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }

    pub fn get(&self, field: &str) -> Option<&[FilterSpec]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Parses `field=op:value` pairs (e.g. `id=gt:4`, `name=~eq:admin`) from a
    /// query string. The value kind of each spec comes from the column
    /// registry; reserved paging keys are skipped.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::from_query_pairs_for(SAVED_QUERY_COLUMNS, pairs)
    }

    pub fn from_query_pairs_for<I, K, V>(
        columns: &[Column],
        pairs: I,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = Self::new();
        for (key, raw) in pairs {
            let field = key.as_ref();
            if RESERVED_PARAMS.contains(&field) {
                continue;
            }
            let column =
                find_column(columns, field).ok_or_else(|| ValidationError::UnknownField {
                    field: field.to_string(),
                })?;
            let (op, value) =
                raw.as_ref()
                    .split_once(':')
                    .ok_or_else(|| ValidationError::MalformedFilter {
                        field: field.to_string(),
                        reason: "expected operator:value".to_string(),
                    })?;
            let operator = op.parse::<FilterOperator>()?;
            map.push(FilterSpec::new(field, operator, value, column.kind)?);
        }
        Ok(map)
    }

    /// Compiles against the saved-query columns.
    pub fn compile(&self) -> Result<Predicate, ValidationError> {
        self.compile_for(SAVED_QUERY_COLUMNS)
    }

    /// Validates every spec against `columns` and builds one conjunctive
    /// predicate. Fails on the first bad spec; no partial predicate escapes.
    pub fn compile_for(&self, columns: &[Column]) -> Result<Predicate, ValidationError> {
        let mut clauses = Vec::with_capacity(self.fields.len());
        let mut params = Vec::with_capacity(self.len());

        for (field, specs) in &self.fields {
            let column =
                find_column(columns, field).ok_or_else(|| ValidationError::UnknownField {
                    field: field.clone(),
                })?;
            if !column.filterable {
                return Err(ValidationError::NotFilterable {
                    field: field.clone(),
                });
            }

            let mut field_clauses = Vec::with_capacity(specs.len());
            for spec in specs {
                if spec.kind != column.kind {
                    return Err(ValidationError::KindMismatch {
                        field: field.clone(),
                        expected: column.kind.label(),
                        declared: spec.kind.label(),
                    });
                }
                if !spec.operator.supports(column.kind) {
                    return Err(ValidationError::OperatorNotSupported {
                        field: field.clone(),
                        operator: spec.operator,
                        kind: column.kind.label(),
                    });
                }

                let value = match column.kind {
                    ValueKind::Numeric => FilterValue::Integer(spec.value.trim().parse().map_err(
                        |_| ValidationError::InvalidNumber {
                            field: field.clone(),
                            value: spec.value.clone(),
                        },
                    )?),
                    ValueKind::String if spec.operator == FilterOperator::Contains => {
                        FilterValue::Text(format!("%{}%", escape_like(&spec.value)))
                    }
                    ValueKind::String => FilterValue::Text(spec.value.clone()),
                };

                let clause = if spec.operator == FilterOperator::Contains {
                    format!("{} LIKE ? ESCAPE '\\'", column.name)
                } else {
                    format!("{} {} ?", column.name, spec.operator.sql_operator())
                };
                field_clauses.push(clause);
                params.push(value);
            }
            clauses.push(format!("({})", field_clauses.join(" AND ")));
        }

        let predicate = Predicate {
            clause: clauses.join(" AND "),
            params,
        };
        debug!(
            "Compiled filter over {} field(s): {:?} with {} param(s)",
            self.fields.len(),
            predicate.clause,
            predicate.params.len()
        );
        Ok(predicate)
    }
}

/// A typed value bound into a compiled predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Integer(i64),
    Text(String),
}

impl FilterValue {
    pub(crate) fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            Self::Integer(v) => query.bind(*v),
            Self::Text(v) => query.bind(v.as_str()),
        }
    }
}

/// A compiled, storage-ready filter. Opaque outside the crate: build one with
/// [`FilterMap::compile`] or [`Predicate::match_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    clause: String,
    params: Vec<FilterValue>,
}

impl Predicate {
    pub fn match_all() -> Self {
        Self::default()
    }

    pub fn is_match_all(&self) -> bool {
        self.clause.is_empty()
    }

    pub(crate) fn clause(&self) -> Option<&str> {
        (!self.clause.is_empty()).then_some(self.clause.as_str())
    }

    pub(crate) fn params(&self) -> &[FilterValue] {
        &self.params
    }
}

/// Escapes LIKE wildcards so user text matches literally under `ESCAPE '\'`.
pub(crate) fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
