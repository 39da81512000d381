//! # Saved Queries
//!
//! Owned, shareable saved queries persisted in SQLite, with a type-checked
//! filter compiler and paginated listing.
//!
//! ## Overview
//!
//! - [`FilterMap`] collects declarative `field / operator / value` conditions
//!   and compiles them into a parameterized [`Predicate`]. Column names come
//!   from a static registry and values are always bound, never interpolated.
//! - [`SavedQueryStore`] creates, reads, updates, deletes and lists saved
//!   queries. Every listing returns a [`Page`] whose `total` counts all
//!   matches, independent of `skip`/`limit`.
//! - [`SharingLedger`] grants, revokes and checks per-user access.
//! - [`UserDirectory`] holds the users grants point at.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use saved_queries::{Database, FilterMap, FilterOperator, FilterSpec, StoreConfig, ValueKind};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = StoreConfig::load(std::path::Path::new("./data"))?;
//! let db = Database::connect(&config).await?;
//!
//! let owner = uuid::Uuid::new_v4();
//! let store = db.saved_queries();
//! store.create(owner, "admins", "Domain admins", "MATCH (n:Group) RETURN n").await?;
//!
//! let predicate = FilterMap::new()
//!     .with(FilterSpec::new("name", FilterOperator::Contains, "adm", ValueKind::String)?)
//!     .compile()?;
//! let page = store.list(owner, "", &predicate, 0, 10).await?;
//! println!("{} of {} queries", page.items.len(), page.total);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod models;
pub mod repository;
pub mod sort;

pub use config::{ListingConfig, StoreConfig};
pub use db::{Database, DbStats};
pub use error::{Result, StoreError, ValidationError};
pub use filter::{FilterMap, FilterOperator, FilterSpec, Predicate, ValueKind};
pub use models::{Grant, Page, SavedQuery, SavedQueryUpdate, User};
pub use repository::{ListRequest, ListScope, SavedQueryStore, SharingLedger, UserDirectory};
pub use sort::{SortItem, SortList};
