use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// File config (figment-deserialized from defaults / savedq.toml / env vars)
// =============================================================================
//
//   savedq.toml:     [database]
//                    max_connections = 8
//
//   env var:         SAVEDQ_DATABASE__MAX_CONNECTIONS=8   (double underscore = nesting)

pub const CONFIG_FILE_NAME: &str = "savedq.toml";
pub const DB_FILE_NAME: &str = "saved_queries.db";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub database: DatabaseFileConfig,
    #[serde(default)]
    pub listing: ListingFileConfig,
    #[serde(default)]
    pub operations: OperationsFileConfig,
}

/// Lives under `[database]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseFileConfig {
    /// Overrides `<data_dir>/saved_queries.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseFileConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Lives under `[listing]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListingFileConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

impl Default for ListingFileConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

/// Lives under `[operations]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationsFileConfig {
    /// Per-operation deadline; 0 disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OperationsFileConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_limit() -> i64 {
    50
}
fn default_max_limit() -> i64 {
    1000
}
fn default_timeout_ms() -> u64 {
    30_000
}

/// Build a figment that layers: defaults → savedq.toml → SAVEDQ_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed("SAVEDQ_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ListingConfig {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self::from_file(&ListingFileConfig::default())
    }
}

impl ListingConfig {
    pub fn from_file(fc: &ListingFileConfig) -> Self {
        let max_limit = fc.max_limit.max(1);
        Self {
            default_limit: fc.default_limit.clamp(1, max_limit),
            max_limit,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub listing: ListingConfig,
    /// `None` disables the per-operation deadline.
    pub operation_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn from_file(data_dir: &Path, fc: &FileConfig) -> Self {
        let db_path = fc
            .database
            .path
            .clone()
            .unwrap_or_else(|| data_dir.join(DB_FILE_NAME));
        Self {
            db_path,
            max_connections: fc.database.max_connections.max(1),
            busy_timeout: Duration::from_millis(fc.database.busy_timeout_ms),
            listing: ListingConfig::from_file(&fc.listing),
            operation_timeout: match fc.operations.timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    /// Creates `data_dir` if needed and resolves the layered config inside it.
    pub fn load(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
        let fc: FileConfig = load_config(data_dir)
            .extract()
            .context("Failed to load configuration")?;
        info!("Data directory: {}", data_dir.display());
        Ok(Self::from_file(data_dir, &fc))
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert!(fc.database.path.is_none());
        assert_eq!(fc.database.max_connections, 5);
        assert_eq!(fc.database.busy_timeout_ms, 5000);
        assert_eq!(fc.listing.default_limit, 50);
        assert_eq!(fc.listing.max_limit, 1000);
        assert_eq!(fc.operations.timeout_ms, 30_000);
    }

    // ── StoreConfig::from_file ──────────────────────────────────────────

    #[test]
    fn test_store_config_default_paths() {
        let sc = StoreConfig::from_file(Path::new("/data"), &FileConfig::default());
        assert_eq!(sc.db_path, Path::new("/data/saved_queries.db"));
        assert_eq!(sc.operation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(sc.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let fc = FileConfig {
            operations: OperationsFileConfig { timeout_ms: 0 },
            ..Default::default()
        };
        let sc = StoreConfig::from_file(Path::new("/data"), &fc);
        assert!(sc.operation_timeout.is_none());
    }

    #[test]
    fn test_listing_limits_are_sane() {
        let lc = ListingConfig::from_file(&ListingFileConfig {
            default_limit: 5000,
            max_limit: 0,
        });
        assert_eq!(lc.max_limit, 1);
        assert_eq!(lc.default_limit, 1);
    }

    #[test]
    fn test_db_url() {
        let sc = StoreConfig::from_file(Path::new("/data"), &FileConfig::default());
        let url = sc.db_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("saved_queries.db"));
        assert!(url.ends_with("?mode=rwc"));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.database.max_connections, 5);
        assert_eq!(fc.listing.max_limit, 1000);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "[database]\npath = \"/tmp/other.db\"\nmax_connections = 2\n\n[listing]\nmax_limit = 20\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.database.path.as_deref(), Some(Path::new("/tmp/other.db")));
        assert_eq!(fc.database.max_connections, 2);
        assert_eq!(fc.listing.max_limit, 20);
        assert_eq!(fc.listing.default_limit, 50);
    }

    #[test]
    fn test_store_config_load_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let sc = StoreConfig::load(&dir).unwrap();
        assert!(dir.exists());
        assert_eq!(sc.db_path, dir.join(DB_FILE_NAME));
    }
}
