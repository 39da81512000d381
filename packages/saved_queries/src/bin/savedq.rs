use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use saved_queries::{
    Database, FilterMap, ListRequest, ListScope, Page, SavedQuery, SortList, StoreConfig,
};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "savedq")]
#[command(version)]
#[command(about = "Manage saved queries and their sharing grants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding savedq.toml and the database
    #[arg(long, global = true, default_value = ".savedq")]
    data_dir: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScopeArg {
    /// Only queries the user owns
    Owned,
    /// Owned queries plus those shared to the user
    Shared,
    /// Every query (ignores --user)
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// Show row counts
    Stats,

    /// Create a saved query
    Create {
        /// Owner user id
        #[arg(long)]
        owner: Uuid,

        /// Query name, unique per owner
        name: String,

        /// Query payload
        query: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Show a saved query
    Get { id: i64 },

    /// List saved queries
    List {
        /// User whose queries to list; required unless the scope is `all`
        #[arg(long)]
        user: Option<Uuid>,

        #[arg(long, value_enum, default_value = "owned")]
        scope: ScopeArg,

        /// Shorthand for --scope all
        #[arg(long)]
        scope_all: bool,

        /// Literal, case-sensitive name prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Filter as field=op:value, e.g. id=gt:4 or name=~eq:admin (repeatable)
        #[arg(long = "filter", value_parser = parse_filter_arg)]
        filters: Vec<(String, String)>,

        /// Comma-separated sort columns, `-` prefix for descending
        #[arg(long, default_value = "")]
        sort: String,

        #[arg(long, default_value = "0")]
        skip: i64,

        /// Page size (defaults to the configured default)
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Delete a saved query and its grants
    Delete { id: i64 },

    /// Register a user that queries can be shared to
    AddUser { principal_name: String },

    /// Share a query with one or more users
    Grant {
        query_id: i64,
        #[arg(required = true)]
        users: Vec<Uuid>,
    },

    /// Remove a user's access to a query
    Revoke { query_id: i64, user: Uuid },

    /// Check whether a query is shared with a user
    IsShared { query_id: i64, user: Uuid },
}

fn parse_filter_arg(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(field, rest)| (field.to_string(), rest.to_string()))
        .ok_or_else(|| format!("expected field=op:value, got {:?}", raw))
}

fn resolve_scope(scope_all: bool, scope: ScopeArg, user: Option<Uuid>) -> Result<ListScope> {
    Ok(match (scope_all, scope, user) {
        (true, _, _) | (false, ScopeArg::All, _) => ListScope::All,
        (false, ScopeArg::Owned, Some(user)) => ListScope::Owned(user),
        (false, ScopeArg::Shared, Some(user)) => ListScope::OwnedOrSharedWith(user),
        (false, _, None) => anyhow::bail!("--user is required for this scope"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "saved_queries=debug,savedq=debug,info"
    } else {
        "saved_queries=info,savedq=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = StoreConfig::load(&cli.data_dir)?;
    let db = Database::connect(&config).await?;

    let outcome = run(&cli, &db).await;
    db.close().await;
    outcome
}

async fn run(cli: &Cli, db: &Database) -> Result<()> {
    match &cli.command {
        Commands::Stats => {
            let stats = db.stats().await?;
            if matches!(cli.format, OutputFormat::Json) {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Saved queries: {}", stats.saved_queries);
                println!("Grants:        {}", stats.grants);
                println!("Users:         {}", stats.users);
            }
        }
        Commands::Create {
            owner,
            name,
            query,
            description,
        } => {
            let created = db
                .saved_queries()
                .create(*owner, name, description, query)
                .await?;
            print_query(&created, cli.format)?;
        }
        Commands::Get { id } => {
            let query = db.saved_queries().get(*id).await?;
            print_query(&query, cli.format)?;
        }
        Commands::List {
            user,
            scope,
            scope_all,
            prefix,
            filters,
            sort,
            skip,
            limit,
        } => {
            let scope = resolve_scope(*scope_all, *scope, *user)?;
            let predicate = FilterMap::from_query_pairs(filters.iter().cloned())?.compile()?;
            let mut request = ListRequest::new(scope)
                .name_prefix(prefix.as_str())
                .predicate(predicate)
                .sort(SortList::parse(sort)?);
            request.skip = *skip;
            request.limit = *limit;

            let page = db.saved_queries().list_matching(&request).await?;
            print_page(&page, cli.format)?;
        }
        Commands::Delete { id } => {
            db.saved_queries().delete(*id).await?;
            info!("Deleted saved query {}", id);
        }
        Commands::AddUser { principal_name } => {
            let user = db.users().create(principal_name).await?;
            if matches!(cli.format, OutputFormat::Json) {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                println!("{}\t{}", user.id, user.principal_name);
            }
        }
        Commands::Grant { query_id, users } => {
            let grants = db
                .sharing()
                .grant_many(*query_id, users)
                .await
                .with_context(|| format!("Failed to share saved query {}", query_id))?;
            if matches!(cli.format, OutputFormat::Json) {
                println!("{}", serde_json::to_string_pretty(&grants)?);
            } else {
                for grant in grants {
                    println!("{} -> {}", grant.query_id, grant.user_id);
                }
            }
        }
        Commands::Revoke { query_id, user } => {
            db.sharing().revoke(*query_id, *user).await?;
        }
        Commands::IsShared { query_id, user } => {
            let shared = db.sharing().is_shared(*query_id, *user).await?;
            if matches!(cli.format, OutputFormat::Json) {
                println!("{}", serde_json::json!({ "shared": shared }));
            } else {
                println!("{}", shared);
            }
        }
    }

    Ok(())
}

fn print_query(query: &SavedQuery, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(query)?),
        OutputFormat::Text => {
            println!("#{} {}", query.id, query.name);
            println!("  Owner:   {}", query.user_id);
            if !query.description.is_empty() {
                println!("  About:   {}", query.description);
            }
            println!("  Updated: {}", format_timestamp(query.updated_at));
            println!("  Query:   {}", query.query);
        }
    }
    Ok(())
}

fn print_page(page: &Page<SavedQuery>, format: OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(page)?);
        return Ok(());
    }

    for query in &page.items {
        println!("{:>6}  {:<32}  {}", query.id, query.name, query.user_id);
    }
    println!(
        "-- showing {} of {} (skip {}, limit {})",
        page.items.len(),
        page.total,
        page.skip,
        page.limit
    );
    Ok(())
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
