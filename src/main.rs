//! Identity Mapping administrative CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and a default config
//! identity-mapping init
//!
//! # Row counts per kind
//! identity-mapping stats
//!
//! # Look a mapping up from either side
//! identity-mapping lookup --kind case-note --local 12345
//! identity-mapping lookup --kind alert --remote 5b0c...
//!
//! # Inspect a migration run
//! identity-mapping batch --kind case-note --label 2024-05-01T09:00:00 --page 0 --size 50
//! identity-mapping owners --kind case-note --label 2024-05-01T09:00:00 --approximate
//! identity-mapping latest --kind alert
//!
//! # Non-production only, needs allow_reset = true in config
//! identity-mapping reset --confirm
//! ```
//!
//! Every command prints JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use identity_mapping::db::MappingDb;
use identity_mapping::mapping::{BookingSequence, EntityKind, KeyShape, LocalKey, MappingRecord};
use identity_mapping::services::{spawn_logging_listener, PageRequest, Services};
use identity_mapping::store::{FamilyStore, MappingStore, RelationStore};
use identity_mapping::{Config, MappingError};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "identity-mapping")]
#[command(about = "Legacy/modern identity mapping store")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "IDENTITY_MAPPING_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "IDENTITY_MAPPING_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Database file name inside the storage directory
    #[arg(long)]
    database_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema and write a default config
    Init,
    /// Row counts per entity kind
    Stats,
    /// Find one mapping by its local or remote key
    Lookup {
        #[arg(long)]
        kind: EntityKind,
        /// Legacy key in text form, e.g. `12345` or `100:2`
        #[arg(long, conflicts_with = "remote", required_unless_present = "remote")]
        local: Option<String>,
        #[arg(long)]
        remote: Option<String>,
    },
    /// Page through the rows of one migration batch
    Batch {
        #[arg(long)]
        kind: EntityKind,
        #[arg(long)]
        label: String,
        #[arg(long, default_value_t = 0)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        size: i64,
    },
    /// Per-owner counts for one migration batch
    Owners {
        #[arg(long)]
        kind: EntityKind,
        #[arg(long)]
        label: String,
        #[arg(long, default_value_t = 0)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        size: i64,
        /// Estimate from the row count instead of grouping
        #[arg(long)]
        approximate: bool,
    },
    /// Most recent migrated mapping of a kind
    Latest {
        #[arg(long)]
        kind: EntityKind,
    },
    /// Delete every mapping
    Reset {
        #[arg(long)]
        confirm: bool,
    },
}

/// Bind `$store` to the store for `$kind` and evaluate `$body` with it
macro_rules! with_store {
    ($kind:expr, $store:ident => $body:expr) => {
        match $kind.key_shape() {
            KeyShape::Simple => {
                let $store = FamilyStore::<i64>::new($kind)?;
                $body
            }
            KeyShape::BookingSequence => {
                let $store = FamilyStore::<BookingSequence>::new($kind)?;
                $body
            }
            KeyShape::RelationSlot => {
                let $store = RelationStore;
                $body
            }
        }
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("identity_mapping=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(file) = args.database_file {
        config.database_file = file;
    }
    config.validate()?;

    let db = Arc::new(MappingDb::open(&config)?);
    let services = Services::new(db.clone(), &config)?;
    let _listener = spawn_logging_listener(services.events.clone());

    let output = match args.command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }
            json!({
                "database": config.database_path(),
                "config": config_path,
            })
        }
        Command::Stats => serde_json::to_value(db.stats()?)?,
        Command::Lookup { kind, local, remote } => with_store!(kind, store => {
            let found = lookup(&db, &store, local.as_deref(), remote.as_deref())?;
            serde_json::to_value(found)?
        }),
        Command::Batch {
            kind,
            label,
            page,
            size,
        } => with_store!(kind, store => {
            serde_json::to_value(services.migration.page_by_batch(&store, &label, PageRequest::new(page, size))?)?
        }),
        Command::Owners {
            kind,
            label,
            page,
            size,
            approximate,
        } => {
            if approximate {
                with_store!(kind, store => {
                    json!({
                        "kind": kind,
                        "batchLabel": label,
                        "approximateOwners": services.migration.approximate_owner_count(&store, &label)?,
                    })
                })
            } else {
                serde_json::to_value(services.migration.owner_summary(kind, &label, PageRequest::new(page, size))?)?
            }
        }
        Command::Latest { kind } => with_store!(kind, store => {
            serde_json::to_value(services.migration.latest_migrated(&store)?)?
        }),
        Command::Reset { confirm } => {
            if !confirm {
                bail!("reset deletes every mapping; pass --confirm to proceed");
            }
            json!({ "deleted": services.reset_all()? })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn lookup<S: MappingStore>(
    db: &MappingDb,
    store: &S,
    local: Option<&str>,
    remote: Option<&str>,
) -> Result<S::Record, MappingError> {
    let found = db.with_conn(|conn| match (local, remote) {
        (Some(local), _) => {
            let key = <<S::Record as MappingRecord>::Local as LocalKey>::decode(local)
                .map_err(|e| MappingError::validation(e.to_string()))?;
            store.find_by_local_key(conn, &key)
        }
        (None, Some(remote)) => store.find_by_remote_key(conn, remote),
        (None, None) => Err(MappingError::validation("either --local or --remote is required")),
    })?;
    found.ok_or_else(|| MappingError::not_found(format!("{} {}", store.kind(), local.or(remote).unwrap_or_default())))
}
