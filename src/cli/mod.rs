pub mod history;
pub mod init;
pub mod load;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::db::StoreConfig;
use crate::settings::{shellexpand_path, ProductIdentity, Settings};

#[derive(Parser)]
#[command(name = "salesload", about = "Load point-of-sale transaction files into a normalized SQLite database.")]
pub struct Cli {
    /// Database file (default: from settings, ~/.local/share/salesload/salesload.db)
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Log level when RUST_LOG is not set: error, warn, info, debug, trace
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database schema.
    Init {
        /// Remember the database path in settings.json
        #[arg(long)]
        save: bool,
    },
    /// Load one or more CSV/XLSX files, in order.
    Load {
        /// Files to load
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// How products are matched against existing rows
        #[arg(long = "product-identity", value_enum)]
        product_identity: Option<ProductIdentity>,
        /// Fail a file when a foreign key cannot be resolved instead of storing NULL
        #[arg(long)]
        strict: bool,
        /// Exit successfully even when some files fail
        #[arg(long = "allow-failures")]
        allow_failures: bool,
    },
    /// Show row counts per table.
    Status,
    /// Show recently loaded files.
    History {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

pub(crate) fn store_config(db: Option<&str>, settings: &Settings) -> StoreConfig {
    StoreConfig::new(shellexpand_path(db.unwrap_or(settings.database.as_str())))
}
