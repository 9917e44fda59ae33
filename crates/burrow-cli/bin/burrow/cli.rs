use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;

pub const STORAGE_BACKEND_ENV: &str = "BURROW_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "BURROW_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "BURROW_DATABASE_DSN";
pub const DATABASE_MAX_CONNECTIONS_ENV: &str = "BURROW_DATABASE_MAX_CONNECTIONS";
pub const BASE_URL_ENV: &str = "BURROW_BASE_URL";
pub const LOG_FORMAT_ENV: &str = "BURROW_LOG_FORMAT";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "burrow", about = "Operate a burrow link store")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::File
    )]
    pub storage: StorageBackendArg,

    /// Journal file. The file backend keeps everything in memory without it.
    #[arg(long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    #[arg(long, env = DATABASE_MAX_CONNECTIONS_ENV, default_value_t = 5)]
    pub database_max_connections: u32,

    /// Prefix used when printing short urls.
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one url.
    Shorten {
        url: String,
        /// Owner of the new link. A fresh user is created when omitted.
        #[arg(long)]
        user: Option<Uuid>,
    },
    /// Shorten several urls in one batch.
    ShortenMany {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(long)]
        user: Option<Uuid>,
    },
    /// Print the url behind a short id.
    Resolve { short_id: String },
    /// List the links owned by a user.
    List {
        user: Uuid,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Soft-delete links owned by a user.
    Delete {
        #[arg(long)]
        user: Uuid,
        #[arg(required = true)]
        short_ids: Vec<String>,
    },
    /// Register a user.
    AddUser { user: Option<Uuid> },
    /// Check the database connection.
    Ping,
    /// Print record counts.
    Stats,
}
