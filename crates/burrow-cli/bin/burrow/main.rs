mod cli;

use crate::cli::{Command, LogFormat, StorageBackendArg, CLI};
use anyhow::{bail, Context};
use burrow_storage::{
    FileStorage, FileStorageSettings, PgStorage, PgStorageSettings, Repository, ShortId, Storage,
    StorageError, User,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_logging(config.log_format);

    info!(storage_backend = %config.storage, "opening storage");

    match config.storage {
        StorageBackendArg::File => {
            let settings = FileStorageSettings {
                path: config.file_storage_path,
                ..FileStorageSettings::builder().build()
            };
            let storage = FileStorage::open(settings)
                .await
                .context("failed to open file storage")?;
            run(Repository::new(storage), config.command, &config.base_url).await
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .context("database dsn is required when storage backend is postgres")?;
            let settings = PgStorageSettings::builder()
                .dsn(dsn)
                .max_connections(config.database_max_connections)
                .build();
            let storage = PgStorage::connect(settings)
                .await
                .context("failed to connect to postgres")?;
            run(Repository::new(storage), config.command, &config.base_url).await
        }
    }
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // logs go to stderr so command output stays clean
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Runs one command and closes the storage, draining queued deletions.
async fn run<S: Storage>(
    repo: Repository<S>,
    command: Command,
    base_url: &str,
) -> anyhow::Result<()> {
    let result = execute(&repo, command, base_url).await;
    let closed = repo.close().await;

    result?;
    closed.context("failed to close storage")?;
    Ok(())
}

async fn execute<S: Storage>(
    repo: &Repository<S>,
    command: Command,
    base_url: &str,
) -> anyhow::Result<()> {
    match command {
        Command::Shorten { url, user } => {
            let user = resolve_user(repo, user).await?;
            match repo.save_url(&url, user.id).await {
                Ok(short_id) => println!("{}", short_id.to_url(base_url)),
                Err(StorageError::Conflict { existing }) => {
                    warn!(short_id = %existing, "url was already shortened");
                    println!("{}", existing.to_url(base_url));
                }
                Err(err) => return Err(err.into()),
            }
            println!("user {}", user.id);
        }
        Command::ShortenMany { urls, user } => {
            let user = resolve_user(repo, user).await?;
            for record in repo.save_url_list(urls, user.id).await? {
                println!("{}\t{}", record.short_id.to_url(base_url), record.url);
            }
            println!("user {}", user.id);
        }
        Command::Resolve { short_id } => {
            let short_id = ShortId::new(short_id)?;
            match repo.get_url(&short_id).await? {
                Some(record) if record.is_deleted => bail!("{short_id} has been deleted"),
                Some(record) => println!("{}", record.url),
                None => bail!("{short_id} not found"),
            }
        }
        Command::List { user, limit } => {
            for record in repo.get_user_url_list(user, limit).await? {
                let status = if record.is_deleted { "deleted" } else { "active" };
                println!("{}\t{}\t{status}", record.short_id.to_url(base_url), record.url);
            }
        }
        Command::Delete { user, short_ids } => {
            let short_ids = short_ids
                .into_iter()
                .map(ShortId::new)
                .collect::<Result<Vec<_>, _>>()?;
            let count = short_ids.len();
            repo.delete_url_batch(user, short_ids).await?;
            println!("queued {count} deletions");
        }
        Command::AddUser { user } => {
            let user = resolve_user(repo, user).await?;
            println!("{}", user.id);
        }
        Command::Ping => {
            repo.ping().await?;
            println!("ok");
        }
        Command::Stats => {
            println!("urls\t{}", repo.url_count().await?);
            println!("users\t{}", repo.user_count().await?);
        }
    }

    Ok(())
}

/// Returns the given user, registering it if needed, or a fresh one.
async fn resolve_user<S: Storage>(
    repo: &Repository<S>,
    user: Option<Uuid>,
) -> anyhow::Result<User> {
    let user = match user {
        Some(id) => repo.add_user(User::from(id)).await?,
        None => repo.new_user().await?,
    };
    Ok(user)
}
