mod cli;

use crate::cli::{Command, LogFormat, CLI};
use anyhow::{bail, Context};
use clap::Parser;
use linkvault_generator::RandomGenerator;
use linkvault_storage::{Resolution, ShortenerService, Storage, StorageError, UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

type Service = ShortenerService<Storage, RandomGenerator>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    let storage = Storage::open(&config.storage_config())
        .await
        .context("failed to open storage")?;

    info!(
        engine = %storage.kind(),
        delete_batch_size = config.delete_batch_size,
        delete_idle_interval_ms = config.delete_idle_interval_ms,
        "starting linkvault"
    );

    let service = ShortenerService::new(
        storage,
        RandomGenerator::new(),
        config.coalescer_settings(),
    );
    let outcome = run(&service, config.command).await;

    // Pending deletions are flushed even when the command failed.
    service.shutdown().await;
    outcome
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(service: &Service, command: Command) -> anyhow::Result<()> {
    match command {
        Command::AllocateUser => {
            let user = service.allocate_user_id().await?;
            println!("{user}");
        }
        Command::Shorten { user, urls } => {
            let user = UserId::new(user);
            if let [url] = urls.as_slice() {
                match service.shorten(user, url).await {
                    Ok(short_id) => println!("{short_id}\t{url}"),
                    Err(StorageError::DuplicateUrl(existing)) => {
                        println!("{existing}\t{url}\t(already shortened)")
                    }
                    Err(err) => return Err(err.into()),
                }
            } else {
                for record in service.shorten_batch(user, &urls).await? {
                    println!("{}\t{}", record.short_id, record.long_url);
                }
            }
        }
        Command::Resolve { short_id } => match service.resolve(&short_id).await? {
            Resolution::Found(long_url) => println!("{long_url}"),
            Resolution::Gone => bail!("{short_id} has been deleted"),
            Resolution::NotFound => bail!("{short_id} not found"),
        },
        Command::List { user } => {
            for url in service.list(UserId::new(user)).await? {
                println!("{}\t{}", url.short_id, url.long_url);
            }
        }
        Command::Delete { user, short_ids } => {
            let queued = service.delete_user_urls(UserId::new(user), &short_ids).await?;
            info!(requested = short_ids.len(), queued, "deletions queued");
        }
        Command::Health => {
            service.health_check().await?;
            println!("ok");
        }
    }

    Ok(())
}
