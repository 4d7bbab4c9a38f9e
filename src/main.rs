use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use newswire::config::Config;
use newswire::feed::build_client;
use newswire::ingest::{register_outlet, Ingestor, Scheduler};
use newswire::storage::{ArticleFilter, AuthorFilter, Database};

/// Get the config directory path (~/.config/newswire/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newswire"))
}

#[derive(Parser, Debug)]
#[command(name = "newswire", about = "Polls news outlet RSS feeds into SQLite")]
struct Args {
    /// Config file (default: ~/.config/newswire/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides `database_path` from the config file
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every outlet on the configured interval until interrupted
    Run,
    /// Run a single ingestion pass and print its summary
    Once,
    /// Register an outlet by its RSS feed URL
    AddOutlet {
        #[arg(value_name = "RSS_URL")]
        rss_url: String,
    },
    /// List outlets ordered by name
    Outlets {
        #[arg(long, conflicts_with = "rss_url")]
        id: Option<i64>,
        /// Show the outlet registered for this feed URL
        #[arg(long, value_name = "RSS_URL")]
        rss_url: Option<String>,
    },
    /// List authors ordered by name
    Authors {
        #[arg(long, conflicts_with_all = ["outlet", "name"])]
        id: Option<i64>,
        #[arg(long, value_name = "OUTLET_ID")]
        outlet: Option<i64>,
        /// Case-insensitive substring of the author name
        #[arg(long)]
        name: Option<String>,
    },
    /// List articles, newest first
    Articles {
        #[arg(long, conflicts_with_all = ["outlet", "tag", "search", "limit"])]
        id: Option<i64>,
        #[arg(long, value_name = "OUTLET_ID")]
        outlet: Option<i64>,
        /// Only articles carrying this exact tag term
        #[arg(long)]
        tag: Option<String>,
        /// Case-insensitive match on title, summary, content, tags and authors
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// List tags ordered by term
    Tags,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));

    // The log level comes from the config, so loading it logs warnings only
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || Config::load(&config_path))
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => {
            let configured = PathBuf::from(&config.database_path);
            if configured.is_absolute() {
                configured
            } else {
                if !config_dir.exists() {
                    std::fs::create_dir_all(&config_dir)
                        .context("Failed to create config directory")?;
                }
                config_dir.join(configured)
            }
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = Database::open(db_path_str)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    match args.command {
        Command::Run => {
            let ingestor = ingestor(db, &config)?;
            let scheduler =
                Scheduler::new(ingestor, config.poll).context("Invalid poll interval")?;

            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_on_signal(cancel.clone()));
            scheduler.run(cancel).await;
        }
        Command::Once => {
            let ingestor = ingestor(db, &config)?;
            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_on_signal(cancel.clone()));
            let summary = ingestor.run_once(&cancel).await?;
            print_json(&summary)?;
        }
        Command::AddOutlet { rss_url } => {
            let client = build_client(&config.fetch).context("Failed to build HTTP client")?;
            let outlet = register_outlet(&db, &client, &config.fetch, &rss_url)
                .await
                .with_context(|| format!("Failed to register {}", rss_url))?;
            print_json(&outlet)?;
        }
        Command::Outlets {
            id: Some(id),
            rss_url: _,
        } => {
            let outlet = db
                .get_outlet(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No outlet with id {}", id))?;
            print_json(&outlet)?;
        }
        Command::Outlets {
            id: None,
            rss_url: Some(rss_url),
        } => {
            let outlet = db
                .find_outlet_by_feed_url(&rss_url)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No outlet registered for {}", rss_url))?;
            print_json(&outlet)?;
        }
        Command::Outlets {
            id: None,
            rss_url: None,
        } => {
            print_json(&db.list_outlets().await?)?;
        }
        Command::Authors { id: Some(id), .. } => {
            let author = db
                .get_author(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No author with id {}", id))?;
            print_json(&author)?;
        }
        Command::Authors {
            id: None,
            outlet,
            name,
        } => {
            let filter = AuthorFilter {
                outlet_id: outlet,
                name_contains: name,
            };
            print_json(&db.list_authors(&filter).await?)?;
        }
        Command::Articles { id: Some(id), .. } => {
            let article = db
                .get_article(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No article with id {}", id))?;
            print_json(&article)?;
        }
        Command::Articles {
            id: None,
            outlet,
            tag,
            search,
            limit,
        } => {
            let filter = ArticleFilter {
                outlet_id: outlet,
                tag,
                search,
                limit,
            };
            print_json(&db.list_articles(&filter).await?)?;
        }
        Command::Tags => {
            print_json(&db.list_tags().await?)?;
        }
    }

    Ok(())
}

fn ingestor(db: Database, config: &Config) -> Result<Ingestor> {
    let client = build_client(&config.fetch).context("Failed to build HTTP client")?;
    Ok(Ingestor::new(db, client, config.fetch.clone()).with_concurrency(config.concurrency))
}

/// Cancel on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested, finishing in-flight outlets");
    cancel.cancel();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}
