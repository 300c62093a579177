use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use gator::config::Config;
use gator::feed::Fetcher;
use gator::ingest::{fetch_one, run_aggregation};
use gator::scheduler::{FeedStore, ItemSink, Scheduler};
use gator::storage::{Database, StoreError, User};
use gator::util::{truncate_chars, validate_url};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Get the config directory path (~/.config/gator/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gator"))
}

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "RSS feed aggregator")]
struct Args {
    /// Config file [default: ~/.config/gator/config.toml]
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch to an existing user
    Login { name: String },
    /// List users
    Users,
    /// Delete every user along with their feeds, follows and posts
    Reset,
    /// Add a feed and follow it
    Addfeed { name: String, url: String },
    /// List all feeds
    Feeds,
    /// Follow an existing feed by URL
    Follow { url: String },
    /// Stop following a feed
    Unfollow { url: String },
    /// List the feeds you follow
    Following,
    /// Fetch followed feeds on an interval and store their posts
    Agg {
        /// Seconds between ticks
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
        /// Maximum concurrent fetches
        #[arg(long)]
        workers: Option<usize>,
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
    /// Fetch one feed URL and print it without storing anything
    Fetch {
        url: String,
        /// Print the channel as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the latest posts from the feeds you follow
    Browse {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

struct Session {
    db: Database,
    config: Config,
    config_path: PathBuf,
}

impl Session {
    async fn current_user(&self) -> Result<User> {
        let Some(name) = self.config.current_user_name.as_deref() else {
            bail!("No user logged in. Run `gator register <name>` or `gator login <name>` first");
        };
        match self.db.get_user(name).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound(_)) => {
                bail!("Current user '{name}' no longer exists. Log in as another user")
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (config_dir, config_path) = match args.config {
        Some(path) => {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (dir, path)
        }
        None => {
            let dir = get_config_dir()?;
            let path = dir.join("config.toml");
            (dir, path)
        }
    };
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::Locked) => {
            eprintln!("Error: the database is locked by another process. Try again shortly.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let mut session = Session {
        db,
        config,
        config_path,
    };

    match args.command {
        Command::Register { name } => register(&mut session, &name).await,
        Command::Login { name } => login(&mut session, &name).await,
        Command::Users => list_users(&session).await,
        Command::Reset => reset(&session).await,
        Command::Addfeed { name, url } => add_feed(&session, &name, &url).await,
        Command::Feeds => list_feeds(&session).await,
        Command::Follow { url } => follow(&session, &url).await,
        Command::Unfollow { url } => unfollow(&session, &url).await,
        Command::Following => following(&session).await,
        Command::Agg {
            every,
            workers,
            once,
        } => aggregate(&session, every, workers, once).await,
        Command::Fetch { url, json } => fetch(&session, &url, json).await,
        Command::Browse { limit } => browse(&session, limit).await,
    }
}

// ============================================================================
// Users
// ============================================================================

async fn register(session: &mut Session, name: &str) -> Result<()> {
    let user = match session.db.create_user(name).await {
        Ok(user) => user,
        Err(StoreError::Conflict(_)) => bail!("User '{name}' already exists"),
        Err(e) => return Err(e.into()),
    };
    session
        .config
        .set_user(&user.name, &session.config_path)
        .context("Failed to save config")?;
    println!("Registered and logged in as {}", user.name);
    Ok(())
}

async fn login(session: &mut Session, name: &str) -> Result<()> {
    let user = match session.db.get_user(name).await {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => bail!("User '{name}' does not exist"),
        Err(e) => return Err(e.into()),
    };
    session
        .config
        .set_user(&user.name, &session.config_path)
        .context("Failed to save config")?;
    println!("Logged in as {}", user.name);
    Ok(())
}

async fn list_users(session: &Session) -> Result<()> {
    let current = session.config.current_user_name.as_deref();
    for user in session.db.get_users().await? {
        if Some(user.name.as_str()) == current {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

async fn reset(session: &Session) -> Result<()> {
    let removed = session.db.delete_all_users().await?;
    println!("Deleted {removed} users and everything they owned");
    Ok(())
}

// ============================================================================
// Feeds and follows
// ============================================================================

async fn add_feed(session: &Session, name: &str, url: &str) -> Result<()> {
    let user = session.current_user().await?;
    let url = validate_url(url).with_context(|| format!("Rejected feed URL '{url}'"))?;

    let feed = match session.db.create_feed(name, url.as_str(), user.id).await {
        Ok(feed) => feed,
        Err(StoreError::Conflict(_)) => {
            bail!("A feed with URL {url} already exists. Use `gator follow {url}`")
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(feed_id = feed.id, url = %feed.url, user = %user.name, "Added feed");
    println!("Added feed {} ({})", feed.name, feed.url);
    println!("{} now follows {}", user.name, feed.name);
    Ok(())
}

async fn list_feeds(session: &Session) -> Result<()> {
    let feeds = session.db.get_feeds().await?;
    if feeds.is_empty() {
        println!("No feeds yet. Add one with `gator addfeed <name> <url>`");
        return Ok(());
    }

    for feed in feeds {
        let fetched = feed
            .last_fetched_at
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("* {}", feed.name);
        println!("  url:     {}", feed.url);
        println!("  owner:   {}", feed.owner_name);
        println!("  fetched: {fetched}");
    }
    Ok(())
}

async fn follow(session: &Session, url: &str) -> Result<()> {
    let user = session.current_user().await?;
    let feed = match session.db.get_feed_by_url(url).await {
        Ok(feed) => feed,
        Err(StoreError::NotFound(_)) => bail!("No feed with URL {url}. Add it with `gator addfeed`"),
        Err(e) => return Err(e.into()),
    };

    match session.db.follow_feed(user.id, feed.id).await {
        Ok(follow) => println!("{} now follows {}", follow.user_name, follow.feed_name),
        Err(StoreError::Conflict(_)) => println!("{} already follows {}", user.name, feed.name),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn unfollow(session: &Session, url: &str) -> Result<()> {
    let user = session.current_user().await?;
    match session.db.unfollow_feed(user.id, url).await {
        Ok(()) => println!("{} unfollowed {url}", user.name),
        Err(StoreError::NotFound(_)) => bail!("{} does not follow {url}", user.name),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn following(session: &Session) -> Result<()> {
    let user = session.current_user().await?;
    let follows = session.db.get_follows_for_user(user.id).await?;
    if follows.is_empty() {
        println!("{} does not follow any feeds", user.name);
    }
    for follow in follows {
        println!("* {} ({})", follow.feed_name, follow.feed_url);
    }
    Ok(())
}

// ============================================================================
// Aggregation
// ============================================================================

async fn aggregate(
    session: &Session,
    every: Option<u64>,
    workers: Option<usize>,
    once: bool,
) -> Result<()> {
    let mut aggregator = session.config.aggregator.clone();
    if let Some(secs) = every {
        aggregator.tick_interval_secs = secs;
    }
    if let Some(count) = workers {
        aggregator.worker_count = count;
    }

    let fetcher =
        Fetcher::new(&aggregator.fetcher_config()).context("Failed to build HTTP client")?;
    let store: Arc<dyn FeedStore> = Arc::new(session.db.clone());
    let sink: Arc<dyn ItemSink> = Arc::new(session.db.clone());
    let scheduler_config = aggregator.scheduler_config();

    if once {
        let mut scheduler = Scheduler::new(store, sink, fetcher, scheduler_config);
        let (report, results) = scheduler.run_once().await;
        if report.store_error {
            bail!("Could not read feeds from the database");
        }
        if results.is_empty() {
            println!("No feeds due");
        }
        for fetched in results {
            match fetched.result {
                Ok(count) => println!("{}: {count} new posts", fetched.url),
                Err(e) => println!("{}: {e}", fetched.url),
            }
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    println!(
        "Collecting feeds every {}s with {} workers (Ctrl-C to stop)",
        scheduler_config.tick_interval.as_secs(),
        scheduler_config.worker_count
    );
    run_aggregation(store, sink, fetcher, scheduler_config, shutdown_rx).await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl-C, shutting down gracefully");
    }
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

async fn fetch(session: &Session, url: &str, json: bool) -> Result<()> {
    let fetcher = Fetcher::new(&session.config.aggregator.fetcher_config())
        .context("Failed to build HTTP client")?;
    let channel = fetch_one(&fetcher, url).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&channel)?);
        return Ok(());
    }

    println!("{}", channel.title);
    if !channel.link.is_empty() {
        println!("{}", channel.link);
    }
    if !channel.description.is_empty() {
        println!("{}", truncate_chars(&channel.description, 200));
    }
    println!();
    for item in &channel.items {
        println!("* {}", item.title);
        if !item.link.is_empty() {
            println!("  {}", item.link);
        }
        if let Some(date) = &item.pub_date {
            println!("  {date}");
        }
    }
    Ok(())
}

async fn browse(session: &Session, limit: i64) -> Result<()> {
    let user = session.current_user().await?;
    let posts = session.db.get_posts_for_user(user.id, limit.max(1)).await?;
    if posts.is_empty() {
        println!("No posts yet. Run `gator agg --once` to collect some");
        return Ok(());
    }

    for post in posts {
        let date = post
            .published()
            .map(|at| at.format("%a %b %e %Y").to_string())
            .unwrap_or_else(|| "undated".to_string());
        println!("{date} from {}", post.feed_name);
        println!("--- {} ---", post.title);
        if !post.description.is_empty() {
            println!("    {}", truncate_chars(&post.description, 200));
        }
        println!("Link: {}", post.url);
        println!("=====================================");
    }
    Ok(())
}
