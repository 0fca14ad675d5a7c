use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use alongside::cache::{ImageStore, RecordCache};
use alongside::config::Config;
use alongside::connectivity::{self, ConnectivityMonitor};
use alongside::db::Database;
use alongside::tmdb::{ImageKind, Movie, TmdbClient};
use alongside::{logging, ListController, MovieRepository, Phase};

#[derive(Parser, Debug)]
#[command(name = "alongside")]
#[command(about = "Browse TMDb movies, online or from the local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/alongside/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Never touch the network; serve everything from the cache
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List popular movies
  Popular {
    /// Number of pages to load
    #[arg(short, long, default_value_t = 1)]
    pages: u32,
    /// Replace the cache with a fresh first page
    #[arg(short, long)]
    refresh: bool,
  },
  /// Show one movie
  Details { id: i64 },
  /// Search movie titles
  Search { query: String },
  /// List every cached movie
  Cached,
  /// Show connectivity and cache status
  Status,
  /// Delete all cached movies and images
  Purge,
}

impl Command {
  fn needs_catalog(&self) -> bool {
    matches!(
      self,
      Command::Popular { .. } | Command::Details { .. } | Command::Search { .. }
    )
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  std::fs::create_dir_all(&data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;
  let _log_guard = logging::init(&data_dir);

  let token = if args.command.needs_catalog() && !args.offline {
    Config::get_access_token()?
  } else {
    Config::get_access_token().unwrap_or_default()
  };

  let repo = build_repository(&config, &data_dir, &token, args.offline).await?;
  tracing::info!(command = ?args.command, online = repo.is_online(), "starting");

  match args.command {
    Command::Popular { pages, refresh } => popular(&repo, &config, pages, refresh).await,
    Command::Details { id } => details(&repo, &config, id).await?,
    Command::Search { query } => search(&repo, &config, &query).await,
    Command::Cached => print_movies(&repo.cached_movies().await),
    Command::Status => status(&repo, &data_dir).await,
    Command::Purge => {
      repo.purge().await;
      println!("Cache cleared");
    }
  }

  repo.wait_for_prefetch().await;
  repo.connectivity().shutdown();

  Ok(())
}

async fn build_repository(
  config: &Config,
  data_dir: &std::path::Path,
  token: &str,
  offline: bool,
) -> Result<MovieRepository> {
  let db = Database::open(&data_dir.join("cache.db"))?;
  let images = ImageStore::open(data_dir.join("images"))?;
  let cache = RecordCache::new(db, images.clone()).with_max_records(config.cache.max_records);
  let catalog = TmdbClient::new(&config.tmdb, token)?;

  let monitor = if offline {
    ConnectivityMonitor::manual(false)
  } else {
    let host = config.probe_host()?;
    let port = config.connectivity.probe_port;
    let timeout = config.connectivity.timeout();
    let monitor =
      ConnectivityMonitor::spawn_probe(host.clone(), port, config.connectivity.interval(), timeout);
    monitor.set_connected(connectivity::probe(&host, port, timeout).await);
    monitor
  };

  Ok(MovieRepository::new(
    Arc::new(catalog),
    cache,
    images,
    monitor,
    config.tmdb.image_base_url.clone(),
  ))
}

async fn popular(repo: &MovieRepository, config: &Config, pages: u32, refresh: bool) {
  let controller = ListController::new(repo.clone()).with_debounce(config.search.debounce());

  controller.load(refresh).await;
  for _ in 1..pages {
    let before = controller.state().page;
    controller.load_more().await;
    if controller.state().page == before {
      break;
    }
  }

  let state = controller.state();
  if !state.is_online {
    println!("(offline, showing cached movies)");
  }
  if state.phase == Phase::Error {
    println!("Error: {}", state.error_message.unwrap_or_default());
    return;
  }
  print_movies(&state.movies);
}

async fn details(repo: &MovieRepository, config: &Config, id: i64) -> Result<()> {
  let Some(movie) = repo.get_details(id).await? else {
    println!("Movie {} is not cached and the network is unavailable", id);
    return Ok(());
  };

  println!("{} ({})", movie.title, movie.release_year());
  println!("Rating: {} from {} votes", movie.vote_label(), movie.vote_count);
  if let Some(overview) = movie.overview.as_deref().filter(|o| !o.is_empty()) {
    println!();
    println!("{}", overview);
  }
  println!();
  for kind in ImageKind::ALL {
    if let Some(url) = movie.image_url(&config.tmdb.image_base_url, kind) {
      let stored = repo.image(movie.id, kind).await.is_some();
      println!("{}: {}{}", kind, url, if stored { " (stored)" } else { "" });
    }
  }

  Ok(())
}

async fn search(repo: &MovieRepository, config: &Config, query: &str) {
  let controller = ListController::new(repo.clone()).with_debounce(config.search.debounce());
  let mut state = controller.subscribe();

  controller.search(query);
  let results = match state.wait_for(|s| !s.is_searching).await {
    Ok(s) => s.search_results.clone(),
    Err(_) => Vec::new(),
  };

  if results.is_empty() {
    println!("No movies match \"{}\"", query.trim());
  } else {
    print_movies(&results);
  }
}

async fn status(repo: &MovieRepository, data_dir: &std::path::Path) {
  let stats = repo.stats().await;
  println!("Network:  {}", if repo.is_online() { "online" } else { "offline" });
  println!("Data dir: {}", data_dir.display());
  println!("Cached:   {} movies", stats.count);
  if let Some(at) = stats.newest_cached_at {
    println!("Updated:  {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
  }
}

fn print_movies(movies: &[Movie]) {
  if movies.is_empty() {
    println!("No movies");
    return;
  }
  for movie in movies {
    println!(
      "{:>8}  {:<7}  {:>4}  {}",
      movie.id,
      movie.release_year(),
      movie.vote_label(),
      movie.title
    );
  }
}
