//! List and search state for a consuming UI.
//!
//! `ListController` drives paging of the popular list and debounced title
//! search on top of a `MovieRepository`. State is published through a
//! `watch` channel; consumers call `subscribe()` and re-render whenever it
//! changes.
//!
//! # Example
//!
//! ```ignore
//! let controller = ListController::new(repo).with_debounce(Duration::from_millis(300));
//! let mut state = controller.subscribe();
//!
//! controller.load(false).await;
//! controller.search("heat");
//!
//! while state.changed().await.is_ok() {
//!     render(&state.borrow_and_update());
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheResult, DataSource};
use crate::repository::MovieRepository;
use crate::tmdb::Movie;

/// Nominal number of results per catalog page
pub const PAGE_SIZE: usize = 20;

/// Default quiet period before a search is issued
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Loading phase of the popular list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
  #[default]
  Idle,
  /// First page is being (re)loaded
  Loading,
  /// A further page is being appended
  LoadingMore,
  /// The last load failed and nothing could be shown
  Error,
}

/// Snapshot of everything a list screen renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListState {
  pub movies: Vec<Movie>,
  pub search_results: Vec<Movie>,
  pub search_query: String,
  pub phase: Phase,
  pub error_message: Option<String>,
  /// Last popular page merged into `movies`
  pub page: u32,
  pub can_load_more: bool,
  pub is_searching: bool,
  pub is_online: bool,
  search_generation: u64,
}

impl ListState {
  pub fn is_loading(&self) -> bool {
    matches!(self.phase, Phase::Loading | Phase::LoadingMore)
  }

  /// Search results while a query is entered, the popular list otherwise.
  pub fn visible(&self) -> &[Movie] {
    if self.search_query.trim().is_empty() {
      &self.movies
    } else {
      &self.search_results
    }
  }
}

/// Owns the list state and the single live search task.
pub struct ListController {
  repo: MovieRepository,
  state: Arc<watch::Sender<ListState>>,
  search_cancel: Mutex<CancellationToken>,
  debounce: Duration,
  connectivity_task: JoinHandle<()>,
}

impl ListController {
  /// Create a controller and start mirroring connectivity into the state.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn new(repo: MovieRepository) -> Self {
    let initial = ListState {
      page: 1,
      can_load_more: true,
      is_online: repo.is_online(),
      ..ListState::default()
    };
    let (tx, _rx) = watch::channel(initial);
    let state = Arc::new(tx);

    let mut online = repo.connectivity().subscribe();
    let forward = Arc::clone(&state);
    let connectivity_task = tokio::spawn(async move {
      while online.changed().await.is_ok() {
        let connected = *online.borrow_and_update();
        forward.send_if_modified(|s| {
          if s.is_online == connected {
            false
          } else {
            s.is_online = connected;
            true
          }
        });
      }
    });

    Self {
      repo,
      state,
      search_cancel: Mutex::new(CancellationToken::new()),
      debounce: DEFAULT_DEBOUNCE,
      connectivity_task,
    }
  }

  /// Set the quiet period before a search request is issued.
  pub fn with_debounce(mut self, debounce: Duration) -> Self {
    self.debounce = debounce;
    self
  }

  pub fn subscribe(&self) -> watch::Receiver<ListState> {
    self.state.subscribe()
  }

  /// Clone of the current state.
  pub fn state(&self) -> ListState {
    self.state.borrow().clone()
  }

  /// Load the first popular page.
  ///
  /// This is a no-op while a load is already running.
  pub async fn load(&self, force_refresh: bool) {
    let started = self.state.send_if_modified(|s| {
      if s.phase == Phase::Loading {
        return false;
      }
      s.phase = Phase::Loading;
      s.page = 1;
      s.can_load_more = true;
      true
    });
    if !started {
      return;
    }

    let CacheResult { data, error, .. } = self.repo.get_popular(1, force_refresh).await;
    self.state.send_modify(|s| {
      s.can_load_more = data.len() >= PAGE_SIZE;
      match error {
        Some(message) if data.is_empty() => {
          s.phase = Phase::Error;
          s.error_message = Some(message);
        }
        _ => {
          s.phase = Phase::Idle;
          s.error_message = None;
        }
      }
      s.movies = data;
    });
  }

  /// Reload the first page from the network, replacing the cache.
  pub async fn refresh(&self) {
    self.load(true).await;
  }

  /// Append the next popular page.
  ///
  /// Skipped while loading, offline or after a short page. Failures roll the
  /// page cursor back without surfacing an error.
  pub async fn load_more(&self) {
    let mut next = None;
    self.state.send_if_modified(|s| {
      if s.is_loading() || !s.can_load_more || !s.is_online {
        return false;
      }
      s.phase = Phase::LoadingMore;
      s.page += 1;
      next = Some(s.page);
      true
    });
    let Some(page) = next else {
      return;
    };

    let result = self.repo.get_popular(page, false).await;
    let failed = result.error.is_some() || result.source == DataSource::Offline;
    if failed {
      tracing::debug!(page, "load more failed, keeping current list");
    }

    self.state.send_modify(|s| {
      // A concurrent reload reset the cursor; this page no longer applies
      if s.phase != Phase::LoadingMore || s.page != page {
        return;
      }
      s.phase = Phase::Idle;
      if failed {
        s.page -= 1;
        return;
      }
      s.can_load_more = result.data.len() >= PAGE_SIZE;
      for movie in result.data {
        if !s.movies.iter().any(|m| m.id == movie.id) {
          s.movies.push(movie);
        }
      }
    });
  }

  /// Search titles, superseding any search still pending.
  ///
  /// A blank query clears the results immediately. Otherwise the request is
  /// issued after the debounce period, and its results are dropped if
  /// another search started in the meantime.
  pub fn search(&self, query: &str) {
    let token = CancellationToken::new();
    std::mem::replace(&mut *self.lock_search(), token.clone()).cancel();

    let query = query.to_string();
    let blank = query.trim().is_empty();
    let mut generation = 0;
    self.state.send_modify(|s| {
      s.search_generation += 1;
      generation = s.search_generation;
      s.search_query = query.clone();
      s.is_searching = !blank;
      if blank {
        s.search_results.clear();
      }
    });
    if blank {
      return;
    }

    let repo = self.repo.clone();
    let state = Arc::clone(&self.state);
    let debounce = self.debounce;
    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(debounce) => {}
      }

      let result = tokio::select! {
        _ = token.cancelled() => return,
        result = repo.search(&query, 1) => result,
      };

      state.send_if_modified(|s| {
        if token.is_cancelled() || s.search_generation != generation {
          return false;
        }
        s.search_results = result.data;
        s.is_searching = false;
        true
      });
    });
  }

  /// Drop the query and any pending search.
  pub fn clear_search(&self) {
    self.search("");
  }

  fn lock_search(&self) -> MutexGuard<'_, CancellationToken> {
    self
      .search_cancel
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl Drop for ListController {
  fn drop(&mut self) {
    self.connectivity_task.abort();
    self.lock_search().cancel();
  }
}

impl std::fmt::Debug for ListController {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ListController")
      .field("state", &*self.state.borrow())
      .field("debounce", &self.debounce)
      .finish_non_exhaustive()
  }
}
