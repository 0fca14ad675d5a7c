//! Offline-aware movie repository.
//!
//! Reconciles the remote catalog with the local record cache and image
//! store. Reads prefer the network while connected and fall back to the
//! cache on failure or while offline; only the first popular page can be
//! rebuilt from cache, since merged records no longer carry page boundaries.

use futures::StreamExt;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::cache::{CacheResult, CacheStats, ImageStore, RecordCache};
use crate::connectivity::ConnectivityMonitor;
use crate::tmdb::{CatalogApi, CatalogError, ImageKind, Movie};

/// Concurrent image downloads per prefetch batch
const PREFETCH_CONCURRENCY: usize = 6;

/// Single data-access facade over catalog, cache, images and connectivity.
#[derive(Clone)]
pub struct MovieRepository {
  catalog: Arc<dyn CatalogApi>,
  cache: RecordCache,
  images: ImageStore,
  connectivity: ConnectivityMonitor,
  image_base_url: String,
  prefetch: TaskTracker,
}

impl MovieRepository {
  pub fn new(
    catalog: Arc<dyn CatalogApi>,
    cache: RecordCache,
    images: ImageStore,
    connectivity: ConnectivityMonitor,
    image_base_url: impl Into<String>,
  ) -> Self {
    Self {
      catalog,
      cache,
      images,
      connectivity,
      image_base_url: image_base_url.into(),
      prefetch: TaskTracker::new(),
    }
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_connected()
  }

  pub fn connectivity(&self) -> &ConnectivityMonitor {
    &self.connectivity
  }

  /// Popular movies for `page`.
  ///
  /// Online: fetch, cache (replacing the whole cache for a forced refresh of
  /// page 1) and return the fetched page. On failure or offline, page 1 is
  /// served from cache and later pages come back empty.
  pub async fn get_popular(&self, page: u32, force_refresh: bool) -> CacheResult<Vec<Movie>> {
    if !self.is_online() {
      tracing::debug!(page, "offline, serving popular movies from cache");
      return CacheResult::offline(self.cached_page(page).await);
    }

    match self.catalog.fetch_popular(page).await {
      Ok(result) => {
        let movies = result.results;
        if page == 1 && force_refresh {
          self.cache.replace(&movies).await;
        } else {
          self.cache.upsert(&movies).await;
        }
        self.spawn_prefetch(&movies);
        CacheResult::from_network(movies)
      }
      Err(e) => {
        tracing::warn!(page, error = %e, "popular movies fetch failed, falling back to cache");
        CacheResult::fallback(self.cached_page(page).await, e)
      }
    }
  }

  async fn cached_page(&self, page: u32) -> Vec<Movie> {
    if page == 1 {
      self.cache.list().await
    } else {
      Vec::new()
    }
  }

  /// A single movie. A cached record is returned without touching the
  /// network; a miss while offline is `Ok(None)`; fetch errors propagate.
  pub async fn get_details(&self, id: i64) -> Result<Option<Movie>, CatalogError> {
    if let Some(movie) = self.cache.get(id).await {
      return Ok(Some(movie));
    }

    if !self.is_online() {
      tracing::debug!(id, "movie not cached and offline");
      return Ok(None);
    }

    let movie = self.catalog.fetch_details(id).await.map_err(|e| {
      tracing::warn!(id, error = %e, "failed to fetch movie details");
      e
    })?;

    self.cache.upsert(std::slice::from_ref(&movie)).await;
    self.spawn_prefetch(std::slice::from_ref(&movie));
    Ok(Some(movie))
  }

  /// Search by title. Results are never written to the cache.
  pub async fn search(&self, query: &str, page: u32) -> CacheResult<Vec<Movie>> {
    let query = query.trim();
    if query.is_empty() {
      return CacheResult::from_cache(Vec::new());
    }

    if !self.is_online() {
      return CacheResult::offline(self.cache.search(query).await);
    }

    match self.catalog.search(query, page).await {
      Ok(result) => CacheResult::from_network(result.results),
      Err(e) => {
        tracing::warn!(query, error = %e, "search failed, searching cache");
        CacheResult::fallback(self.cache.search(query).await, e)
      }
    }
  }

  /// Every cached movie, most popular first.
  pub async fn cached_movies(&self) -> Vec<Movie> {
    self.cache.list().await
  }

  /// Locally stored image bytes, if downloaded.
  pub async fn image(&self, id: i64, kind: ImageKind) -> Option<Vec<u8>> {
    self.images.get(id, kind).await
  }

  pub async fn stats(&self) -> CacheStats {
    self.cache.stats().await
  }

  /// Drop every cached record and image.
  pub async fn purge(&self) {
    self.cache.clear().await;
    self.images.clear().await;
  }

  /// Wait until every prefetch started so far has finished.
  pub async fn wait_for_prefetch(&self) {
    self.prefetch.close();
    self.prefetch.wait().await;
    self.prefetch.reopen();
  }

  /// Download missing posters and backdrops in the background.
  ///
  /// Runs after the cache write so that records evicted by it are skipped.
  /// A record evicted while its image downloads gets the file removed again.
  fn spawn_prefetch(&self, movies: &[Movie]) {
    let base = self.image_base_url.as_str();
    let jobs: Vec<(i64, ImageKind, String)> = movies
      .iter()
      .flat_map(|movie| {
        ImageKind::ALL
          .into_iter()
          .filter_map(move |kind| movie.image_url(base, kind).map(|url| (movie.id, kind, url)))
      })
      .collect();

    if jobs.is_empty() {
      return;
    }

    let images = self.images.clone();
    let cache = self.cache.clone();
    self.prefetch.spawn(async move {
      futures::stream::iter(jobs)
        .for_each_concurrent(PREFETCH_CONCURRENCY, |(id, kind, url)| {
          let images = images.clone();
          let cache = cache.clone();
          async move {
            if images.has(id, kind).await || !cache.contains(id).await {
              return;
            }
            if images.download_and_store(&url, id, kind).await.is_none() {
              return;
            }
            // Eviction may have run while downloading; its image cleanup
            // happens after commit, so a record missing now stays missing
            if !cache.contains(id).await {
              tracing::debug!(id, %kind, "record evicted during download, dropping image");
              images.remove(id, kind).await;
            }
          }
        })
        .await;
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{sample_png, DataSource};
  use crate::db::Database;
  use crate::tmdb::fake::{serve_image, serve_image_with_delay, FakeCatalog};
  use crate::tmdb::types::sample_movie;
  use std::sync::atomic::Ordering;
  use std::time::Duration;

  struct Fixture {
    _dir: tempfile::TempDir,
    catalog: Arc<FakeCatalog>,
    connectivity: ConnectivityMonitor,
    cache: RecordCache,
    images: ImageStore,
    repo: MovieRepository,
  }

  fn fixture_with_images(online: bool, image_base_url: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let images = ImageStore::open(dir.path().join("images")).unwrap();
    let cache = RecordCache::new(Database::open_in_memory().unwrap(), images.clone());
    let catalog = FakeCatalog::new();
    let connectivity = ConnectivityMonitor::manual(online);
    let repo = MovieRepository::new(
      catalog.clone(),
      cache.clone(),
      images.clone(),
      connectivity.clone(),
      image_base_url,
    );
    Fixture {
      _dir: dir,
      catalog,
      connectivity,
      cache,
      images,
      repo,
    }
  }

  fn fixture(online: bool) -> Fixture {
    // Nothing listens on port 9, so background downloads fail fast
    fixture_with_images(online, "http://127.0.0.1:9")
  }

  fn page(ids: std::ops::RangeInclusive<i64>) -> Vec<Movie> {
    ids
      .map(|id| sample_movie(id, &format!("Movie {}", id), 100.0 - id as f64))
      .collect()
  }

  fn ids(movies: &[Movie]) -> Vec<i64> {
    movies.iter().map(|m| m.id).collect()
  }

  #[tokio::test]
  async fn test_popular_online_returns_and_caches_page() {
    let f = fixture(true);
    f.catalog.set_page(1, page(1..=20));

    let result = f.repo.get_popular(1, false).await;

    assert_eq!(result.source, DataSource::Network);
    assert_eq!(result.error, None);
    assert_eq!(ids(&result.data), (1..=20).collect::<Vec<i64>>());
    assert_eq!(f.cache.list().await.len(), 20);
  }

  #[tokio::test]
  async fn test_forced_refresh_of_first_page_replaces_cache() {
    let f = fixture(true);
    f.cache
      .upsert(&[sample_movie(500, "Stale", 1000.0), sample_movie(3, "Old 3", 1.0)])
      .await;
    f.catalog.set_page(1, page(1..=5));

    f.repo.get_popular(1, true).await;

    let cached = f.cache.list().await;
    assert_eq!(ids(&cached), vec![1, 2, 3, 4, 5]);
    assert_eq!(f.cache.get(3).await.unwrap().title, "Movie 3");
  }

  #[tokio::test]
  async fn test_unforced_refresh_merges_into_cache() {
    let f = fixture(true);
    f.cache.upsert(&[sample_movie(500, "Kept", 0.5)]).await;
    f.catalog.set_page(1, page(1..=3));

    f.repo.get_popular(1, false).await;

    assert!(f.cache.contains(500).await);
    assert_eq!(f.cache.list().await.len(), 4);
  }

  #[tokio::test]
  async fn test_later_pages_are_cached_too() {
    let f = fixture(true);
    f.catalog.set_page(2, page(21..=40));

    let result = f.repo.get_popular(2, true).await;

    assert_eq!(result.data.len(), 20);
    assert_eq!(f.cache.list().await.len(), 20);
  }

  #[tokio::test]
  async fn test_online_failure_falls_back_for_first_page_only() {
    let f = fixture(true);
    f.cache.upsert(&page(1..=3)).await;
    f.catalog.fail_with(Some(CatalogError::Http(503)));

    let first = f.repo.get_popular(1, true).await;
    assert_eq!(first.source, DataSource::Cache);
    assert_eq!(ids(&first.data), vec![1, 2, 3]);
    assert_eq!(first.error.as_deref(), Some("HTTP error: 503"));

    let second = f.repo.get_popular(2, false).await;
    assert!(second.data.is_empty());
    assert!(second.error.is_some());

    // The failed forced refresh must not have cleared anything
    assert_eq!(f.cache.list().await.len(), 3);
  }

  #[tokio::test]
  async fn test_offline_serves_cache_without_network() {
    let f = fixture(false);
    f.cache.upsert(&page(1..=3)).await;
    f.catalog.set_page(1, page(10..=12));

    let first = f.repo.get_popular(1, true).await;
    assert_eq!(first.source, DataSource::Offline);
    assert_eq!(ids(&first.data), vec![1, 2, 3]);

    let second = f.repo.get_popular(2, false).await;
    assert!(second.data.is_empty());
    assert_eq!(f.catalog.calls(), 0);
  }

  #[tokio::test]
  async fn test_details_cache_hit_skips_network() {
    let f = fixture(true);
    f.cache.upsert(&[sample_movie(42, "Cached", 3.0)]).await;

    let movie = f.repo.get_details(42).await.unwrap().unwrap();

    assert_eq!(movie.title, "Cached");
    assert_eq!(f.catalog.calls(), 0);
  }

  #[tokio::test]
  async fn test_details_miss_fetches_and_caches() {
    let f = fixture(true);
    f.catalog.set_details(sample_movie(7, "Fetched", 3.0));

    let movie = f.repo.get_details(7).await.unwrap().unwrap();
    assert_eq!(movie.title, "Fetched");
    assert_eq!(f.cache.get(7).await, Some(movie));

    // Second read is served from cache
    f.repo.get_details(7).await.unwrap();
    assert_eq!(f.catalog.calls(), 1);
  }

  #[tokio::test]
  async fn test_details_fetch_error_propagates() {
    let f = fixture(true);

    let err = f.repo.get_details(404).await.unwrap_err();
    assert_eq!(err, CatalogError::Http(404));

    f.catalog
      .fail_with(Some(CatalogError::Transport("reset".to_string())));
    let err = f.repo.get_details(1).await.unwrap_err();
    assert!(matches!(err, CatalogError::Transport(_)));
  }

  #[tokio::test]
  async fn test_details_miss_offline_is_none() {
    let f = fixture(false);
    f.catalog.set_details(sample_movie(7, "Fetched", 3.0));

    assert_eq!(f.repo.get_details(7).await.unwrap(), None);
    assert_eq!(f.catalog.calls(), 0);
  }

  #[tokio::test]
  async fn test_search_online_does_not_write_cache() {
    let f = fixture(true);
    f.catalog.set_page(1, vec![sample_movie(1, "Batman", 5.0)]);

    let result = f.repo.search("bat", 1).await;

    assert_eq!(result.source, DataSource::Network);
    assert_eq!(ids(&result.data), vec![1]);
    assert!(f.cache.list().await.is_empty());
  }

  #[tokio::test]
  async fn test_search_falls_back_to_cache() {
    let f = fixture(true);
    f.cache
      .upsert(&[sample_movie(1, "Batman", 5.0), sample_movie(2, "Heat", 6.0)])
      .await;
    f.catalog
      .fail_with(Some(CatalogError::Decode("bad".to_string())));

    let result = f.repo.search("BAT", 1).await;
    assert_eq!(result.source, DataSource::Cache);
    assert_eq!(ids(&result.data), vec![1]);

    f.connectivity.set_connected(false);
    let calls = f.catalog.calls();
    let result = f.repo.search("heat", 1).await;
    assert_eq!(result.source, DataSource::Offline);
    assert_eq!(ids(&result.data), vec![2]);
    assert_eq!(f.catalog.calls(), calls);
  }

  #[tokio::test]
  async fn test_blank_search_issues_no_request() {
    let f = fixture(true);

    let result = f.repo.search("   ", 1).await;

    assert!(result.data.is_empty());
    assert_eq!(f.catalog.calls(), 0);
  }

  #[tokio::test]
  async fn test_prefetch_downloads_only_missing_images() {
    let png = sample_png();
    let (base, served) = serve_image(png.clone()).await;
    let f = fixture_with_images(true, &base);

    // Movie 1 already has a poster; it must not be fetched again
    f.images.put(1, ImageKind::Poster, &png).await;
    let mut no_backdrop = sample_movie(2, "No backdrop", 5.0);
    no_backdrop.backdrop_path = None;
    f.catalog
      .set_page(1, vec![sample_movie(1, "One", 9.0), no_backdrop]);

    f.repo.get_popular(1, false).await;
    f.repo.wait_for_prefetch().await;

    assert_eq!(served.load(Ordering::SeqCst), 2);
    assert_eq!(f.images.get(1, ImageKind::Poster).await, Some(png));
    assert!(f.images.has(1, ImageKind::Backdrop).await);
    assert!(f.images.has(2, ImageKind::Poster).await);
    assert!(!f.images.has(2, ImageKind::Backdrop).await);
    assert!(f.repo.image(2, ImageKind::Poster).await.is_some());
  }

  #[tokio::test]
  async fn test_prefetch_skips_records_evicted_by_the_write() {
    let png = sample_png();
    let (base, served) = serve_image(png).await;
    let f = fixture_with_images(true, &base);
    let cache = f.cache.clone().with_max_records(2);
    let repo = MovieRepository::new(
      f.catalog.clone(),
      cache.clone(),
      f.images.clone(),
      f.connectivity.clone(),
      base,
    );
    f.catalog.set_page(1, page(1..=3));

    repo.get_popular(1, false).await;
    repo.wait_for_prefetch().await;

    assert!(!cache.contains(3).await);
    assert!(!f.images.has(3, ImageKind::Poster).await);
    assert_eq!(served.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_eviction_during_download_leaves_no_image() {
    let (base, served) = serve_image_with_delay(sample_png(), Duration::from_millis(300)).await;
    let f = fixture_with_images(true, &base);
    let cache = f.cache.clone().with_max_records(2);
    let repo = MovieRepository::new(
      f.catalog.clone(),
      cache.clone(),
      f.images.clone(),
      f.connectivity.clone(),
      base,
    );
    f.catalog.set_page(1, page(1..=2));

    repo.get_popular(1, false).await;
    // More popular records push 1 and 2 out while their images download
    tokio::time::sleep(Duration::from_millis(50)).await;
    cache
      .upsert(&[sample_movie(3, "Three", 500.0), sample_movie(4, "Four", 600.0)])
      .await;
    repo.wait_for_prefetch().await;

    assert_eq!(ids(&cache.list().await), vec![4, 3]);
    assert_eq!(served.load(Ordering::SeqCst), 4);
    for id in [1, 2] {
      for kind in ImageKind::ALL {
        assert!(!f.images.has(id, kind).await, "image left for evicted {} {}", id, kind);
      }
    }
  }

  #[tokio::test]
  async fn test_purge_drops_records_and_images() {
    let f = fixture(true);
    f.cache.upsert(&page(1..=2)).await;
    f.images.put(1, ImageKind::Poster, &sample_png()).await;

    f.repo.purge().await;

    assert!(f.repo.cached_movies().await.is_empty());
    assert!(!f.images.has(1, ImageKind::Poster).await);
    assert_eq!(f.repo.stats().await.count, 0);
  }
}
