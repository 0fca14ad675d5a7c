//! In-process stand-ins for the catalog API and the image CDN.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::client::{CatalogApi, CatalogError};
use super::types::{Movie, MoviePage};

/// Catalog backed by in-memory pages, counting every call.
#[derive(Default)]
pub struct FakeCatalog {
  pages: Mutex<HashMap<u32, Vec<Movie>>>,
  details: Mutex<HashMap<i64, Movie>>,
  failure: Mutex<Option<CatalogError>>,
  delay: Mutex<Duration>,
  calls: AtomicUsize,
}

impl FakeCatalog {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_page(&self, page: u32, movies: Vec<Movie>) {
    self.pages.lock().unwrap().insert(page, movies);
  }

  pub fn set_details(&self, movie: Movie) {
    self.details.lock().unwrap().insert(movie.id, movie);
  }

  /// Make every subsequent call fail with `error` (or succeed with `None`).
  pub fn fail_with(&self, error: Option<CatalogError>) {
    *self.failure.lock().unwrap() = error;
  }

  /// Delay every call by `delay` before answering.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  async fn begin(&self) -> Result<(), CatalogError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    match self.failure.lock().unwrap().clone() {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
  async fn fetch_popular(&self, page: u32) -> Result<MoviePage, CatalogError> {
    self.begin().await?;
    let pages = self.pages.lock().unwrap();
    let results = pages.get(&page).cloned().unwrap_or_default();
    Ok(MoviePage {
      page,
      total_results: pages.values().map(|p| p.len() as u32).sum(),
      total_pages: pages.len() as u32,
      results,
    })
  }

  async fn fetch_details(&self, id: i64) -> Result<Movie, CatalogError> {
    self.begin().await?;
    self
      .details
      .lock()
      .unwrap()
      .get(&id)
      .cloned()
      .ok_or(CatalogError::Http(404))
  }

  async fn search(&self, query: &str, page: u32) -> Result<MoviePage, CatalogError> {
    self.begin().await?;
    let needle = query.to_lowercase();
    let mut results: Vec<Movie> = self
      .pages
      .lock()
      .unwrap()
      .values()
      .flatten()
      .filter(|m| m.title.to_lowercase().contains(&needle))
      .cloned()
      .collect();
    results.sort_by_key(|m| m.id);

    Ok(MoviePage {
      page,
      total_pages: 1,
      total_results: results.len() as u32,
      results,
    })
  }
}

/// Minimal HTTP server answering every request with `body`.
///
/// Returns the base URL and a counter of requests served.
pub async fn serve_image(body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
  serve_image_with_delay(body, Duration::ZERO).await
}

/// Like `serve_image`, but holds each response back for `delay`.
pub async fn serve_image_with_delay(body: Vec<u8>, delay: Duration) -> (String, Arc<AtomicUsize>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let base = format!("http://{}", listener.local_addr().unwrap());
  let served = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&served);
  let body = Arc::new(body);

  tokio::spawn(async move {
    while let Ok((mut socket, _)) = listener.accept().await {
      let body = Arc::clone(&body);
      let counter = Arc::clone(&counter);
      tokio::spawn(async move {
        let mut request: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
          match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
          }
        }
        counter.fetch_add(1, Ordering::SeqCst);
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
        let header = format!(
          "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
          body.len()
        );
        let _ = socket.write_all(header.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
      });
    }
  });

  (base, served)
}
