use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::config::TmdbConfig;
use crate::tmdb::api_types::{ApiMovie, ApiMovieResponse};
use crate::tmdb::types::{Movie, MoviePage};

/// Failures of a single catalog request. No retries happen at this layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("HTTP error: {0}")]
  Http(u16),

  #[error("Failed to decode response: {0}")]
  Decode(String),

  #[error("Network error: {0}")]
  Transport(String),
}

/// Read-only access to the remote movie catalog.
#[async_trait]
pub trait CatalogApi: Send + Sync {
  async fn fetch_popular(&self, page: u32) -> Result<MoviePage, CatalogError>;

  async fn fetch_details(&self, id: i64) -> Result<Movie, CatalogError>;

  async fn search(&self, query: &str, page: u32) -> Result<MoviePage, CatalogError>;
}

/// TMDb v3 API client
#[derive(Clone)]
pub struct TmdbClient {
  http: reqwest::Client,
  base_url: String,
}

impl TmdbClient {
  pub fn new(config: &TmdbConfig, access_token: &str) -> Result<Self, CatalogError> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
      .map_err(|e| CatalogError::InvalidRequest(format!("invalid access token: {}", e)))?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(config.timeout())
      .connect_timeout(Duration::from_secs(10).min(config.timeout()))
      .build()
      .map_err(|e| CatalogError::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base_url: config.api_url.trim_end_matches('/').to_string(),
    })
  }

  /// Build an endpoint URL with the given query parameters
  fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, CatalogError> {
    let mut url = Url::parse(&format!("{}{}", self.base_url, path))
      .map_err(|e| CatalogError::InvalidRequest(format!("{}{}: {}", self.base_url, path, e)))?;

    if !query.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (key, value) in query {
        pairs.append_pair(key, value);
      }
    }

    Ok(url)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CatalogError> {
    tracing::debug!(%url, "catalog request");

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| CatalogError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      return Err(CatalogError::Http(status.as_u16()));
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| CatalogError::Transport(e.to_string()))?;

    serde_json::from_slice(&body).map_err(|e| {
      tracing::warn!(error = %e, "catalog response did not match schema");
      CatalogError::Decode(e.to_string())
    })
  }
}

#[async_trait]
impl CatalogApi for TmdbClient {
  async fn fetch_popular(&self, page: u32) -> Result<MoviePage, CatalogError> {
    let url = self.endpoint("/movie/popular", &[("page", page.to_string())])?;
    let response: ApiMovieResponse = self.get_json(url).await?;
    Ok(response.into())
  }

  async fn fetch_details(&self, id: i64) -> Result<Movie, CatalogError> {
    let url = self.endpoint(&format!("/movie/{}", id), &[])?;
    let movie: ApiMovie = self.get_json(url).await?;
    Ok(movie.into())
  }

  async fn search(&self, query: &str, page: u32) -> Result<MoviePage, CatalogError> {
    let url = self.endpoint(
      "/search/movie",
      &[("query", query.to_string()), ("page", page.to_string())],
    )?;
    let response: ApiMovieResponse = self.get_json(url).await?;
    Ok(response.into())
  }
}
