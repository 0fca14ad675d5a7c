//! Result wrapper describing where repository data came from.

/// Result from a repository read, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: DataSource,
  /// Message of the network failure that forced a cache fallback
  pub error: Option<String>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: DataSource::Network,
      error: None,
    }
  }

  /// Data answered locally without consulting the network.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: DataSource::Cache,
      error: None,
    }
  }

  /// Cached data served because the network request failed.
  pub fn fallback(data: T, error: impl ToString) -> Self {
    Self {
      data,
      source: DataSource::Cache,
      error: Some(error.to_string()),
    }
  }

  /// Cached data served while offline.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: DataSource::Offline,
      error: None,
    }
  }

  pub fn is_from_network(&self) -> bool {
    self.source == DataSource::Network
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Fresh data from network
  Network,
  /// Network request failed, serving cached data
  Cache,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
