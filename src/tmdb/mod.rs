//! TMDb catalog access: wire types, domain types and the HTTP client.

pub mod api_types;
pub mod client;
pub mod types;

pub use client::{CatalogApi, CatalogError, TmdbClient};
pub use types::{ImageKind, Movie, MoviePage};

#[cfg(test)]
pub(crate) mod fake;
