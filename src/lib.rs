//! Offline-first client for the TMDb movie catalog.
//!
//! Popular movies, details and search results come from the network while
//! connected and from a bounded local cache otherwise. Posters and backdrops
//! are downloaded in the background and kept next to the records.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod logging;
pub mod repository;
pub mod tmdb;
pub mod view_state;

pub use cache::{CacheResult, DataSource};
pub use repository::MovieRepository;
pub use view_state::{ListController, ListState, Phase};
