//! Serde-deserializable types matching TMDb API responses.
//!
//! These types are separate from domain types so the wire schema can be
//! enforced strictly while domain types stay focused on application needs.

use serde::Deserialize;

use super::types::{Movie, MoviePage};

// ============================================================================
// Movie object - shared by list, search and detail endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiMovie {
  pub id: i64,
  pub title: String,
  pub overview: Option<String>,
  pub release_date: Option<String>,
  pub poster_path: Option<String>,
  pub backdrop_path: Option<String>,
  pub vote_average: f64,
  pub vote_count: i64,
  pub adult: bool,
  pub popularity: f64,
  pub original_language: Option<String>,
  pub original_title: Option<String>,
  pub genre_ids: Option<Vec<i64>>,
  pub video: Option<bool>,
}

// ============================================================================
// Paged listing (popular, search)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiMovieResponse {
  pub page: u32,
  pub results: Vec<ApiMovie>,
  pub total_pages: u32,
  pub total_results: u32,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiMovie> for Movie {
  fn from(m: ApiMovie) -> Self {
    Movie {
      id: m.id,
      title: m.title,
      overview: m.overview,
      release_date: m.release_date,
      poster_path: m.poster_path,
      backdrop_path: m.backdrop_path,
      vote_average: m.vote_average,
      vote_count: m.vote_count,
      adult: m.adult,
      popularity: m.popularity,
      original_language: m.original_language,
      original_title: m.original_title,
      genre_ids: m.genre_ids,
      video: m.video,
    }
  }
}

impl From<ApiMovieResponse> for MoviePage {
  fn from(resp: ApiMovieResponse) -> Self {
    MoviePage {
      page: resp.page,
      results: resp.results.into_iter().map(Movie::from).collect(),
      total_pages: resp.total_pages,
      total_results: resp.total_results,
    }
  }
}
