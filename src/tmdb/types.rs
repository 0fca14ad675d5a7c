use serde::{Deserialize, Serialize};
use std::fmt;

/// A movie as the application sees it, both fresh from the catalog and
/// read back from the record cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
  pub id: i64,
  pub title: String,
  #[serde(default)]
  pub overview: Option<String>,
  #[serde(default)]
  pub release_date: Option<String>,
  #[serde(default)]
  pub poster_path: Option<String>,
  #[serde(default)]
  pub backdrop_path: Option<String>,
  pub vote_average: f64,
  pub vote_count: i64,
  pub adult: bool,
  pub popularity: f64,
  #[serde(default)]
  pub original_language: Option<String>,
  #[serde(default)]
  pub original_title: Option<String>,
  #[serde(default)]
  pub genre_ids: Option<Vec<i64>>,
  #[serde(default)]
  pub video: Option<bool>,
}

impl Movie {
  /// Path fragment for the given asset kind, if the catalog provided one.
  pub fn image_path(&self, kind: ImageKind) -> Option<&str> {
    let path = match kind {
      ImageKind::Poster => self.poster_path.as_deref(),
      ImageKind::Backdrop => self.backdrop_path.as_deref(),
    };
    path.filter(|p| !p.is_empty())
  }

  /// Full download URL for an asset: `<base>/<size><path>`.
  pub fn image_url(&self, base: &str, kind: ImageKind) -> Option<String> {
    self
      .image_path(kind)
      .map(|path| format!("{}/{}{}", base.trim_end_matches('/'), kind.size(), path))
  }

  pub fn poster_url(&self, base: &str) -> Option<String> {
    self.image_url(base, ImageKind::Poster)
  }

  pub fn backdrop_url(&self, base: &str) -> Option<String> {
    self.image_url(base, ImageKind::Backdrop)
  }

  /// Release year for display, "Unknown" when the date is missing.
  pub fn release_year(&self) -> String {
    let date = match self.release_date.as_deref() {
      Some(d) if !d.is_empty() => d,
      _ => return "Unknown".to_string(),
    };

    match chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
      Ok(parsed) => parsed.format("%Y").to_string(),
      Err(_) => date.chars().take(4).collect(),
    }
  }

  pub fn vote_label(&self) -> String {
    format!("{:.1}", self.vote_average)
  }
}

/// One page of a paginated catalog listing
#[derive(Debug, Clone, PartialEq)]
pub struct MoviePage {
  pub page: u32,
  pub results: Vec<Movie>,
  pub total_pages: u32,
  pub total_results: u32,
}

/// Kind of image asset stored per movie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
  Poster,
  Backdrop,
}

impl ImageKind {
  pub const ALL: [ImageKind; 2] = [ImageKind::Poster, ImageKind::Backdrop];

  pub fn as_str(self) -> &'static str {
    match self {
      ImageKind::Poster => "poster",
      ImageKind::Backdrop => "backdrop",
    }
  }

  /// Size segment of the image CDN path
  fn size(self) -> &'static str {
    match self {
      ImageKind::Poster => "w500",
      ImageKind::Backdrop => "w780",
    }
  }
}

impl fmt::Display for ImageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
pub(crate) fn sample_movie(id: i64, title: &str, popularity: f64) -> Movie {
  Movie {
    id,
    title: title.to_string(),
    overview: Some(format!("Overview of {}", title)),
    release_date: Some("2023-07-21".to_string()),
    poster_path: Some(format!("/poster{}.jpg", id)),
    backdrop_path: Some(format!("/backdrop{}.jpg", id)),
    vote_average: 7.46,
    vote_count: 1200,
    adult: false,
    popularity,
    original_language: None,
    original_title: None,
    genre_ids: None,
    video: None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_image_urls() {
    let movie = sample_movie(7, "Heat", 10.0);
    assert_eq!(
      movie.poster_url("https://image.tmdb.org/t/p/").as_deref(),
      Some("https://image.tmdb.org/t/p/w500/poster7.jpg")
    );
    assert_eq!(
      movie.backdrop_url("https://image.tmdb.org/t/p").as_deref(),
      Some("https://image.tmdb.org/t/p/w780/backdrop7.jpg")
    );
  }

  #[test]
  fn test_empty_path_has_no_url() {
    let mut movie = sample_movie(7, "Heat", 10.0);
    movie.poster_path = Some(String::new());
    movie.backdrop_path = None;
    assert_eq!(movie.poster_url("https://img"), None);
    assert_eq!(movie.backdrop_url("https://img"), None);
  }

  #[test]
  fn test_release_year() {
    let mut movie = sample_movie(1, "Heat", 1.0);
    assert_eq!(movie.release_year(), "2023");

    movie.release_date = Some("1995".to_string());
    assert_eq!(movie.release_year(), "1995");

    movie.release_date = Some(String::new());
    assert_eq!(movie.release_year(), "Unknown");

    movie.release_date = None;
    assert_eq!(movie.release_year(), "Unknown");
  }

  #[test]
  fn test_vote_label() {
    let movie = sample_movie(1, "Heat", 1.0);
    assert_eq!(movie.vote_label(), "7.5");
  }
}
