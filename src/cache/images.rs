//! On-disk store for downloaded poster and backdrop images.

use color_eyre::{eyre::eyre, Result};
use image::codecs::jpeg::JpegEncoder;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::tmdb::ImageKind;

const JPEG_QUALITY: u8 = 80;

/// Suffix counter for in-flight temporary files
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Image files keyed by (movie id, kind).
///
/// Every key maps to exactly one file, so writes to different keys never
/// conflict and writes to the same key are last-write-wins. Failures are
/// logged and reported as absence, never as errors.
#[derive(Clone)]
pub struct ImageStore {
  root: PathBuf,
  http: reqwest::Client,
}

impl ImageStore {
  /// Open the store rooted at `root`, creating the directory if needed.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(60))
      .build()
      .map_err(|e| eyre!("Failed to build image HTTP client: {}", e))?;
    Self::with_client(root, http)
  }

  pub fn with_client(root: impl Into<PathBuf>, http: reqwest::Client) -> Result<Self> {
    let root = root.into();
    std::fs::create_dir_all(&root)
      .map_err(|e| eyre!("Failed to create image directory {}: {}", root.display(), e))?;
    Ok(Self { root, http })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_for(&self, id: i64, kind: ImageKind) -> PathBuf {
    self.root.join(format!("movie_{}_{}.jpg", id, kind))
  }

  pub async fn has(&self, id: i64, kind: ImageKind) -> bool {
    tokio::fs::try_exists(self.path_for(id, kind))
      .await
      .unwrap_or(false)
  }

  /// Stored bytes for a key; `None` if absent or not a decodable image.
  pub async fn get(&self, id: i64, kind: ImageKind) -> Option<Vec<u8>> {
    let bytes = match tokio::fs::read(self.path_for(id, kind)).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => return None,
      Err(e) => {
        tracing::warn!(id, %kind, error = %e, "failed to read stored image");
        return None;
      }
    };

    let valid = tokio::task::spawn_blocking({
      let bytes = bytes.clone();
      move || image::load_from_memory(&bytes).is_ok()
    })
    .await
    .unwrap_or(false);

    if valid {
      Some(bytes)
    } else {
      tracing::warn!(id, %kind, "stored image is corrupt");
      None
    }
  }

  /// Write `bytes` for a key, replacing any previous file.
  pub async fn put(&self, id: i64, kind: ImageKind, bytes: &[u8]) {
    let path = self.path_for(id, kind);
    let tmp = self.root.join(format!(
      ".movie_{}_{}.{}.tmp",
      id,
      kind,
      TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let result = async {
      tokio::fs::write(&tmp, bytes).await?;
      tokio::fs::rename(&tmp, &path).await
    }
    .await;

    match result {
      Ok(()) => tracing::debug!(id, %kind, size = bytes.len(), "stored image"),
      Err(e) => {
        tracing::warn!(id, %kind, error = %e, "failed to store image");
        let _ = tokio::fs::remove_file(&tmp).await;
      }
    }
  }

  /// Delete the file for a key. Absent keys are not an error.
  pub async fn remove(&self, id: i64, kind: ImageKind) {
    match tokio::fs::remove_file(self.path_for(id, kind)).await {
      Ok(()) => tracing::debug!(id, %kind, "removed image"),
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => tracing::warn!(id, %kind, error = %e, "failed to remove image"),
    }
  }

  /// Delete every asset belonging to a movie.
  pub async fn remove_all(&self, id: i64) {
    for kind in ImageKind::ALL {
      self.remove(id, kind).await;
    }
  }

  /// Delete every stored file.
  pub async fn clear(&self) {
    let mut entries = match tokio::fs::read_dir(&self.root).await {
      Ok(entries) => entries,
      Err(e) => {
        tracing::warn!(error = %e, "failed to list image directory");
        return;
      }
    };

    let mut removed = 0usize;
    loop {
      match entries.next_entry().await {
        Ok(Some(entry)) => {
          if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove image");
          } else {
            removed += 1;
          }
        }
        Ok(None) => break,
        Err(e) => {
          tracing::warn!(error = %e, "failed to read image directory entry");
          break;
        }
      }
    }
    tracing::info!(removed, "cleared stored images");
  }

  /// Fetch an image, check that it decodes, and persist it.
  ///
  /// Returns the stored bytes, or `None` on an invalid URL, a transport or
  /// HTTP failure, or an undecodable payload.
  pub async fn download_and_store(&self, url: &str, id: i64, kind: ImageKind) -> Option<Vec<u8>> {
    let url = match Url::parse(url) {
      Ok(url) => url,
      Err(e) => {
        tracing::warn!(id, %kind, url, error = %e, "invalid image URL");
        return None;
      }
    };

    let payload = match self.fetch(url).await {
      Ok(payload) => payload,
      Err(e) => {
        tracing::warn!(id, %kind, error = %e, "failed to download image");
        return None;
      }
    };

    let encoded = tokio::task::spawn_blocking(move || reencode_jpeg(&payload))
      .await
      .ok()
      .flatten();

    match encoded {
      Some(bytes) => {
        self.put(id, kind, &bytes).await;
        Some(bytes)
      }
      None => {
        tracing::warn!(id, %kind, "downloaded payload is not an image");
        None
      }
    }
  }

  async fn fetch(&self, url: Url) -> reqwest::Result<Vec<u8>> {
    let response = self.http.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
  }
}

/// Decode any supported image format and encode it as JPEG.
fn reencode_jpeg(payload: &[u8]) -> Option<Vec<u8>> {
  let decoded = image::load_from_memory(payload).ok()?;
  let rgb = image::DynamicImage::ImageRgb8(decoded.to_rgb8());

  let mut out = Vec::new();
  rgb
    .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
    .ok()?;
  Some(out)
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
  let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 40, 40]));
  let mut buf = std::io::Cursor::new(Vec::new());
  image::DynamicImage::ImageRgb8(img)
    .write_to(&mut buf, image::ImageFormat::Png)
    .unwrap();
  buf.into_inner()
}
