use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageEncoder, Rgb};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{InventoryError, Result};
use crate::models::CoverSize;

const JPEG_QUALITY: u8 = 85;
const PLACEHOLDER_FILE: &str = "none.jpg";

/// Derivative cover images keyed by book ID.
pub trait CoverStore: Send + Sync {
  /// Replaces all three derivatives with resized copies of `original`.
  fn put(&self, book_id: Uuid, original: &[u8]) -> Result<()>;

  /// Removes every derivative. Missing files are not an error.
  fn delete(&self, book_id: Uuid) -> Result<()>;

  /// JPEG bytes for one derivative, or a placeholder when none is stored.
  fn fetch(&self, book_id: Uuid, size: CoverSize) -> Result<Vec<u8>>;
}

/// Stores derivatives as `<id>-<l|m|s>.jpg` inside one directory.
#[derive(Debug, Clone)]
pub struct FsCoverStore {
  dir: PathBuf,
}

impl FsCoverStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    FsCoverStore { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path_for(&self, book_id: Uuid, size: CoverSize) -> PathBuf {
    self.dir.join(format!("{}-{}.jpg", book_id, size.suffix()))
  }

  /// Total bytes of all regular files below the covers directory.
  pub fn disk_usage(&self) -> Result<u64> {
    if !self.dir.exists() {
      return Ok(0);
    }
    let mut total = 0u64;
    for entry in WalkDir::new(&self.dir) {
      let entry = entry.map_err(|err| InventoryError::Cover(err.to_string()))?;
      if entry.file_type().is_file() {
        total += entry
          .metadata()
          .map_err(|err| InventoryError::Cover(err.to_string()))?
          .len();
      }
    }
    Ok(total)
  }

  fn placeholder(&self, size: CoverSize) -> Result<Vec<u8>> {
    match std::fs::read(self.dir.join(PLACEHOLDER_FILE)) {
      Ok(bytes) if !bytes.is_empty() => Ok(bytes),
      Ok(_) => generate_placeholder(size.width()),
      Err(err) if err.kind() == ErrorKind::NotFound => generate_placeholder(size.width()),
      Err(err) => Err(err.into()),
    }
  }
}

impl CoverStore for FsCoverStore {
  fn put(&self, book_id: Uuid, original: &[u8]) -> Result<()> {
    let image = image::load_from_memory(original)
      .map_err(|err| InventoryError::Cover(format!("unsupported cover image: {}", err)))?;
    if image.width() == 0 || image.height() == 0 {
      return Err(InventoryError::Cover("cover image is empty".to_string()));
    }
    std::fs::create_dir_all(&self.dir)?;

    for size in CoverSize::ALL {
      let bytes = match resize_to_jpeg(&image, size.width()) {
        Ok(bytes) => bytes,
        Err(err) => {
          let _ = self.delete(book_id);
          return Err(err);
        }
      };
      let path = self.path_for(book_id, size);
      if let Err(err) = std::fs::write(&path, bytes) {
        let _ = self.delete(book_id);
        return Err(err.into());
      }
    }
    log::info!("cover saved for book {} in {}", book_id, self.dir.display());
    Ok(())
  }

  fn delete(&self, book_id: Uuid) -> Result<()> {
    let mut failure: Option<std::io::Error> = None;
    for size in CoverSize::ALL {
      let path = self.path_for(book_id, size);
      match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
          log::warn!("failed to delete cover {}: {}", path.display(), err);
          failure.get_or_insert(err);
        }
      }
    }
    match failure {
      Some(err) => Err(err.into()),
      None => Ok(()),
    }
  }

  fn fetch(&self, book_id: Uuid, size: CoverSize) -> Result<Vec<u8>> {
    match std::fs::read(self.path_for(book_id, size)) {
      Ok(bytes) if !bytes.is_empty() => Ok(bytes),
      Ok(_) => self.placeholder(size),
      Err(err) if err.kind() == ErrorKind::NotFound => self.placeholder(size),
      Err(err) => Err(err.into()),
    }
  }
}

fn resize_to_jpeg(image: &DynamicImage, width: u32) -> Result<Vec<u8>> {
  let ratio = image.height() as f64 / image.width() as f64;
  let height = ((width as f64) * ratio).round().max(1.0) as u32;
  let resized = image.resize_exact(width, height, FilterType::Lanczos3).to_rgb8();
  encode_jpeg(&resized)
}

fn encode_jpeg(image: &ImageBuffer<Rgb<u8>, Vec<u8>>) -> Result<Vec<u8>> {
  let mut bytes: Vec<u8> = Vec::new();
  JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
    .write_image(
      image.as_raw(),
      image.width(),
      image.height(),
      image::ExtendedColorType::Rgb8,
    )
    .map_err(|err| InventoryError::Cover(format!("JPEG encode error: {}", err)))?;
  Ok(bytes)
}

/// Neutral 2:3 card with a framed border, used when a book has no cover.
fn generate_placeholder(width: u32) -> Result<Vec<u8>> {
  let width = width.max(40);
  let height = width * 3 / 2;
  let background = Rgb([250u8, 245, 235]);
  let border_color = Rgb([180u8, 160, 140]);
  let line_color = Rgb([160u8, 140, 120]);
  let border = (width / 50).max(2);
  let inner = border * 2 + 2;

  let mut img = ImageBuffer::from_pixel(width, height, background);
  for x in 0..width {
    for y in 0..height {
      if x < border || x >= width - border || y < border || y >= height - border {
        img.put_pixel(x, y, border_color);
      }
    }
  }
  for x in inner..(width - inner) {
    img.put_pixel(x, inner, line_color);
    img.put_pixel(x, height - inner - 1, line_color);
  }
  for y in inner..(height - inner) {
    img.put_pixel(inner, y, line_color);
    img.put_pixel(width - inner - 1, y, line_color);
  }
  encode_jpeg(&img)
}
