use std::path::Path;
use image::DynamicImage;

use crate::error::{Error, Result};

pub const DEFAULT_SIZE: (u32, u32) = (150, 150);

/// Writes a JPEG thumbnail of `source` that fits inside `size`, keeping aspect ratio.
pub fn generate(source: &Path, dest: &Path, size: (u32, u32)) -> Result<()> {
    let img = image::open(source).map_err(|e| Error::Thumbnail {
        path: source.to_path_buf(),
        source: e,
    })?;

    // JPEG has no alpha channel
    let thumb = DynamicImage::ImageRgb8(img.thumbnail(size.0, size.1).to_rgb8());
    thumb.save(dest).map_err(|e| Error::Thumbnail {
        path: dest.to_path_buf(),
        source: e,
    })
}
