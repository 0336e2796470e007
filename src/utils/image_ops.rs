use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// A failed blocking task surfaces as an I/O-flavored image error.
fn join_error(e: tokio::task::JoinError) -> image::ImageError {
    image::ImageError::IoError(std::io::Error::other(e))
}

/// Asynchronously decode an image using spawn_blocking to avoid blocking the
/// async runtime. Decoding is CPU-intensive, especially for large scans.
pub async fn load_image_from_memory_async(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let bytes = bytes.to_vec(); // Clone to move into blocking task
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .unwrap_or_else(|e| Err(join_error(e)))
}

/// Asynchronously encode an image to PNG bytes using spawn_blocking.
pub async fn encode_png_async(img: DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    tokio::task::spawn_blocking(move || {
        let mut png_bytes = Vec::new();
        let mut cursor = Cursor::new(&mut png_bytes);
        img.write_to(&mut cursor, ImageFormat::Png)?;
        Ok(png_bytes)
    })
    .await
    .unwrap_or_else(|e| Err(join_error(e)))
}

/// Downscale an image so that neither dimension exceeds `max_dim`, preserving
/// aspect ratio. Images that already fit are returned untouched.
///
/// Returns the (possibly resized) image and whether it was downscaled.
pub fn downscale_to_fit(img: DynamicImage, max_dim: u32) -> (DynamicImage, bool) {
    if img.width() <= max_dim && img.height() <= max_dim {
        return (img, false);
    }
    (img.thumbnail(max_dim, max_dim), true)
}
