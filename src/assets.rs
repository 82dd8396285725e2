//! Map image loading
//!
//! [`ImageLoader`] is an explicitly managed service: it must be initialised
//! before use and can be torn down to release its cache. Loaded images are
//! shared through `Arc` so repeated renders of one map do not decode twice.

use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{MapError, Result};
use crate::export::from_data_uri;

#[derive(Debug, Default)]
pub struct ImageLoader {
    ready: bool,
    cache: HashMap<PathBuf, Arc<RgbaImage>>,
}

impl ImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self) {
        if !self.ready {
            info!("Image loader initialised");
        }
        self.ready = true;
    }

    /// Drop every cached image; the loader refuses work until re-initialised
    pub fn teardown(&mut self) {
        if self.ready {
            info!("Image loader torn down, {} cached images released", self.cache.len());
        }
        self.cache.clear();
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(MapError::loader("image loader is not initialised"))
        }
    }

    /// Decode an image file, reusing the cached copy for repeated paths
    pub fn load_path(&mut self, path: &Path) -> Result<Arc<RgbaImage>> {
        self.ensure_ready()?;
        if let Some(img) = self.cache.get(path) {
            debug!("Image cache hit for {}", path.display());
            return Ok(Arc::clone(img));
        }
        let img = Arc::new(image::open(path)?.to_rgba8());
        debug!(
            "Loaded {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        self.cache.insert(path.to_path_buf(), Arc::clone(&img));
        Ok(img)
    }

    /// Decode encoded image bytes (JPEG, PNG)
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<RgbaImage> {
        self.ensure_ready()?;
        Ok(image::load_from_memory(bytes)?.to_rgba8())
    }

    /// Decode a `data:image/...;base64,` URI
    pub fn decode_data_uri(&self, uri: &str) -> Result<RgbaImage> {
        self.ensure_ready()?;
        self.decode_bytes(&from_data_uri(uri)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{encode_image, to_data_uri, OutputFormat};
    use image::Rgba;

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        encode_image(&img, OutputFormat::Png, 80).unwrap()
    }

    #[test]
    fn test_uninitialised_loader_refuses_work() {
        let loader = ImageLoader::new();
        assert!(!loader.is_ready());
        assert!(matches!(loader.decode_bytes(&png_bytes()), Err(MapError::Loader(_))));
    }

    #[test]
    fn test_decode_data_uri() {
        let mut loader = ImageLoader::new();
        loader.init();
        let uri = to_data_uri(&png_bytes(), OutputFormat::Png);
        let img = loader.decode_data_uri(&uri).unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(*img.get_pixel(0, 0), Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn test_load_path_caches_until_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.png");
        std::fs::write(&path, png_bytes()).unwrap();

        let mut loader = ImageLoader::new();
        assert!(loader.load_path(&path).is_err());

        loader.init();
        let a = loader.load_path(&path).unwrap();
        let b = loader.load_path(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.cached(), 1);

        loader.teardown();
        assert_eq!(loader.cached(), 0);
        assert!(loader.load_path(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut loader = ImageLoader::new();
        loader.init();
        assert!(loader.load_path(Path::new("/nonexistent/map.jpg")).is_err());
    }
}
