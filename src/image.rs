//! Image lookup.
//!
//! Pulling images is somebody else's job; the lifecycle manager only needs
//! the local file a root volume can be layered on.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Maps image references to local image files.
pub trait ImageResolver: Send + Sync {
    /// Local path of `image`, or `ImageNotFound`.
    fn resolve(&self, image: &str) -> Result<PathBuf>;
}

/// Resolves images to `<dir>/<sanitized reference>.qcow2`.
#[derive(Debug, Clone)]
pub struct DirectoryImageResolver {
    dir: PathBuf,
}

impl DirectoryImageResolver {
    /// Look for images in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name an image reference maps to.
    ///
    /// `docker.io/library/cirros:0.4` becomes `docker.io_library_cirros_0.4.qcow2`.
    pub fn file_name(image: &str) -> String {
        let stripped = image.split_once("://").map(|(_, rest)| rest).unwrap_or(image);
        let sanitized: String = stripped
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}.qcow2", sanitized)
    }

    /// Directory searched.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageResolver for DirectoryImageResolver {
    fn resolve(&self, image: &str) -> Result<PathBuf> {
        if image.trim().is_empty() {
            return Err(Error::validation("empty image reference"));
        }
        let path = self.dir.join(Self::file_name(image));
        if !path.is_file() {
            tracing::debug!(image = %image, path = %path.display(), "image not present");
            return Err(Error::ImageNotFound(image.to_string()));
        }
        Ok(path)
    }
}

/// Fixed reference-to-path table.
#[derive(Debug, Clone, Default)]
pub struct StaticImageResolver {
    images: HashMap<String, PathBuf>,
}

impl StaticImageResolver {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image.
    pub fn with_image(mut self, image: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.images.insert(image.into(), path.into());
        self
    }
}

impl ImageResolver for StaticImageResolver {
    fn resolve(&self, image: &str) -> Result<PathBuf> {
        self.images
            .get(image)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(image.to_string()))
    }
}
