//! Image store: a flat directory of qcow2 and raw disk images, named by
//! file stem.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{HypervisorError, Result};
use crate::types::DiskFormat;

/// An image available for deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    /// File stem, used to reference the image
    pub name: String,
    pub format: DiskFormat,
    pub path: PathBuf,
}

/// Image store backed by a directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every regular file in the store as `(stem, extension, path)`.
    fn scan(&self) -> Result<Vec<(String, String, PathBuf)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| HypervisorError::io(format!("Failed to read {}", self.dir.display()), e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| HypervisorError::io(format!("Failed to read {}", self.dir.display()), e))?
                .path();
            if !path.is_file() {
                continue;
            }
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|e| e.to_str()),
            ) else {
                continue;
            };
            files.push((stem.to_string(), ext.to_string(), path.clone()));
        }
        Ok(files)
    }

    /// List images sorted by name. Files whose extension is not a known
    /// disk format are left out.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        let mut images: Vec<ImageEntry> = self
            .scan()?
            .into_iter()
            .filter_map(|(name, ext, path)| {
                let format = DiskFormat::from_extension(&ext).ok()?;
                Some(ImageEntry { name, format, path })
            })
            .collect();

        images.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        Ok(images)
    }

    /// Resolve an image name to its entry.
    pub fn resolve(&self, name: &str) -> Result<ImageEntry> {
        let files: Vec<_> = self
            .scan()?
            .into_iter()
            .filter(|(stem, _, _)| stem == name)
            .collect();

        let mut images = Vec::new();
        let mut unsupported = None;
        for (stem, ext, path) in files {
            match DiskFormat::from_extension(&ext) {
                Ok(format) => images.push(ImageEntry { name: stem, format, path }),
                Err(e) => unsupported = Some(e),
            }
        }

        match images.len() {
            1 => Ok(images.remove(0)),
            0 => Err(unsupported.unwrap_or_else(|| HypervisorError::ImageNotFound(name.to_string()))),
            _ => {
                images.sort_by(|a, b| a.path.cmp(&b.path));
                let paths: Vec<_> = images.iter().map(|i| i.path.display().to_string()).collect();
                Err(HypervisorError::AmbiguousImage(name.to_string(), paths.join(", ")))
            }
        }
    }

    /// Copy an image file into the store.
    #[instrument(skip(self), fields(source = %source.display()))]
    pub fn add(&self, source: &Path) -> Result<ImageEntry> {
        if !source.is_file() {
            return Err(HypervisorError::ImageNotFound(source.display().to_string()));
        }

        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let format = DiskFormat::from_extension(ext)?;
        let name = source
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HypervisorError::InvalidRequest(format!("invalid image file name {}", source.display())))?;

        if self.list()?.iter().any(|image| image.name == name) {
            return Err(HypervisorError::AlreadyExists(format!("Image {}", name)));
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            HypervisorError::io(format!("Failed to create {}", self.dir.display()), e)
        })?;
        let dest = self.dir.join(format!("{}.{}", name, ext));
        std::fs::copy(source, &dest).map_err(|e| {
            HypervisorError::io(format!("Failed to copy image to {}", dest.display()), e)
        })?;

        info!(name, dest = %dest.display(), "Image added");
        Ok(ImageEntry {
            name: name.to_string(),
            format,
            path: dest,
        })
    }

    /// Remove an image by name.
    #[instrument(skip(self))]
    pub fn remove(&self, name: &str) -> Result<()> {
        let image = self.resolve(name)?;
        std::fs::remove_file(&image.path).map_err(|e| {
            HypervisorError::io(format!("Failed to remove {}", image.path.display()), e)
        })?;
        info!(name, "Image removed");
        Ok(())
    }
}
