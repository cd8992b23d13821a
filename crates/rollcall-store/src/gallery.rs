//! Identity gallery: name → embedding, synchronized with a JSON file.
//!
//! On disk the gallery is a JSON object mapping each identity name to an
//! object holding its embedding array. Every enrollment rewrites the whole
//! file and drops an audit JPEG of the enrolled face crop next to it.

use rollcall_core::{Embedding, IdentityRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed gallery file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("identity name must be non-empty and free of path separators")]
    InvalidName,
    #[error("failed to write face image {path}: {source}")]
    FaceImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face crop is empty; nothing to save")]
    EmptyFaceCrop,
}

/// On-disk shape of one gallery entry.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    embedding: Vec<f32>,
}

/// In-memory gallery backed by a JSON file and a face-image directory.
pub struct Gallery {
    records: Vec<IdentityRecord>,
    path: PathBuf,
    faces_dir: PathBuf,
}

impl Gallery {
    /// Load the gallery from disk.
    ///
    /// A missing file yields an empty gallery; a file that exists but does
    /// not parse is an error the caller treats as fatal at startup.
    pub fn load(path: impl Into<PathBuf>, faces_dir: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let path = path.into();
        let faces_dir = faces_dir.into();

        std::fs::create_dir_all(&faces_dir).map_err(|source| GalleryError::Io {
            path: faces_dir.clone(),
            source,
        })?;

        if !path.exists() {
            tracing::info!(path = %path.display(), "no gallery file; starting empty");
            return Ok(Self {
                records: Vec::new(),
                path,
                faces_dir,
            });
        }

        let text = std::fs::read_to_string(&path).map_err(|source| GalleryError::Io {
            path: path.clone(),
            source,
        })?;
        let stored: BTreeMap<String, StoredIdentity> =
            serde_json::from_str(&text).map_err(|source| GalleryError::Malformed {
                path: path.clone(),
                source,
            })?;

        let records = stored
            .into_iter()
            .map(|(name, entry)| IdentityRecord {
                name,
                embedding: Embedding {
                    values: entry.embedding,
                },
            })
            .collect::<Vec<_>>();

        tracing::info!(path = %path.display(), identities = records.len(), "gallery loaded");

        Ok(Self {
            records,
            path,
            faces_dir,
        })
    }

    /// Enroll an identity: update memory, rewrite the gallery file, and save
    /// the face crop as `<faces_dir>/<name>.jpg`.
    ///
    /// Names are unique: enrolling an existing name replaces its record both
    /// in memory and on disk. The image write happens after the gallery
    /// write and is not rolled back on failure.
    pub fn enroll(
        &mut self,
        name: &str,
        embedding: Embedding,
        face_crop: &[u8],
        crop_width: u32,
        crop_height: u32,
    ) -> Result<(), GalleryError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(GalleryError::InvalidName);
        }
        if face_crop.is_empty() || crop_width == 0 || crop_height == 0 {
            return Err(GalleryError::EmptyFaceCrop);
        }

        match self.records.iter_mut().find(|r| r.name == name) {
            Some(existing) => {
                tracing::info!(name, "re-enrolling existing identity; replacing record");
                existing.embedding = embedding;
            }
            None => self.records.push(IdentityRecord {
                name: name.to_string(),
                embedding,
            }),
        }

        self.save()?;
        self.save_face_image(name, face_crop, crop_width, crop_height)?;

        tracing::info!(name, identities = self.records.len(), "identity enrolled");
        Ok(())
    }

    /// Names of all enrolled identities, in gallery order.
    pub fn list_names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    /// All records, for matching.
    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Path the audit image for `name` is written to.
    pub fn face_image_path(&self, name: &str) -> PathBuf {
        self.faces_dir.join(format!("{name}.jpg"))
    }

    fn save(&self) -> Result<(), GalleryError> {
        let stored: BTreeMap<&str, StoredIdentity> = self
            .records
            .iter()
            .map(|r| {
                (
                    r.name.as_str(),
                    StoredIdentity {
                        embedding: r.embedding.values.clone(),
                    },
                )
            })
            .collect();

        let text = serde_json::to_string(&stored).map_err(|source| GalleryError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        write_all(&self.path, text.as_bytes())
    }

    fn save_face_image(
        &self,
        name: &str,
        crop: &[u8],
        width: u32,
        height: u32,
    ) -> Result<(), GalleryError> {
        let path = self.face_image_path(name);
        let img = image::GrayImage::from_raw(width, height, crop.to_vec())
            .ok_or(GalleryError::EmptyFaceCrop)?;
        img.save(&path).map_err(|source| {
            tracing::warn!(
                name,
                path = %path.display(),
                "face image write failed; gallery entry already persisted"
            );
            GalleryError::FaceImage { path: path.clone(), source }
        })
    }
}

fn write_all(path: &Path, bytes: &[u8]) -> Result<(), GalleryError> {
    std::fs::write(path, bytes).map_err(|source| GalleryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
