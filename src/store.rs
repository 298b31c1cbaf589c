//! Content store access.
//!
//! The diff core consumes blobs through the [`ContentStore`] trait: given a
//! descriptor, produce a readable blob stream. Two implementations ship with
//! the crate:
//!
//! - [`MemoryStore`], a digest-addressed in-memory map used by tests and
//!   embedders that assemble images programmatically;
//! - [`OciLayoutStore`], backed by an [OCI image layout] directory
//!   (`oci-layout`, `index.json`, `blobs/<alg>/<encoded>`), which is what the
//!   CLI reads.
//!
//! [OCI image layout]: https://github.com/opencontainers/image-spec/blob/main/image-layout.md

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};

use crate::error::{DiffError, Result};
use crate::mediatype;
use crate::oci::Descriptor;

/// Maps a descriptor to a readable blob stream.
///
/// Missing content must surface as [`DiffError::Unavailable`] so the walker
/// can distinguish absence from I/O failure.
pub trait ContentStore {
    /// Open the blob named by `desc` for streaming.
    fn open<'a>(&'a self, desc: &Descriptor) -> Result<Box<dyn Read + Send + 'a>>;

    /// Read the blob named by `desc` fully into memory.
    fn read_blob(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let mut reader = self.open(desc)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Compute the canonical `sha256:<hex>` digest of a byte slice.
pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

/// An in-memory, digest-addressed content store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a blob and return a descriptor addressing it.
    pub fn put(&mut self, media_type: &str, data: Vec<u8>) -> Descriptor {
        let digest = sha256_digest(&data);
        let size = data.len() as i64;
        self.blobs.insert(digest.clone(), data);
        Descriptor {
            media_type: media_type.to_owned(),
            digest,
            size,
            urls: None,
            annotations: None,
            data: None,
            platform: None,
            artifact_type: None,
        }
    }

    /// Remove a blob, e.g. to simulate missing content in tests.
    pub fn remove(&mut self, digest: &str) {
        self.blobs.remove(digest);
    }
}

impl ContentStore for MemoryStore {
    fn open<'a>(&'a self, desc: &Descriptor) -> Result<Box<dyn Read + Send + 'a>> {
        match self.blobs.get(&desc.digest) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(DiffError::Unavailable(format!(
                "blob {} not found",
                desc.digest
            ))),
        }
    }
}

/// A read-only content store over an OCI image layout directory.
#[derive(Debug)]
pub struct OciLayoutStore {
    root: PathBuf,
    root_descriptor: Descriptor,
    index_bytes: Vec<u8>,
}

impl OciLayoutStore {
    /// Open an image layout directory.
    ///
    /// The directory must contain an `oci-layout` marker file and an
    /// `index.json`. The index bytes are digested so the layout's implicit
    /// root can be addressed like any other blob.
    pub fn open_layout(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.join("oci-layout").is_file() {
            return Err(DiffError::Unavailable(format!(
                "{} is not an OCI image layout (missing oci-layout file)",
                root.display()
            )));
        }
        let index_bytes = std::fs::read(root.join("index.json"))?;
        let root_descriptor = Descriptor {
            media_type: mediatype::OCI_IMAGE_INDEX.to_owned(),
            digest: sha256_digest(&index_bytes),
            size: index_bytes.len() as i64,
            urls: None,
            annotations: None,
            data: None,
            platform: None,
            artifact_type: None,
        };
        Ok(Self {
            root,
            root_descriptor,
            index_bytes,
        })
    }

    /// Descriptor of the layout's `index.json`, served by this store.
    pub fn root_descriptor(&self) -> Descriptor {
        self.root_descriptor.clone()
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (alg, encoded) = digest.split_once(':').ok_or_else(|| {
            DiffError::Unavailable(format!("malformed digest {digest:?}"))
        })?;
        let alg_ok = !alg.is_empty()
            && alg
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"+._-".contains(&b));
        let enc_ok = !encoded.is_empty()
            && encoded.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'=' || b == b'_' || b == b'-');
        if !alg_ok || !enc_ok {
            return Err(DiffError::Unavailable(format!(
                "malformed digest {digest:?}"
            )));
        }
        Ok(self.root.join("blobs").join(alg).join(encoded))
    }
}

impl ContentStore for OciLayoutStore {
    fn open<'a>(&'a self, desc: &Descriptor) -> Result<Box<dyn Read + Send + 'a>> {
        if desc.digest == self.root_descriptor.digest {
            return Ok(Box::new(Cursor::new(self.index_bytes.clone())));
        }
        let path = self.blob_path(&desc.digest)?;
        match std::fs::File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                DiffError::Unavailable(format!("blob {} not found", desc.digest)),
            ),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        let desc = store.put(mediatype::OCI_IMAGE_CONFIG, b"{}".to_vec());
        assert_eq!(desc.size, 2);
        assert!(desc.digest.starts_with("sha256:"));
        assert_eq!(store.read_blob(&desc).unwrap(), b"{}");
    }

    #[test]
    fn test_memory_store_missing_is_unavailable() {
        let store = MemoryStore::new();
        let desc = Descriptor {
            media_type: mediatype::OCI_IMAGE_CONFIG.into(),
            digest: "sha256:0000000000000000000000000000000000000000000000000000000000000000"
                .into(),
            size: 0,
            urls: None,
            annotations: None,
            data: None,
            platform: None,
            artifact_type: None,
        };
        assert!(matches!(
            store.open(&desc),
            Err(DiffError::Unavailable(_))
        ));
    }

    #[test]
    fn test_layout_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oci-layout"), br#"{"imageLayoutVersion":"1.0.0"}"#)
            .unwrap();
        let blob = b"layer bytes".to_vec();
        let digest = sha256_digest(&blob);
        let hex = digest.strip_prefix("sha256:").unwrap();
        std::fs::create_dir_all(dir.path().join("blobs/sha256")).unwrap();
        std::fs::write(dir.path().join("blobs/sha256").join(hex), &blob).unwrap();
        let index = br#"{"schemaVersion":2,"manifests":[]}"#.to_vec();
        std::fs::write(dir.path().join("index.json"), &index).unwrap();

        let store = OciLayoutStore::open_layout(dir.path()).unwrap();
        let root = store.root_descriptor();
        assert_eq!(store.read_blob(&root).unwrap(), index);

        let desc = Descriptor {
            media_type: mediatype::OCI_IMAGE_LAYER.into(),
            digest,
            size: blob.len() as i64,
            urls: None,
            annotations: None,
            data: None,
            platform: None,
            artifact_type: None,
        };
        assert_eq!(store.read_blob(&desc).unwrap(), blob);
    }

    #[test]
    fn test_layout_store_rejects_traversal_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oci-layout"), b"{}").unwrap();
        std::fs::write(dir.path().join("index.json"), b"{}").unwrap();
        let store = OciLayoutStore::open_layout(dir.path()).unwrap();
        let desc = Descriptor {
            media_type: mediatype::OCI_IMAGE_LAYER.into(),
            digest: "sha256:../../etc/passwd".into(),
            size: 0,
            urls: None,
            annotations: None,
            data: None,
            platform: None,
            artifact_type: None,
        };
        assert!(matches!(store.open(&desc), Err(DiffError::Unavailable(_))));
    }
}
