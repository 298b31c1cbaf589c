//! Bounded blob reads.
//!
//! JSON blobs (index, manifest, config) are fully read and parsed; layer
//! blobs are streamed through decompression into the tar reader. Both paths
//! enforce the hard limits that bound memory and disk use.

use std::io::Read;

use serde::de::DeserializeOwned;

use crate::compression::{self, LimitReader};
use crate::error::{DiffError, Result};
use crate::oci::Descriptor;
use crate::store::ContentStore;

/// Maximum entries accepted in an index's `manifests` list.
pub const MAX_MANIFESTS: usize = 4096;

/// Maximum entries accepted in a manifest's `layers` list.
pub const MAX_LAYERS: usize = 4096;

/// Maximum size of a JSON blob (index, manifest, config).
pub const MAX_JSON_BLOB_SIZE: i64 = 1024 * 1024;

/// Maximum on-disk size of a (possibly compressed) layer blob.
pub const MAX_TAR_BLOB_SIZE: i64 = 4 * 1024 * 1024 * 1024;

/// Maximum decompressed size of a layer tar stream.
pub const MAX_TAR_STREAM_SIZE: u64 = 32 * 1024 * 1024 * 1024;

/// Read and parse a JSON blob of type `T`.
///
/// Fails with [`DiffError::OverLimit`] when the descriptor's size exceeds
/// [`MAX_JSON_BLOB_SIZE`], and [`DiffError::Parse`] when the body does not
/// decode; `what` names the blob kind in errors.
pub fn read_json_blob<T: DeserializeOwned>(
    store: &dyn ContentStore,
    desc: &Descriptor,
    what: &str,
) -> Result<T> {
    if desc.size > MAX_JSON_BLOB_SIZE {
        return Err(DiffError::OverLimit(format!(
            "JSON blob ({} > {} bytes)",
            desc.size, MAX_JSON_BLOB_SIZE
        )));
    }
    let body = store.read_blob(desc)?;
    serde_json::from_slice(&body).map_err(|source| DiffError::Parse {
        what: what.to_owned(),
        source,
    })
}

/// Open a layer blob as a decompressed, size-bounded byte stream.
///
/// The stored blob is bounded by [`MAX_TAR_BLOB_SIZE`] (checked against the
/// descriptor) and the decompressed stream by [`MAX_TAR_STREAM_SIZE`]
/// (enforced by a reader that errors past the bound).
pub fn open_tar_stream<'a>(
    store: &'a dyn ContentStore,
    desc: &Descriptor,
) -> Result<Box<dyn Read + 'a>> {
    if desc.size > MAX_TAR_BLOB_SIZE {
        return Err(DiffError::OverLimit(format!(
            "tar blob ({} > {} bytes)",
            desc.size, MAX_TAR_BLOB_SIZE
        )));
    }
    let raw = store.open(desc)?;
    let decompressed = compression::decompress(raw)?;
    Ok(Box::new(LimitReader::new(
        decompressed,
        MAX_TAR_STREAM_SIZE,
        "decompressed tar stream",
    )))
}
