//! Media type constants and classification predicates.
//!
//! The walker dispatches on the media type of each descriptor. Both OCI and
//! Docker v2 schema 2 media types are recognized; layer types are matched by
//! prefix so compression suffixes and foreign-layer variants classify
//! correctly.

/// OCI image index.
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// OCI image manifest.
pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image configuration.
pub const OCI_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// OCI tar layer, uncompressed.
pub const OCI_IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// OCI tar layer, gzip-compressed.
pub const OCI_IMAGE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// OCI tar layer, zstd-compressed.
pub const OCI_IMAGE_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";

/// Docker schema 2 manifest list.
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Docker schema 2 manifest.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker image configuration.
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";

/// Docker gzip-compressed tar layer.
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

const OCI_LAYER_PREFIX: &str = "application/vnd.oci.image.layer.";
const DOCKER_LAYER_PREFIX: &str = "application/vnd.docker.image.rootfs.";

/// True for multi-platform index media types (OCI index, Docker manifest list).
pub fn is_index_type(media_type: &str) -> bool {
    matches!(media_type, OCI_IMAGE_INDEX | DOCKER_MANIFEST_LIST)
}

/// True for single-platform manifest media types.
pub fn is_manifest_type(media_type: &str) -> bool {
    matches!(media_type, OCI_IMAGE_MANIFEST | DOCKER_MANIFEST)
}

/// True for image configuration media types.
pub fn is_config_type(media_type: &str) -> bool {
    matches!(media_type, OCI_IMAGE_CONFIG | DOCKER_CONFIG)
}

/// True for layer media types, including compressed and foreign variants.
pub fn is_layer_type(media_type: &str) -> bool {
    media_type.starts_with(OCI_LAYER_PREFIX) || media_type.starts_with(DOCKER_LAYER_PREFIX)
}
