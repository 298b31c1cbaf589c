#![deny(unsafe_code)]
//! Semantic comparison of OCI/Docker container images.
//!
//! This library walks two container image trees (index → manifests →
//! config + layers → tar entries) in lockstep and reports every semantic
//! difference between them as a tree of mismatch events. It is built for
//! reproducible-build auditing: cosmetic differences (timestamps,
//! annotation keys, tar encoder quirks, redundant file-mode bits, layer
//! squashing) can be masked so only meaningful divergence remains.
//!
//! # Overview
//!
//! Images are read from a [`ContentStore`], which maps content descriptors
//! to blob streams. The walker dispatches on media type, compares peer
//! fields with negligible-field masking driven by [`IgnoranceOptions`], and
//! recurses into composite fields with child descriptors. Layer blobs are
//! decompressed (gzip/zstd autodetected) and compared entry-by-entry; when
//! the two images split their filesystems into different layer counts, each
//! side's layers are virtually concatenated ("squashed") and compared as
//! one stream.
//!
//! Every difference becomes an [`Event`] in an [`EventTreeNode`] tree whose
//! contexts mirror the walk (`/manifests-0/layers-3/layer/tarentry`).
//! Handlers observe events as they are raised; the default handler prints
//! one aligned row per leaf mismatch.
//!
//! # Example
//!
//! ```no_run
//! use ocidiff::{diff, IgnoranceOptions, MatchAny, OciLayoutStore, Options};
//!
//! let store = OciLayoutStore::open_layout("./image-a")?;
//! let other = OciLayoutStore::open_layout("./image-b")?;
//! # let _ = &other;
//! let opts = Options {
//!     ignorance: IgnoranceOptions::semantic(),
//!     ..Default::default()
//! };
//! // Both roots must live in one content store; see the CLI for the
//! // two-layout case.
//! let outcome = diff(
//!     &store,
//!     [store.root_descriptor(), store.root_descriptor()],
//!     &MatchAny,
//!     &opts,
//! )?;
//! assert!(!outcome.has_differences());
//! # Ok::<(), ocidiff::DiffError>(())
//! ```
//!
//! # Bounds
//!
//! Hard limits protect memory and disk: 4096 manifests, 4096 layers, 1 MiB
//! JSON blobs, 4 GiB compressed layer blobs, 32 GiB decompressed tar
//! streams. Exceeding any of them is a fatal error for the affected
//! subtree.

// Blob and store access
pub mod blob;
pub mod compression;
pub mod mediatype;
pub mod store;

// OCI data model and platform selection
pub mod oci;
pub mod platform;

// Comparison core
pub mod compare;
pub mod diff;
pub mod error;
pub mod event;
pub mod report;
pub mod tar_stream;
pub mod untar;

// Re-export commonly used types
pub use diff::{diff, CancelToken, DiffOutcome, IgnoranceOptions, Options};
pub use error::{join_errors, DiffError, Result};
pub use event::{
    default_event_handler, set_default_event_handler, Event, EventHandler, EventInput,
    EventTreeNode, EventType, TableEventHandler, VerboseEventHandler,
};
pub use oci::{
    Annotations, Descriptor, History, ImageConfig, ImageIndex, ImageManifest, Platform, RootFs,
};
pub use platform::{format_platform, parse_platform, MatchAny, MatchSet, PlatformMatcher};
pub use store::{sha256_digest, ContentStore, MemoryStore, OciLayoutStore};
pub use tar_stream::{TarEntry, TarFormat, TarHeader};
