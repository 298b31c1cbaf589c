//! Structural comparison with negligible-field masking.
//!
//! Each JSON-derived structure gets a hand-written comparator over its
//! fields; the set of fields skipped ("negligible") is computed from the
//! active ignorance options and the node type. The produced diff strings are
//! human-readable renderings (`field: a != b` per line) and are explicitly
//! not machine-parsable; only the equal/not-equal decision is contractual.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::diff::IgnoranceOptions;
use crate::oci::{
    Annotations, Descriptor, History, ImageConfig, ImageIndex, ImageManifest,
    ANNOTATION_CREATED, ANNOTATION_IMAGE_NAME, ANNOTATION_REF_NAME,
};
use crate::tar_stream::TarEntry;

/// Accumulates per-field difference lines.
#[derive(Debug, Default)]
struct FieldDiffs {
    lines: Vec<String>,
}

impl FieldDiffs {
    fn field<T: PartialEq + Serialize>(&mut self, name: &str, a: &T, b: &T) {
        if a != b {
            self.lines
                .push(format!("{name}: {} != {}", render(a), render(b)));
        }
    }

    fn finish(self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.join("\n"))
        }
    }
}

fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unrenderable>".to_owned())
}

/// Which descriptor fields to mask.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DescriptorMask {
    /// Skip `annotations` (they are descended separately).
    pub annotations: bool,
    /// Skip `digest` and `data`.
    pub digest: bool,
    /// Skip `size`.
    pub size: bool,
}

impl DescriptorMask {
    /// The mask used on the normal walk path.
    pub(crate) fn from_options(opts: &IgnoranceOptions) -> Self {
        Self {
            annotations: true,
            digest: opts.digest_may_change(),
            size: opts.size_may_change(),
        }
    }

    /// No masking; used for the unknown-media-type fallback diff.
    pub(crate) fn full() -> Self {
        Self::default()
    }
}

pub(crate) fn diff_descriptor(a: &Descriptor, b: &Descriptor, mask: DescriptorMask) -> Option<String> {
    let mut d = FieldDiffs::default();
    d.field("mediaType", &a.media_type, &b.media_type);
    if !mask.digest {
        d.field("digest", &a.digest, &b.digest);
        d.field("data", &a.data, &b.data);
    }
    if !mask.size {
        d.field("size", &a.size, &b.size);
    }
    d.field("urls", &a.urls, &b.urls);
    if !mask.annotations {
        d.field("annotations", &a.annotations, &b.annotations);
    }
    d.field("platform", &a.platform, &b.platform);
    d.field("artifactType", &a.artifact_type, &b.artifact_type);
    d.finish()
}

pub(crate) fn diff_index(a: &ImageIndex, b: &ImageIndex, opts: &IgnoranceOptions) -> Option<String> {
    let composite_masked = opts.digest_may_change();
    let mut d = FieldDiffs::default();
    d.field("schemaVersion", &a.schema_version, &b.schema_version);
    d.field("mediaType", &a.media_type, &b.media_type);
    d.field("artifactType", &a.artifact_type, &b.artifact_type);
    if !composite_masked {
        d.field("manifests", &a.manifests, &b.manifests);
        d.field("subject", &a.subject, &b.subject);
        d.field("annotations", &a.annotations, &b.annotations);
    }
    d.finish()
}

pub(crate) fn diff_manifest(
    a: &ImageManifest,
    b: &ImageManifest,
    opts: &IgnoranceOptions,
) -> Option<String> {
    let composite_masked = opts.digest_may_change();
    let mut d = FieldDiffs::default();
    d.field("schemaVersion", &a.schema_version, &b.schema_version);
    d.field("mediaType", &a.media_type, &b.media_type);
    d.field("artifactType", &a.artifact_type, &b.artifact_type);
    if !composite_masked {
        d.field("config", &a.config, &b.config);
        d.field("layers", &a.layers, &b.layers);
        d.field("subject", &a.subject, &b.subject);
        d.field("annotations", &a.annotations, &b.annotations);
    }
    d.finish()
}

pub(crate) fn diff_config(a: &ImageConfig, b: &ImageConfig, opts: &IgnoranceOptions) -> Option<String> {
    let mut d = FieldDiffs::default();
    if !opts.ignore_timestamps {
        d.field("created", &a.created, &b.created);
    }
    d.field("author", &a.author, &b.author);
    d.field("architecture", &a.architecture, &b.architecture);
    d.field("os", &a.os, &b.os);
    d.field("os.version", &a.os_version, &b.os_version);
    d.field("os.features", &a.os_features, &b.os_features);
    d.field("variant", &a.variant, &b.variant);
    d.field("config", &a.config, &b.config);
    if !opts.digest_may_change() {
        d.field("rootfs", &a.rootfs, &b.rootfs);
    }
    if !opts.ignore_timestamps && !opts.ignore_history {
        d.field("history", &a.history, &b.history);
    }
    d.finish()
}

/// Partial rootfs comparison used when diff IDs are masked: only the type
/// field remains comparable.
pub(crate) fn diff_rootfs_partial(a: &ImageConfig, b: &ImageConfig) -> Option<String> {
    let mut d = FieldDiffs::default();
    d.field("rootfs.type", &a.rootfs.typ, &b.rootfs.typ);
    d.finish()
}

pub(crate) fn diff_history_entry(a: &History, b: &History, ignore_created: bool) -> Option<String> {
    let mut d = FieldDiffs::default();
    if !ignore_created {
        d.field("created", &a.created, &b.created);
    }
    d.field("created_by", &a.created_by, &b.created_by);
    d.field("author", &a.author, &b.author);
    d.field("comment", &a.comment, &b.comment);
    d.field("empty_layer", &a.empty_layer, &b.empty_layer);
    d.finish()
}

/// Annotation keys considered negligible under the active options.
pub(crate) fn negligible_annotation_keys(opts: &IgnoranceOptions) -> BTreeSet<&'static str> {
    let mut keys = BTreeSet::new();
    if opts.ignore_timestamps {
        keys.insert(ANNOTATION_CREATED);
    }
    if opts.ignore_image_name {
        keys.insert(ANNOTATION_IMAGE_NAME);
        keys.insert(ANNOTATION_REF_NAME);
    }
    keys
}

/// Compare two annotation maps, skipping negligible keys.
///
/// When any key is negligible, an absent map is treated as an empty one
/// (absent and empty are indistinguishable after filtering); otherwise an
/// absent map differs from a present one, empty or not.
pub(crate) fn diff_annotations(
    a: Option<&Annotations>,
    b: Option<&Annotations>,
    negligible: &BTreeSet<&'static str>,
) -> Option<String> {
    if negligible.is_empty() && a.is_none() != b.is_none() {
        let mut d = FieldDiffs::default();
        d.field("annotations", &a, &b);
        return d.finish();
    }
    let empty = Annotations::new();
    let a = a.unwrap_or(&empty);
    let b = b.unwrap_or(&empty);
    let mut d = FieldDiffs::default();
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for key in keys {
        if negligible.contains(key.as_str()) {
            continue;
        }
        let va = a.get(key);
        let vb = b.get(key);
        if va != vb {
            d.field(&format!("annotation {key:?}"), &va, &vb);
        }
    }
    d.finish()
}

/// Keys of PAX records that carry timestamps.
const PAX_TIME_KEYS: [&str; 3] = ["mtime", "atime", "ctime"];

/// Compare a captured tar-entry pair under the active options.
pub(crate) fn diff_tar_entry(a: &TarEntry, b: &TarEntry, opts: &IgnoranceOptions) -> Option<String> {
    let mut d = FieldDiffs::default();

    if !opts.ignore_file_order {
        d.field("index", &a.index, &b.index);
    }

    let ha = &a.header;
    let hb = &b.header;
    d.field("name", &ha.name, &hb.name);
    d.field("typeflag", &ha.typeflag, &hb.typeflag);
    let (mode_a, mode_b) = if opts.ignore_file_mode_redundant_bits {
        (ha.mode & 0x0fff, hb.mode & 0x0fff)
    } else {
        (ha.mode, hb.mode)
    };
    d.field("mode", &mode_a, &mode_b);
    d.field("uid", &ha.uid, &hb.uid);
    d.field("gid", &ha.gid, &hb.gid);
    d.field("size", &ha.size, &hb.size);
    if !opts.ignore_timestamps {
        d.field("modTime", &ha.mod_time, &hb.mod_time);
        d.field("accessTime", &ha.access_time, &hb.access_time);
        d.field("changeTime", &ha.change_time, &hb.change_time);
    }
    d.field("linkname", &ha.linkname, &hb.linkname);
    d.field("uname", &ha.uname, &hb.uname);
    d.field("gname", &ha.gname, &hb.gname);
    d.field("devMajor", &ha.dev_major, &hb.dev_major);
    d.field("devMinor", &ha.dev_minor, &hb.dev_minor);
    if opts.ignore_timestamps {
        let filter = |records: &std::collections::BTreeMap<String, String>| {
            records
                .iter()
                .filter(|(k, _)| !PAX_TIME_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<std::collections::BTreeMap<_, _>>()
        };
        d.field("paxRecords", &filter(&ha.pax_records), &filter(&hb.pax_records));
    } else {
        d.field("paxRecords", &ha.pax_records, &hb.pax_records);
    }
    d.field("format", &ha.format, &hb.format);
    d.field("digest", &a.digest, &b.digest);
    d.finish()
}
