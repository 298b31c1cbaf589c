//! End-to-end diff scenarios over synthetic images.
//!
//! Images are assembled in a [`MemoryStore`]: gzip-compressed tar layers,
//! config and manifest JSON, and a single-entry index per image. The tests
//! cover the identity/monotonicity/round-trip laws and the concrete
//! timestamp, file-order, mode-bit, extra-file, and squashing scenarios.

use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use ocidiff::{
    diff, mediatype, sha256_digest, ContentStore, Descriptor, DiffError, EventHandler,
    EventTreeNode, EventType, IgnoranceOptions, MatchAny, MemoryStore, Options,
};
use serde_json::json;

/// Swallows events so tests do not write to stdout.
struct NullHandler;

impl EventHandler for NullHandler {
    fn handle(&self, _node: &EventTreeNode) -> ocidiff::Result<()> {
        Ok(())
    }
}

fn quiet_options(ignorance: IgnoranceOptions) -> Options {
    Options {
        ignorance,
        event_handler: Some(Arc::new(NullHandler)),
        ..Default::default()
    }
}

#[derive(Clone)]
struct FileSpec {
    name: &'static str,
    data: &'static [u8],
    mode: u32,
    mtime: u64,
    directory: bool,
}

fn file(name: &'static str, data: &'static [u8]) -> FileSpec {
    FileSpec {
        name,
        data,
        mode: 0o644,
        mtime: 1_700_000_000,
        directory: false,
    }
}

fn dir(name: &'static str, mode: u32) -> FileSpec {
    FileSpec {
        name,
        data: b"",
        mode,
        mtime: 1_700_000_000,
        directory: true,
    }
}

/// Build an uncompressed tar from the given entries.
fn tar_layer(files: &[FileSpec]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for spec in files {
        let mut header = tar::Header::new_ustar();
        header.set_mode(spec.mode);
        header.set_mtime(spec.mtime);
        header.set_uid(0);
        header.set_gid(0);
        if spec.directory {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, spec.name, std::io::empty())
                .unwrap();
        } else {
            header.set_size(spec.data.len() as u64);
            builder
                .append_data(&mut header, spec.name, spec.data)
                .unwrap();
        }
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn desc_value(desc: &Descriptor) -> serde_json::Value {
    serde_json::to_value(desc).unwrap()
}

/// Assemble layers + config + manifest + index; returns the index
/// descriptor (the image root).
fn build_image(store: &mut MemoryStore, layers: &[Vec<u8>], created: &str) -> Descriptor {
    build_image_with_annotations(store, layers, created, None)
}

fn build_image_with_annotations(
    store: &mut MemoryStore,
    layers: &[Vec<u8>],
    created: &str,
    manifest_annotations: Option<serde_json::Value>,
) -> Descriptor {
    let mut layer_descs = Vec::new();
    let mut diff_ids = Vec::new();
    for layer in layers {
        diff_ids.push(sha256_digest(layer));
        let desc = store.put(mediatype::OCI_IMAGE_LAYER_GZIP, gzip(layer));
        layer_descs.push(desc_value(&desc));
    }

    let config = json!({
        "created": created,
        "architecture": "amd64",
        "os": "linux",
        "config": {"Env": ["PATH=/usr/bin:/bin"], "Cmd": ["/bin/sh"]},
        "rootfs": {"type": "layers", "diff_ids": diff_ids},
        "history": [{"created": created, "created_by": "/bin/sh -c #(nop) ADD rootfs"}],
    });
    let config_desc = store.put(
        mediatype::OCI_IMAGE_CONFIG,
        serde_json::to_vec(&config).unwrap(),
    );

    let mut manifest = json!({
        "schemaVersion": 2,
        "mediaType": mediatype::OCI_IMAGE_MANIFEST,
        "config": desc_value(&config_desc),
        "layers": layer_descs,
    });
    if let Some(annotations) = manifest_annotations {
        manifest["annotations"] = annotations;
    }
    let manifest_desc = store.put(
        mediatype::OCI_IMAGE_MANIFEST,
        serde_json::to_vec(&manifest).unwrap(),
    );

    let mut manifest_entry = desc_value(&manifest_desc);
    manifest_entry["platform"] = json!({"architecture": "amd64", "os": "linux"});
    let index = json!({
        "schemaVersion": 2,
        "mediaType": mediatype::OCI_IMAGE_INDEX,
        "manifests": [manifest_entry],
    });
    store.put(
        mediatype::OCI_IMAGE_INDEX,
        serde_json::to_vec(&index).unwrap(),
    )
}

fn manifest_descriptor(store: &MemoryStore, index_desc: &Descriptor) -> Descriptor {
    let index: ocidiff::ImageIndex =
        serde_json::from_slice(&store.read_blob(index_desc).unwrap()).unwrap();
    index.manifests[0].clone()
}

fn collect_leaves(node: &EventTreeNode, out: &mut Vec<(String, EventType, String)>) {
    let children = node.children();
    if children.is_empty() {
        out.push((
            node.context.clone(),
            node.event.event_type,
            node.event.note.clone(),
        ));
        return;
    }
    for child in children.iter() {
        collect_leaves(child, out);
    }
}

fn leaves(node: &EventTreeNode) -> Vec<(String, EventType, String)> {
    let mut out = Vec::new();
    if node.has_children() {
        for child in node.children().iter() {
            collect_leaves(child, &mut out);
        }
    }
    out
}

fn count_nodes(node: &EventTreeNode) -> usize {
    1 + node.children().iter().map(count_nodes).sum::<usize>()
}

fn assert_no_empty_internals(node: &EventTreeNode) {
    for child in node.children().iter() {
        // Every appended node is either a leaf carrying an event or an
        // aggregator that acquired children.
        assert!(
            child.has_children() || !child.event.event_type.is_none(),
            "empty internal node at {}",
            child.context
        );
        assert_no_empty_internals(child);
    }
}

#[test]
fn test_identity_under_any_options() {
    let mut store = MemoryStore::new();
    let layer = tar_layer(&[dir("etc", 0o755), file("etc/hosts", b"127.0.0.1\n")]);
    let image = build_image(&mut store, &[layer], "2023-05-01T00:00:00Z");

    for ignorance in [
        IgnoranceOptions::default(),
        IgnoranceOptions {
            ignore_timestamps: true,
            ..Default::default()
        },
        IgnoranceOptions::semantic(),
    ] {
        let outcome = diff(
            &store,
            [image.clone(), image.clone()],
            &MatchAny,
            &quiet_options(ignorance),
        )
        .unwrap();
        assert!(outcome.walk_error.is_none());
        assert!(!outcome.has_differences());
        assert_eq!(outcome.exit_code(), 0);
    }
}

#[test]
fn test_timestamp_only_difference() {
    let mut store = MemoryStore::new();
    let layer = tar_layer(&[file("etc/hosts", b"127.0.0.1\n")]);
    let image_a = build_image(&mut store, &[layer.clone()], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer], "2024-11-11T11:11:11Z");

    let outcome = diff(
        &store,
        [image_a.clone(), image_b.clone()],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(outcome.has_differences());
    assert_eq!(outcome.exit_code(), 1);
    let leaves = leaves(&outcome.root);
    assert!(
        leaves
            .iter()
            .any(|(ctx, ty, _)| *ty == EventType::ConfigBlobMismatch && ctx.ends_with("/config")),
        "expected a ConfigBlobMismatch under /config, got {leaves:?}"
    );

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions {
            ignore_timestamps: true,
            ..Default::default()
        }),
    )
    .unwrap();
    assert!(!outcome.has_differences());
}

#[test]
fn test_file_order_swap() {
    let mut store = MemoryStore::new();
    let layer_a = tar_layer(&[file("a.txt", b"aa"), file("b.txt", b"bb")]);
    let layer_b = tar_layer(&[file("b.txt", b"bb"), file("a.txt", b"aa")]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2023-05-01T00:00:00Z");

    let outcome = diff(
        &store,
        [image_a.clone(), image_b.clone()],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(leaves(&outcome.root)
        .iter()
        .any(|(_, ty, _)| *ty == EventType::TarEntryMismatch));

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions {
            ignore_file_order: true,
            ..Default::default()
        }),
    )
    .unwrap();
    assert!(!outcome.has_differences(), "{:?}", leaves(&outcome.root));
}

#[test]
fn test_mode_redundant_bits() {
    let mut store = MemoryStore::new();
    // 0o40000 is the redundant directory bit some builders store in Mode
    let layer_a = tar_layer(&[dir("opt", 0o40755)]);
    let layer_b = tar_layer(&[dir("opt", 0o755)]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2023-05-01T00:00:00Z");

    let outcome = diff(
        &store,
        [image_a.clone(), image_b.clone()],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(leaves(&outcome.root)
        .iter()
        .any(|(_, ty, _)| *ty == EventType::TarEntryMismatch));

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions {
            ignore_file_mode_redundant_bits: true,
            ..Default::default()
        }),
    )
    .unwrap();
    assert!(!outcome.has_differences(), "{:?}", leaves(&outcome.root));
}

#[test]
fn test_extra_file_appears_in_one_input() {
    let mut store = MemoryStore::new();
    let layer_a = tar_layer(&[file("bin/sh", b"#!"), file("usr/bin/tool", b"t")]);
    let layer_b = tar_layer(&[
        file("bin/sh", b"#!"),
        file("usr/bin/extra", b"e"),
        file("usr/bin/tool", b"t"),
    ]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2023-05-01T00:00:00Z");

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions {
            ignore_file_order: true,
            ..Default::default()
        }),
    )
    .unwrap();
    let leaves = leaves(&outcome.root);
    assert!(
        leaves.iter().any(|(_, ty, note)| {
            *ty == EventType::LayerBlobMismatch
                && note == "name \"usr/bin/extra\" only appears in input 1"
        }),
        "missing appearance event in {leaves:?}"
    );
}

#[test]
fn test_squashing_equal_filesystems() {
    let mut store = MemoryStore::new();
    let t1 = [file("bin/sh", b"#!")];
    let t2 = [file("etc/hosts", b"127.0.0.1\n")];
    let t3 = [file("etc/motd", b"hi\n")];
    // A: three layers; B: two layers with the same concatenated entries
    let image_a = build_image(
        &mut store,
        &[tar_layer(&t1), tar_layer(&t2), tar_layer(&t3)],
        "2023-05-01T00:00:00Z",
    );
    let merged: Vec<FileSpec> = t2.iter().chain(t3.iter()).cloned().collect();
    let image_b = build_image(
        &mut store,
        &[tar_layer(&t1), tar_layer(&merged)],
        "2023-05-01T00:00:00Z",
    );

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(outcome.walk_error.is_none());
    let leaves = leaves(&outcome.root);
    assert!(
        !leaves.iter().any(|(_, ty, _)| *ty == EventType::TarEntryMismatch),
        "squashed streams are equal, got {leaves:?}"
    );
    assert!(
        leaves
            .iter()
            .any(|(_, _, note)| note.contains("length mismatch")),
        "expected the layer-count mismatch event in {leaves:?}"
    );
}

#[test]
fn test_image_name_annotations() {
    let mut store = MemoryStore::new();
    let layer = tar_layer(&[file("etc/hosts", b"127.0.0.1\n")]);
    let image_a = build_image_with_annotations(
        &mut store,
        &[layer.clone()],
        "2023-05-01T00:00:00Z",
        Some(json!({"org.opencontainers.image.ref.name": "3.18"})),
    );
    let image_b = build_image_with_annotations(
        &mut store,
        &[layer],
        "2023-05-01T00:00:00Z",
        Some(json!({"org.opencontainers.image.ref.name": "3.19"})),
    );

    let outcome = diff(
        &store,
        [image_a.clone(), image_b.clone()],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(outcome.has_differences());

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions {
            ignore_image_name: true,
            ..Default::default()
        }),
    )
    .unwrap();
    assert!(!outcome.has_differences(), "{:?}", leaves(&outcome.root));
}

#[test]
fn test_canonical_paths() {
    let mut store = MemoryStore::new();
    let layer_a = tar_layer(&[file("./bin/sh", b"#!")]);
    let layer_b = tar_layer(&[file("bin/sh", b"#!")]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2023-05-01T00:00:00Z");

    let outcome = diff(
        &store,
        [image_a.clone(), image_b.clone()],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(leaves(&outcome.root)
        .iter()
        .any(|(_, ty, _)| *ty == EventType::TarEntryMismatch));

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions {
            canonical_paths: true,
            ..Default::default()
        }),
    )
    .unwrap();
    assert!(!outcome.has_differences(), "{:?}", leaves(&outcome.root));
}

#[test]
fn test_ignorance_monotonicity() {
    let mut store = MemoryStore::new();
    let layer_a = tar_layer(&[
        FileSpec {
            mtime: 1_600_000_000,
            ..file("a.txt", b"aa")
        },
        file("b.txt", b"bb"),
    ]);
    let layer_b = tar_layer(&[
        file("b.txt", b"bb"),
        FileSpec {
            mtime: 1_700_000_123,
            ..file("a.txt", b"aa")
        },
    ]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2024-05-01T00:00:00Z");

    let strict = IgnoranceOptions::default();
    let timestamps = IgnoranceOptions {
        ignore_timestamps: true,
        ..Default::default()
    };
    let timestamps_and_order = IgnoranceOptions {
        ignore_timestamps: true,
        ignore_file_order: true,
        ..Default::default()
    };
    let mut counts = Vec::new();
    for ignorance in [strict, timestamps, timestamps_and_order, IgnoranceOptions::semantic()] {
        let outcome = diff(
            &store,
            [image_a.clone(), image_b.clone()],
            &MatchAny,
            &quiet_options(ignorance),
        )
        .unwrap();
        counts.push(leaves(&outcome.root).len());
    }
    for pair in counts.windows(2) {
        assert!(
            pair[0] >= pair[1],
            "enabling more ignorance options increased the leaf count: {counts:?}"
        );
    }
    assert_eq!(*counts.last().unwrap(), 0);
}

#[test]
fn test_event_tree_json_round_trip() {
    let mut store = MemoryStore::new();
    let layer_a = tar_layer(&[file("a.txt", b"aa")]);
    let layer_b = tar_layer(&[file("a.txt", b"AA")]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2024-05-01T00:00:00Z");

    let outcome = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(outcome.has_differences());
    assert_no_empty_internals(&outcome.root);

    let encoded = serde_json::to_string(&outcome.root).unwrap();
    let reparsed: EventTreeNode = serde_json::from_str(&encoded).unwrap();
    assert_eq!(count_nodes(&reparsed), count_nodes(&outcome.root));
    let reencoded = serde_json::to_string(&reparsed).unwrap();
    assert_eq!(encoded, reencoded);
    assert_eq!(reparsed.context, "/");
}

#[test]
fn test_layer_count_bound() {
    let mut store = MemoryStore::new();
    let layer = tar_layer(&[file("a.txt", b"aa")]);
    let layer_desc = store.put(mediatype::OCI_IMAGE_LAYER_GZIP, gzip(&layer));
    let diff_id = sha256_digest(&layer);

    let mut build = |data_marker: &str| {
        let config = json!({
            "created": "2023-05-01T00:00:00Z",
            "architecture": "amd64",
            "os": "linux",
            "author": data_marker,
            "rootfs": {"type": "layers", "diff_ids": [diff_id.clone()]},
        });
        let config_desc = store.put(
            mediatype::OCI_IMAGE_CONFIG,
            serde_json::to_vec(&config).unwrap(),
        );
        let layers: Vec<serde_json::Value> =
            std::iter::repeat(desc_value(&layer_desc)).take(4097).collect();
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": mediatype::OCI_IMAGE_MANIFEST,
            "config": desc_value(&config_desc),
            "layers": layers,
        });
        store.put(
            mediatype::OCI_IMAGE_MANIFEST,
            serde_json::to_vec(&manifest).unwrap(),
        )
    };
    let manifest_a = build("a");
    let manifest_b = build("b");

    let outcome = diff(
        &store,
        [manifest_a, manifest_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert_eq!(outcome.exit_code(), 2);
    let err = outcome.walk_error.expect("expected an over-limit error");
    assert!(
        err.to_string().contains("too many entries"),
        "unexpected error: {err}"
    );
}

#[test]
fn test_missing_blob_is_fatal_pre_walk() {
    let mut store = MemoryStore::new();
    let layer = tar_layer(&[file("a.txt", b"aa")]);
    let image_a = build_image(&mut store, &[layer.clone()], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer], "2024-05-01T00:00:00Z");
    // Drop image B's config blob out from under it
    let manifest = manifest_descriptor(&store, &image_b);
    let parsed: ocidiff::ImageManifest =
        serde_json::from_slice(&store.read_blob(&manifest).unwrap()).unwrap();
    store.remove(&parsed.config.digest);

    let err = diff(
        &store,
        [image_a, image_b],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap_err();
    match err {
        DiffError::Unavailable(msg) => assert!(msg.contains("image 1"), "{msg}"),
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[test]
fn test_index_vs_manifest_is_experimental_not_fatal() {
    let mut store = MemoryStore::new();
    let layer = tar_layer(&[file("a.txt", b"aa")]);
    let image = build_image(&mut store, &[layer], "2023-05-01T00:00:00Z");
    let manifest = manifest_descriptor(&store, &image);

    let outcome = diff(
        &store,
        [image.clone(), manifest.clone()],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    assert!(outcome.walk_error.is_none());
    assert!(leaves(&outcome.root)
        .iter()
        .any(|(_, ty, note)| *ty == EventType::ManifestBlobMismatch
            && note == "index vs manifest"));

    // The reverse order is a hard error advising a swap
    let outcome = diff(
        &store,
        [manifest, image],
        &MatchAny,
        &quiet_options(IgnoranceOptions::default()),
    )
    .unwrap();
    let err = outcome.walk_error.expect("expected an error");
    assert!(err.to_string().contains("swap"), "{err}");
}

#[test]
fn test_report_dir_extraction_and_cleanup() {
    let mut store = MemoryStore::new();
    let layer_a = tar_layer(&[
        dir("etc", 0o755),
        file("etc/same.txt", b"same"),
        file("etc/diff.txt", b"from input 0"),
    ]);
    let layer_b = tar_layer(&[
        dir("etc", 0o755),
        file("etc/same.txt", b"same"),
        file("etc/diff.txt", b"from input 1"),
    ]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2023-05-01T00:00:00Z");

    let report_dir = tempfile::tempdir().unwrap();
    let options = Options {
        report_dir: Some(report_dir.path().to_path_buf()),
        ..quiet_options(IgnoranceOptions::default())
    };
    let outcome = diff(&store, [image_a, image_b], &MatchAny, &options).unwrap();
    assert!(outcome.walk_error.is_none(), "{:?}", outcome.walk_error);
    assert!(outcome.has_differences());

    let layer_context = "manifests-0/layers-0";
    for input in ["input-0", "input-1"] {
        let base = report_dir.path().join(input).join(layer_context);
        assert!(
            base.join("etc/diff.txt").is_file(),
            "mismatched entry must be retained under {input}"
        );
        assert!(
            !base.join("etc/same.txt").exists(),
            "matched entry must be cleaned up under {input}"
        );
    }
    // The mismatched copies carry each side's content
    assert_eq!(
        std::fs::read(
            report_dir
                .path()
                .join("input-0")
                .join(layer_context)
                .join("etc/diff.txt")
        )
        .unwrap(),
        b"from input 0"
    );

    assert!(report_dir.path().join("README.md").is_file());
    let report = std::fs::read_to_string(report_dir.path().join("report.json")).unwrap();
    let parsed: EventTreeNode = serde_json::from_str(&report).unwrap();
    assert!(parsed.has_children());
}

#[test]
fn test_report_file_written() {
    let mut store = MemoryStore::new();
    let layer = tar_layer(&[file("a.txt", b"aa")]);
    let image_a = build_image(&mut store, &[layer.clone()], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer], "2024-05-01T00:00:00Z");

    let tmp = tempfile::tempdir().unwrap();
    let report_file = tmp.path().join("report.json");
    let options = Options {
        report_file: Some(report_file.clone()),
        ..quiet_options(IgnoranceOptions::default())
    };
    let outcome = diff(&store, [image_a, image_b], &MatchAny, &options).unwrap();
    assert!(outcome.has_differences());

    let parsed: EventTreeNode =
        serde_json::from_str(&std::fs::read_to_string(report_file).unwrap()).unwrap();
    assert_eq!(parsed.context, "/");
    assert!(parsed.has_children());
}

#[test]
fn test_cancellation_returns_partial_result() {
    let mut store = MemoryStore::new();
    let layer_a = tar_layer(&[file("a.txt", b"aa")]);
    let layer_b = tar_layer(&[file("a.txt", b"AA")]);
    let image_a = build_image(&mut store, &[layer_a], "2023-05-01T00:00:00Z");
    let image_b = build_image(&mut store, &[layer_b], "2023-05-01T00:00:00Z");

    let token = ocidiff::CancelToken::new();
    token.cancel();
    let options = Options {
        cancel: Some(token),
        ..quiet_options(IgnoranceOptions::default())
    };
    let outcome = diff(&store, [image_a, image_b], &MatchAny, &options).unwrap();
    let err = outcome.walk_error.expect("expected a cancellation error");
    assert!(err.is_canceled());
}
