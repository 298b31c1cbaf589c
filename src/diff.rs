//! The image diff walker.
//!
//! [`diff`] walks two descriptor trees in lockstep: descriptors are compared
//! directly, then the walker dispatches on media type into index, manifest,
//! config, or layer comparison, recursing into composite fields (manifests,
//! layers, config, subject) with child descriptors. Every difference is
//! raised as an event into the tree; composite fields build a *pending*
//! internal node that is committed to the parent only if it acquired
//! children.
//!
//! The walk is sequential. Event-tree appends go through a per-node lock,
//! and no lock is held across an event-handler call, so per-manifest and
//! per-layer loops can be parallelized later without an API change.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blob::{self, MAX_LAYERS, MAX_MANIFESTS};
use crate::compare::{self, DescriptorMask};
use crate::error::{join_errors, DiffError, Result};
use crate::event::{
    default_event_handler, handler_error, Event, EventHandler, EventInput, EventTreeNode,
    EventType,
};
use crate::mediatype;
use crate::oci::{Annotations, Descriptor, ImageConfig, ImageIndex, ImageManifest};
use crate::platform::{format_platform, PlatformMatcher};
use crate::report::{write_report_file, ReportRoot};
use crate::store::ContentStore;
use crate::tar_stream::{self, HeaderNorm, TarEntry};
use crate::untar::{self, ExtractDir, PendingDirTimes};

/// Semantic relaxations applied during comparison.
///
/// Any non-default combination means content digests (and therefore sizes)
/// may legitimately differ between semantically equal images, so digests,
/// sizes, and inline data are elided from descriptor comparison and
/// composites are descended structurally instead of trusting digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IgnoranceOptions {
    /// Ignore timestamps in configs, annotations, and tar headers.
    pub ignore_timestamps: bool,
    /// Ignore the config's history entirely.
    pub ignore_history: bool,
    /// Pair tar entries by name instead of position.
    pub ignore_file_order: bool,
    /// Mask the redundant file-type bits some builders set in tar modes.
    pub ignore_file_mode_redundant_bits: bool,
    /// Ignore image-name annotations.
    pub ignore_image_name: bool,
    /// Ignore which tar encoder flavor produced an entry.
    pub ignore_tar_format: bool,
    /// Strip leading `/` and `./` from tar entry names before comparison.
    pub canonical_paths: bool,
}

impl IgnoranceOptions {
    /// All relaxations on; the recommended mode for reproducibility checks.
    pub fn semantic() -> Self {
        Self {
            ignore_timestamps: true,
            ignore_history: true,
            ignore_file_order: true,
            ignore_file_mode_redundant_bits: true,
            ignore_image_name: true,
            ignore_tar_format: true,
            canonical_paths: true,
        }
    }

    pub(crate) fn digest_may_change(&self) -> bool {
        *self != Self::default()
    }

    pub(crate) fn size_may_change(&self) -> bool {
        // Over-estimated: anything that may change a digest may change a size.
        self.digest_may_change()
    }
}

/// A cloneable cancellation flag checked at every I/O boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for [`diff`].
#[derive(Default)]
pub struct Options {
    pub ignorance: IgnoranceOptions,

    /// Receives events as they are raised; defaults to the process-wide
    /// tabular handler bound to stdout.
    pub event_handler: Option<Arc<dyn EventHandler>>,

    /// Write the event tree as JSON to this path after the walk.
    pub report_file: Option<PathBuf>,

    /// Extract differing tar entries (and `report.json`) under this
    /// directory.
    pub report_dir: Option<PathBuf>,

    /// Cooperative cancellation.
    pub cancel: Option<CancelToken>,
}

/// The result of a completed (possibly partially failed) walk.
#[derive(Debug)]
pub struct DiffOutcome {
    /// Root of the event tree; context `/`. No children means the images
    /// are equal under the requested options.
    pub root: EventTreeNode,

    /// Errors accumulated during the walk, joined. The tree is still
    /// meaningful when this is set.
    pub walk_error: Option<DiffError>,
}

impl DiffOutcome {
    pub fn has_differences(&self) -> bool {
        self.root.has_children()
    }

    /// CLI exit semantics: 0 no differences, 1 differences, 2 error.
    pub fn exit_code(&self) -> i32 {
        if self.walk_error.is_some() {
            2
        } else if self.has_differences() {
            1
        } else {
            0
        }
    }
}

/// Compare two images.
///
/// Both root descriptors are first verified to be fully available in the
/// content store for the requested platforms; a missing blob is fatal for
/// that root. The returned [`DiffOutcome`] carries the event tree together
/// with any joined walk errors; `Err` is reserved for pre-walk failures.
pub fn diff(
    store: &dyn ContentStore,
    descs: [Descriptor; 2],
    platform: &dyn PlatformMatcher,
    opts: &Options,
) -> Result<DiffOutcome> {
    for (i, desc) in descs.iter().enumerate() {
        check_available(store, desc, platform)
            .map_err(|err| DiffError::Unavailable(format!("image {i}: {err}")))?;
    }

    let handler = opts
        .event_handler
        .clone()
        .unwrap_or_else(default_event_handler);
    let report = match &opts.report_dir {
        Some(dir) => Some(ReportRoot::prepare(dir)?),
        None => None,
    };

    let differ = Differ {
        store,
        platform,
        opts: opts.ignorance,
        handler,
        report,
        cancel: opts.cancel.clone(),
    };

    let root = EventTreeNode::new("/", Event::default());
    let inputs = [
        EventInput {
            descriptor: Some(descs[0].clone()),
            ..Default::default()
        },
        EventInput {
            descriptor: Some(descs[1].clone()),
            ..Default::default()
        },
    ];

    let mut errs = Vec::new();
    if let Err(err) = differ.diff_node(&root, &inputs) {
        errs.push(err);
    }
    if let Err(err) = differ.handler.flush() {
        errs.push(handler_error(err));
    }

    // Reports are written even when the walk failed partway.
    if let Some(path) = &opts.report_file {
        if let Err(err) = write_report_file(path, &root) {
            errs.push(err);
        }
    }
    if let Some(report) = &differ.report {
        if let Err(err) = report.write_report_json(&root) {
            errs.push(err);
        }
    }

    Ok(DiffOutcome {
        root,
        walk_error: join_errors(errs),
    })
}

/// Verify that every descriptor reachable from `desc` (for the matched
/// platforms) can be opened in the content store.
fn check_available(
    store: &dyn ContentStore,
    desc: &Descriptor,
    platform: &dyn PlatformMatcher,
) -> Result<()> {
    if let Err(err) = store.open(desc).map(drop) {
        if let Some(p) = &desc.platform {
            return Err(DiffError::Unavailable(format!(
                "not available for platform {:?}: {err}",
                format_platform(p)
            )));
        }
        return Err(err);
    }
    let media_type = desc.media_type.as_str();
    if mediatype::is_index_type(media_type) {
        let index: ImageIndex = blob::read_json_blob(store, desc, "index")?;
        for manifest in &index.manifests {
            if let Some(p) = &manifest.platform {
                if !platform.matches(p) {
                    continue;
                }
            }
            check_available(store, manifest, platform)?;
        }
    } else if mediatype::is_manifest_type(media_type) {
        if let Some(p) = &desc.platform {
            if !platform.matches(p) {
                return Ok(());
            }
        }
        let manifest: ImageManifest = blob::read_json_blob(store, desc, "manifest")?;
        check_available(store, &manifest.config, platform)?;
        for layer in &manifest.layers {
            check_available(store, layer, platform)?;
        }
    }
    Ok(())
}

fn join_context(parent: &str, segment: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{segment}")
    } else {
        format!("{parent}/{segment}")
    }
}

/// Outcome of validating a child descriptor before recursion.
enum Validation {
    Ok,
    /// Skip this entry without error (e.g. foreign platform).
    Tolerable(String),
    /// Invalid input shape.
    Invalid(String),
}

struct Differ<'a> {
    store: &'a dyn ContentStore,
    platform: &'a dyn PlatformMatcher,
    opts: IgnoranceOptions,
    handler: Arc<dyn EventHandler>,
    report: Option<ReportRoot>,
    cancel: Option<CancelToken>,
}

/// Entries and extraction state collected from one input side of a layer
/// (or a squashed sequence of layers).
struct CollectedSide {
    entries: Vec<TarEntry>,
    extract: Option<ExtractDir>,
    dir_times: Vec<PendingDirTimes>,
}

impl Differ<'_> {
    fn check_cancel(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_canceled() => Err(DiffError::Canceled),
            _ => Ok(()),
        }
    }

    /// Raise a leaf event under `parent` with a locally chosen context
    /// segment.
    fn raise_event(&self, parent: &EventTreeNode, event: Event, segment: &str) -> Result<()> {
        let node = EventTreeNode::new(join_context(&parent.context, segment), event);
        self.raise_node(parent, node)
    }

    /// Hand a node to the handler, then append it. The handler error is
    /// returned for accumulation; the append happens regardless.
    fn raise_node(&self, parent: &EventTreeNode, node: EventTreeNode) -> Result<()> {
        let result = self.handler.handle(&node).map_err(handler_error);
        parent.append(node);
        result
    }

    /// Compare one node pair: descriptor fields, annotations, then the
    /// media-type-specific body.
    fn diff_node(&self, node: &EventTreeNode, inputs: &[EventInput; 2]) -> Result<()> {
        self.check_cancel()?;
        let (Some(desc0), Some(desc1)) = (&inputs[0].descriptor, &inputs[1].descriptor) else {
            return Err(DiffError::Unsupported(
                "comparison inputs are missing descriptors".into(),
            ));
        };

        let mut errs = Vec::new();
        if let Some(diff) =
            compare::diff_descriptor(desc0, desc1, DescriptorMask::from_options(&self.opts))
        {
            let event = Event {
                event_type: EventType::DescriptorMismatch,
                inputs: inputs.clone(),
                diff,
                note: String::new(),
            };
            if let Err(err) = self.raise_event(node, event, "desc") {
                errs.push(err);
            }
        }
        if let Err(err) = self.diff_annotations_field(
            node,
            inputs,
            EventType::DescriptorMismatch,
            desc0.annotations.as_ref(),
            desc1.annotations.as_ref(),
            "Annotations",
        ) {
            errs.push(err);
        }

        let media_type0 = desc0.media_type.clone();
        let media_type1 = desc1.media_type.clone();
        let result = if mediatype::is_index_type(&media_type0) {
            if mediatype::is_manifest_type(&media_type1) {
                self.diff_index_against_manifest(node, inputs)
            } else {
                self.diff_index(node, inputs)
            }
        } else if mediatype::is_manifest_type(&media_type0) {
            if mediatype::is_index_type(&media_type1) {
                Err(DiffError::Unsupported(
                    "comparing a manifest with a multi-platform index is not supported; \
                     swap the inputs to compare an index with a manifest"
                        .into(),
                ))
            } else {
                self.diff_manifest(node, inputs)
            }
        } else if mediatype::is_config_type(&media_type0) {
            self.diff_config(node, inputs)
        } else if mediatype::is_layer_type(&media_type0) {
            self.diff_layer(node, inputs)
        } else {
            tracing::warn!("unknown media type {media_type0:?}");
            if let Some(diff) = compare::diff_descriptor(desc0, desc1, DescriptorMask::full()) {
                let event = Event {
                    event_type: EventType::DescriptorMismatch,
                    inputs: inputs.clone(),
                    diff,
                    note: String::new(),
                };
                self.raise_event(node, event, "desc")
            } else {
                Ok(())
            }
        };
        if let Err(err) = result {
            errs.push(err);
        }
        join_errors(errs).map_or(Ok(()), Err)
    }

    fn diff_annotations_field(
        &self,
        node: &EventTreeNode,
        inputs: &[EventInput; 2],
        event_type: EventType,
        a: Option<&Annotations>,
        b: Option<&Annotations>,
        field_name: &str,
    ) -> Result<()> {
        let negligible = compare::negligible_annotation_keys(&self.opts);
        let Some(diff) = compare::diff_annotations(a, b, &negligible) else {
            return Ok(());
        };
        let event = Event {
            event_type,
            inputs: inputs.clone(),
            diff,
            note: format!("field {field_name:?}"),
        };
        self.raise_event(node, event, &field_name.to_lowercase())
    }

    /// Compare an optional descriptor field (`Subject`, `Config`),
    /// recursing when present on both sides.
    fn diff_descriptor_ptr_field(
        &self,
        node: &EventTreeNode,
        inputs: &[EventInput; 2],
        event_type: EventType,
        descs: (Option<&Descriptor>, Option<&Descriptor>),
        field_name: &str,
    ) -> Result<()> {
        let (desc0, desc1) = match descs {
            (None, None) => return Ok(()),
            (Some(desc0), Some(desc1)) => (desc0, desc1),
            (a, b) => {
                let event = Event {
                    event_type,
                    inputs: inputs.clone(),
                    diff: format!("{}: {} != {}", field_name, render(&a), render(&b)),
                    note: format!("field {field_name:?}: only present in a single input"),
                };
                return self.raise_event(node, event, &field_name.to_lowercase());
            }
        };

        let pending = EventTreeNode::new(
            join_context(&node.context, &field_name.to_lowercase()),
            Event {
                event_type,
                inputs: inputs.clone(),
                diff: compare::diff_descriptor(desc0, desc1, DescriptorMask::full())
                    .unwrap_or_default(),
                note: format!("field {field_name:?}"),
            },
        );
        let child_inputs = [
            EventInput {
                descriptor: Some(desc0.clone()),
                ..Default::default()
            },
            EventInput {
                descriptor: Some(desc1.clone()),
                ..Default::default()
            },
        ];
        let mut errs = Vec::new();
        if let Err(err) = self.diff_node(&pending, &child_inputs) {
            errs.push(err.in_field(field_name));
        }
        if pending.has_children() {
            if let Err(err) = self.raise_node(node, pending) {
                errs.push(err);
            }
        } // else no event happens
        join_errors(errs).map_or(Ok(()), Err)
    }

    /// Compare an ordered descriptor list field (`Manifests`, `Layers`),
    /// recursing element-wise.
    fn diff_descriptor_slice_field(
        &self,
        node: &EventTreeNode,
        inputs: &[EventInput; 2],
        event_type: EventType,
        slices: (&[Descriptor], &[Descriptor]),
        field_name: &str,
        max_entries: usize,
        validate: impl Fn(&Descriptor) -> Validation,
    ) -> Result<()> {
        let (list0, list1) = slices;
        if list0.len() != list1.len() {
            let event = Event {
                event_type,
                inputs: inputs.clone(),
                diff: format!("{}: {} != {}", field_name, render(&list0), render(&list1)),
                note: format!("field {field_name:?}: length mismatch"),
            };
            return self.raise_event(node, event, &field_name.to_lowercase());
        }
        if list0.len() > max_entries {
            return Err(DiffError::OverLimit(format!(
                "field {field_name:?}: too many entries (> {max_entries})"
            )));
        }

        let mut errs = Vec::new();
        // TODO: parallelize the loop
        for i in 0..list0.len() {
            let field_name_i = format!("{field_name}[{i}]");
            let pending = EventTreeNode::new(
                join_context(
                    &node.context,
                    &format!("{}-{}", field_name.to_lowercase(), i),
                ),
                Event {
                    event_type,
                    inputs: inputs.clone(),
                    diff: compare::diff_descriptor(&list0[i], &list1[i], DescriptorMask::full())
                        .unwrap_or_default(),
                    note: format!("field {field_name_i:?}"),
                },
            );
            match validate(&list0[i]) {
                Validation::Ok => {}
                Validation::Tolerable(reason) => {
                    tracing::debug!("skipping field {field_name_i:?}: {reason}");
                    continue;
                }
                Validation::Invalid(reason) => {
                    errs.push(
                        DiffError::Unsupported(format!("invalid: {reason}"))
                            .in_field(&field_name_i),
                    );
                    continue;
                }
            }
            let child_inputs = [
                EventInput {
                    descriptor: Some(list0[i].clone()),
                    ..Default::default()
                },
                EventInput {
                    descriptor: Some(list1[i].clone()),
                    ..Default::default()
                },
            ];
            if let Err(err) = self.diff_node(&pending, &child_inputs) {
                errs.push(err.in_field(&field_name_i));
            }
            if pending.has_children() {
                if let Err(err) = self.raise_node(node, pending) {
                    errs.push(err);
                }
            } // else no event happens
        }
        join_errors(errs).map_or(Ok(()), Err)
    }

    fn diff_index(&self, node: &EventTreeNode, inputs: &[EventInput; 2]) -> Result<()> {
        let (desc0, desc1) = descriptors(inputs)?;
        // Parse failures are critical for the subtree, not joined.
        let index0: ImageIndex = blob::read_json_blob(self.store, desc0, "index")?;
        let index1: ImageIndex = blob::read_json_blob(self.store, desc1, "index")?;
        let mut inputs = inputs.clone();
        inputs[0].index = Some(index0.clone());
        inputs[1].index = Some(index1.clone());

        let mut errs = Vec::new();
        if let Some(diff) = compare::diff_index(&index0, &index1, &self.opts) {
            let event = Event {
                event_type: EventType::IndexBlobMismatch,
                inputs: inputs.clone(),
                diff,
                note: String::new(),
            };
            if let Err(err) = self.raise_event(node, event, "index") {
                errs.push(err);
            }
        }

        if let Err(err) = self.diff_descriptor_slice_field(
            node,
            &inputs,
            EventType::IndexBlobMismatch,
            (&index0.manifests, &index1.manifests),
            "Manifests",
            MAX_MANIFESTS,
            |desc| {
                if !mediatype::is_manifest_type(&desc.media_type) {
                    return Validation::Invalid(format!(
                        "expected a manifest type, got {:?}",
                        desc.media_type
                    ));
                }
                if let Some(p) = &desc.platform {
                    if !self.platform.matches(p) {
                        return Validation::Tolerable(format!(
                            "unexpected platform {:?}",
                            format_platform(p)
                        ));
                    }
                }
                Validation::Ok
            },
        ) {
            errs.push(err);
        }

        if let Err(err) = self.diff_descriptor_ptr_field(
            node,
            &inputs,
            EventType::IndexBlobMismatch,
            (index0.subject.as_ref(), index1.subject.as_ref()),
            "Subject",
        ) {
            errs.push(err);
        }

        if let Err(err) = self.diff_annotations_field(
            node,
            &inputs,
            EventType::IndexBlobMismatch,
            index0.annotations.as_ref(),
            index1.annotations.as_ref(),
            "Annotations",
        ) {
            errs.push(err);
        }

        join_errors(errs).map_or(Ok(()), Err)
    }

    /// Experimental: input 0 is a multi-platform index, input 1 a
    /// single-platform manifest. The first platform-matching manifest of
    /// the index stands in for the index side.
    fn diff_index_against_manifest(
        &self,
        node: &EventTreeNode,
        inputs: &[EventInput; 2],
    ) -> Result<()> {
        let (desc0, desc1) = descriptors(inputs)?;
        tracing::warn!(
            "comparing a multi-platform index with a single-platform manifest (experimental)"
        );
        let index: ImageIndex = blob::read_json_blob(self.store, desc0, "index")?;
        let chosen = index
            .manifests
            .iter()
            .find(|m| {
                mediatype::is_manifest_type(&m.media_type)
                    && m.platform
                        .as_ref()
                        .map_or(true, |p| self.platform.matches(p))
            })
            .ok_or_else(|| {
                DiffError::Unavailable(
                    "the index has no manifest matching the requested platform".into(),
                )
            })?;

        let mut errs = Vec::new();
        let event = Event {
            event_type: EventType::ManifestBlobMismatch,
            inputs: inputs.clone(),
            diff: String::new(),
            note: "index vs manifest".into(),
        };
        if let Err(err) = self.raise_event(node, event, "manifest") {
            errs.push(err);
        }

        let child_inputs = [
            EventInput {
                descriptor: Some(chosen.clone()),
                ..Default::default()
            },
            EventInput {
                descriptor: Some(desc1.clone()),
                ..Default::default()
            },
        ];
        if let Err(err) = self.diff_node(node, &child_inputs) {
            errs.push(err);
        }
        join_errors(errs).map_or(Ok(()), Err)
    }

    fn diff_manifest(&self, node: &EventTreeNode, inputs: &[EventInput; 2]) -> Result<()> {
        let (desc0, desc1) = descriptors(inputs)?;
        // A manifest for a foreign platform short-circuits to success.
        if let Some(p) = &desc0.platform {
            if !self.platform.matches(p) {
                return Ok(());
            }
        }
        let manifest0: ImageManifest = blob::read_json_blob(self.store, desc0, "manifest")?;
        let manifest1: ImageManifest = blob::read_json_blob(self.store, desc1, "manifest")?;
        let mut inputs = inputs.clone();
        inputs[0].manifest = Some(manifest0.clone());
        inputs[1].manifest = Some(manifest1.clone());

        let mut errs = Vec::new();
        if let Some(diff) = compare::diff_manifest(&manifest0, &manifest1, &self.opts) {
            let event = Event {
                event_type: EventType::ManifestBlobMismatch,
                inputs: inputs.clone(),
                diff,
                note: String::new(),
            };
            if let Err(err) = self.raise_event(node, event, "manifest") {
                errs.push(err);
            }
        }

        if let Err(err) = self.diff_descriptor_ptr_field(
            node,
            &inputs,
            EventType::ManifestBlobMismatch,
            (Some(&manifest0.config), Some(&manifest1.config)),
            "Config",
        ) {
            errs.push(err);
        }

        if manifest0.layers.len() == manifest1.layers.len() {
            if let Err(err) = self.diff_descriptor_slice_field(
                node,
                &inputs,
                EventType::ManifestBlobMismatch,
                (&manifest0.layers, &manifest1.layers),
                "Layers",
                MAX_LAYERS,
                |desc| {
                    if !mediatype::is_layer_type(&desc.media_type) {
                        return Validation::Invalid(format!(
                            "expected a layer type, got {:?}",
                            desc.media_type
                        ));
                    }
                    Validation::Ok
                },
            ) {
                errs.push(err);
            }
        } else {
            // Emits the length-mismatch event, then falls through to the
            // squashed comparison.
            if let Err(err) = self.diff_descriptor_slice_field(
                node,
                &inputs,
                EventType::ManifestBlobMismatch,
                (&manifest0.layers, &manifest1.layers),
                "Layers",
                MAX_LAYERS,
                |_| Validation::Ok,
            ) {
                errs.push(err);
            }
            if let Err(err) = self.diff_squashed_layers(node, &inputs, &manifest0, &manifest1) {
                errs.push(err);
            }
        }

        if let Err(err) = self.diff_descriptor_ptr_field(
            node,
            &inputs,
            EventType::ManifestBlobMismatch,
            (manifest0.subject.as_ref(), manifest1.subject.as_ref()),
            "Subject",
        ) {
            errs.push(err);
        }

        if let Err(err) = self.diff_annotations_field(
            node,
            &inputs,
            EventType::ManifestBlobMismatch,
            manifest0.annotations.as_ref(),
            manifest1.annotations.as_ref(),
            "Annotations",
        ) {
            errs.push(err);
        }

        join_errors(errs).map_or(Ok(()), Err)
    }

    /// Compare two layer lists of different lengths by virtually
    /// concatenating each side into one tar stream.
    fn diff_squashed_layers(
        &self,
        node: &EventTreeNode,
        inputs: &[EventInput; 2],
        manifest0: &ImageManifest,
        manifest1: &ImageManifest,
    ) -> Result<()> {
        tracing::warn!(
            "layer counts differ ({} vs {}); comparing squashed layer streams (experimental)",
            manifest0.layers.len(),
            manifest1.layers.len()
        );
        if manifest0.layers.len() > MAX_LAYERS || manifest1.layers.len() > MAX_LAYERS {
            return Err(DiffError::OverLimit(format!(
                "field \"Layers\": too many entries (> {MAX_LAYERS})"
            )));
        }
        let pending = EventTreeNode::new(
            join_context(&node.context, "layers-squashed"),
            Event {
                event_type: EventType::LayerBlobMismatch,
                inputs: inputs.clone(),
                diff: String::new(),
                note: "squashed layers".into(),
            },
        );
        let mut errs = Vec::new();
        if let Err(err) = self.diff_layer_streams(
            &pending,
            inputs,
            (&manifest0.layers, &manifest1.layers),
            true,
        ) {
            errs.push(err.in_field("Layers"));
        }
        if pending.has_children() {
            if let Err(err) = self.raise_node(node, pending) {
                errs.push(err);
            }
        } // else no event happens
        join_errors(errs).map_or(Ok(()), Err)
    }

    fn diff_config(&self, node: &EventTreeNode, inputs: &[EventInput; 2]) -> Result<()> {
        let (desc0, desc1) = descriptors(inputs)?;
        let config0: ImageConfig = blob::read_json_blob(self.store, desc0, "config")?;
        let config1: ImageConfig = blob::read_json_blob(self.store, desc1, "config")?;
        let mut inputs = inputs.clone();
        inputs[0].config = Some(config0.clone());
        inputs[1].config = Some(config1.clone());

        let mut errs = Vec::new();
        if let Some(diff) = compare::diff_config(&config0, &config1, &self.opts) {
            let event = Event {
                event_type: EventType::ConfigBlobMismatch,
                inputs: inputs.clone(),
                diff,
                note: String::new(),
            };
            if let Err(err) = self.raise_event(node, event, "config") {
                errs.push(err);
            }
        }

        // The diff IDs were masked above; the rest of the rootfs section is
        // still comparable.
        if self.opts.digest_may_change() {
            if let Some(diff) = compare::diff_rootfs_partial(&config0, &config1) {
                let event = Event {
                    event_type: EventType::ConfigBlobMismatch,
                    inputs: inputs.clone(),
                    diff,
                    note: "field \"RootFS\"".into(),
                };
                if let Err(err) = self.raise_event(node, event, "config/rootfs") {
                    errs.push(err);
                }
            }
        }

        // History was masked for its timestamps only; compare the rest.
        if self.opts.ignore_timestamps && !self.opts.ignore_history {
            let history0 = config0.history.as_deref().unwrap_or_default();
            let history1 = config1.history.as_deref().unwrap_or_default();
            if history0.len() != history1.len() {
                let event = Event {
                    event_type: EventType::ConfigBlobMismatch,
                    inputs: inputs.clone(),
                    diff: format!("history: {} != {}", render(&history0), render(&history1)),
                    note: "field \"History\": length mismatch".into(),
                };
                if let Err(err) = self.raise_event(node, event, "config/history") {
                    errs.push(err);
                }
            } else {
                for (i, (entry0, entry1)) in history0.iter().zip(history1).enumerate() {
                    if let Some(diff) = compare::diff_history_entry(entry0, entry1, true) {
                        let event = Event {
                            event_type: EventType::ConfigBlobMismatch,
                            inputs: inputs.clone(),
                            diff,
                            note: format!("field \"History[{i}]\""),
                        };
                        if let Err(err) =
                            self.raise_event(node, event, &format!("config/history-{i}"))
                        {
                            errs.push(err);
                        }
                    }
                }
            }
        }

        join_errors(errs).map_or(Ok(()), Err)
    }

    fn diff_layer(&self, node: &EventTreeNode, inputs: &[EventInput; 2]) -> Result<()> {
        let (desc0, desc1) = descriptors(inputs)?;
        self.diff_layer_streams(
            node,
            inputs,
            (
                std::slice::from_ref(desc0),
                std::slice::from_ref(desc1),
            ),
            false,
        )
    }

    /// Compare two entry streams (each the concatenation of one or more
    /// layer blobs). Extraction, pairing, event emission, and matched-entry
    /// cleanup all happen here.
    fn diff_layer_streams(
        &self,
        node: &EventTreeNode,
        inputs: &[EventInput; 2],
        descs: (&[Descriptor], &[Descriptor]),
        squashed: bool,
    ) -> Result<()> {
        let side0 = self.collect_entries(descs.0, 0, &node.context)?;
        let side1 = self.collect_entries(descs.1, 1, &node.context)?;

        let mut errs = Vec::new();
        let mut dirs_to_remove: Vec<String> = Vec::new();
        let pending = EventTreeNode::new(
            join_context(&node.context, "layer"),
            Event {
                event_type: EventType::LayerBlobMismatch,
                inputs: inputs.clone(),
                diff: String::new(),
                note: String::new(),
            },
        );

        if self.opts.ignore_file_order && !squashed {
            let by_name0 = group_by_name(&side0.entries);
            let by_name1 = group_by_name(&side1.entries);
            for (name, entries0) in &by_name0 {
                match by_name1.get(name) {
                    Some(entries1) if entries0.len() == entries1.len() => {
                        for (&entry0, &entry1) in entries0.iter().zip(entries1) {
                            self.diff_tar_entry_pair(
                                &pending,
                                inputs,
                                entry0,
                                entry1,
                                &mut dirs_to_remove,
                                &mut errs,
                            );
                        }
                    }
                    other => {
                        let count1 = other.map_or(0, |entries| entries.len());
                        let event = Event {
                            event_type: EventType::LayerBlobMismatch,
                            inputs: inputs.clone(),
                            diff: String::new(),
                            note: name_appearance_note(name, entries0.len(), count1),
                        };
                        if let Err(err) = self.raise_event(node, event, "layer") {
                            errs.push(err);
                        }
                    }
                }
            }
            // Second pass: names that never appear in input 0.
            for (name, entries1) in &by_name1 {
                if by_name0.contains_key(name) {
                    continue;
                }
                let event = Event {
                    event_type: EventType::LayerBlobMismatch,
                    inputs: inputs.clone(),
                    diff: String::new(),
                    note: name_appearance_note(name, 0, entries1.len()),
                };
                if let Err(err) = self.raise_event(node, event, "layer") {
                    errs.push(err);
                }
            }
        } else if side0.entries.len() != side1.entries.len() {
            let (longer, shorter) = if side0.entries.len() > side1.entries.len() {
                (0, 1)
            } else {
                (1, 0)
            };
            let count = side0.entries.len().min(side1.entries.len()) + 1;
            let event = Event {
                event_type: EventType::LayerBlobMismatch,
                inputs: inputs.clone(),
                diff: String::new(),
                note: format!("input {longer} is longer than input {shorter} ({count} entries)"),
            };
            if let Err(err) = self.raise_event(node, event, "layer") {
                errs.push(err);
            }
            // No pairing past a length mismatch.
        } else {
            for (entry0, entry1) in side0.entries.iter().zip(&side1.entries) {
                self.diff_tar_entry_pair(
                    &pending,
                    inputs,
                    entry0,
                    entry1,
                    &mut dirs_to_remove,
                    &mut errs,
                );
            }
        }

        // Matched directories go last, children before parents, and only if
        // they ended up empty.
        if let Some(report) = &self.report {
            report.remove_dirs_if_empty(dirs_to_remove);
        }

        if pending.has_children() {
            if let Err(err) = self.raise_node(node, pending) {
                errs.push(err);
            }
        } // else no event happens

        if let Some(extract) = &side0.extract {
            untar::apply_dir_times(extract, &side0.dir_times);
        }
        if let Some(extract) = &side1.extract {
            untar::apply_dir_times(extract, &side1.dir_times);
        }

        join_errors(errs).map_or(Ok(()), Err)
    }

    fn diff_tar_entry_pair(
        &self,
        pending: &EventTreeNode,
        inputs: &[EventInput; 2],
        entry0: &TarEntry,
        entry1: &TarEntry,
        dirs_to_remove: &mut Vec<String>,
        errs: &mut Vec<DiffError>,
    ) {
        if let Some(diff) = compare::diff_tar_entry(entry0, entry1, &self.opts) {
            let mut child_inputs = inputs.clone();
            child_inputs[0].tar_entry = Some(entry0.clone());
            child_inputs[1].tar_entry = Some(entry1.clone());
            let event = Event {
                event_type: EventType::TarEntryMismatch,
                inputs: child_inputs,
                diff,
                note: format!("name {:?}", entry0.header.name),
            };
            if let Err(err) = self.raise_event(pending, event, "tarentry") {
                errs.push(err);
            }
        } else {
            // The pair matched; its extracted copies carry no information.
            // Files go now, directories after the whole layer is done.
            for entry in [entry0, entry1] {
                let Some(path) = &entry.extracted_path else {
                    continue;
                };
                if entry.header.typeflag == b'5' {
                    dirs_to_remove.push(path.clone());
                } else if let Some(report) = &self.report {
                    report.remove_file_best_effort(path);
                }
            }
        }
    }

    /// Read every entry of `descs` (concatenated), extracting or hashing
    /// bodies as configured.
    fn collect_entries(
        &self,
        descs: &[Descriptor],
        input: usize,
        context: &str,
    ) -> Result<CollectedSide> {
        let extract = match &self.report {
            Some(report) => Some(report.open_extract_dir(input, context)?),
            None => None,
        };
        let mut streams = Vec::new();
        for desc in descs {
            streams.push(blob::open_tar_stream(self.store, desc)?);
        }
        let norm = HeaderNorm {
            canonical_paths: self.opts.canonical_paths,
            clear_format: self.opts.ignore_tar_format,
        };
        let cancel = self.cancel.as_ref();
        let mut entries = Vec::new();
        let mut dir_times = Vec::new();
        tar_stream::walk_entries(streams, |index, entry| {
            if let Some(token) = cancel {
                if token.is_canceled() {
                    return Err(DiffError::Canceled);
                }
            }
            let header = tar_stream::capture_header(entry, norm)?;
            let (digest, extracted_path) = match &extract {
                Some(dir) => {
                    let outcome = untar::extract_entry(dir, &header, entry, cancel)?;
                    if let Some(times) = outcome.dir_times {
                        dir_times.push(times);
                    }
                    (outcome.digest, outcome.rel_path)
                }
                None => (untar::digest_entry(entry, cancel)?, None),
            };
            entries.push(TarEntry {
                index,
                header,
                digest,
                extracted_path,
            });
            Ok(())
        })?;
        Ok(CollectedSide {
            entries,
            extract,
            dir_times,
        })
    }
}

fn descriptors(inputs: &[EventInput; 2]) -> Result<(&Descriptor, &Descriptor)> {
    match (&inputs[0].descriptor, &inputs[1].descriptor) {
        (Some(desc0), Some(desc1)) => Ok((desc0, desc1)),
        _ => Err(DiffError::Unsupported(
            "comparison inputs are missing descriptors".into(),
        )),
    }
}

fn group_by_name(entries: &[TarEntry]) -> BTreeMap<&str, Vec<&TarEntry>> {
    let mut map: BTreeMap<&str, Vec<&TarEntry>> = BTreeMap::new();
    for entry in entries {
        map.entry(entry.header.name.as_str()).or_default().push(entry);
    }
    map
}

fn name_appearance_note(name: &str, count0: usize, count1: usize) -> String {
    if count0 != 0 && count1 == 0 {
        format!("name {name:?} only appears in input 0")
    } else if count0 == 0 && count1 != 0 {
        format!("name {name:?} only appears in input 1")
    } else {
        format!("name {name:?} appears {count0} times in input 0, {count1} times in input 1")
    }
}

fn render<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unrenderable>".to_owned())
}
