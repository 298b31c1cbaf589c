//! Mismatch events, the event tree, and event handlers.
//!
//! Every difference the walker detects is raised as an [`Event`] and placed
//! into a tree of [`EventTreeNode`]s whose shape follows the descriptor
//! tree. Leaves are concrete mismatches; internal nodes aggregate the
//! differences found inside a composite field and exist only if they
//! acquired at least one child.
//!
//! Handlers observe events as they are raised (before the node is appended
//! to its parent, so no tree lock is held across the call). The default
//! handler renders one aligned row per leaf event; the verbose handler
//! prints every event including aggregators.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use comfy_table::Table;
use serde::{Deserialize, Serialize};

use crate::error::{DiffError, Result};
use crate::oci::{Descriptor, ImageConfig, ImageIndex, ImageManifest};
use crate::tar_stream::TarEntry;

/// Kind of mismatch an event reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Zero value; only present on aggregate nodes that carry no event.
    #[default]
    #[serde(rename = "")]
    None,
    DescriptorMismatch,
    IndexBlobMismatch,
    ManifestBlobMismatch,
    ConfigBlobMismatch,
    LayerBlobMismatch,
    TarEntryMismatch,
}

impl EventType {
    pub fn is_none(&self) -> bool {
        matches!(self, EventType::None)
    }

    fn as_str(&self) -> &'static str {
        match self {
            EventType::None => "",
            EventType::DescriptorMismatch => "DescriptorMismatch",
            EventType::IndexBlobMismatch => "IndexBlobMismatch",
            EventType::ManifestBlobMismatch => "ManifestBlobMismatch",
            EventType::ConfigBlobMismatch => "ConfigBlobMismatch",
            EventType::LayerBlobMismatch => "LayerBlobMismatch",
            EventType::TarEntryMismatch => "TarEntryMismatch",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a comparison: the descriptor plus whatever parsed peer is
/// already in hand for rendering (index, manifest, config, or tar entry).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<ImageIndex>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ImageManifest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ImageConfig>,

    #[serde(rename = "tarEntry", default, skip_serializing_if = "Option::is_none")]
    pub tar_entry: Option<TarEntry>,
}

/// A detected difference between the two inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default, skip_serializing_if = "EventType::is_none")]
    pub event_type: EventType,

    #[serde(default)]
    pub inputs: [EventInput; 2],

    /// Human-readable rendering of the difference. Not machine-parsable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff: String,

    /// Free-form qualifier (field name, appearance counts, ...). Not
    /// machine-parsable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.event_type)?;
        if !self.note.is_empty() {
            write!(f, " ({})", self.note)?;
        }
        if !self.diff.is_empty() {
            write!(f, "\n{}", self.diff)?;
        }
        Ok(())
    }
}

/// A node of the event tree.
///
/// `context` is a slash-path built by joining the parent context with a
/// locally chosen segment (e.g. `/manifests-0/layers-3`); it is not unique
/// across siblings. Child appends are serialized by a per-node lock so the
/// tree stays safe for future parallel producers.
#[derive(Debug, Default)]
pub struct EventTreeNode {
    pub context: String,
    pub event: Event,
    children: Mutex<Vec<EventTreeNode>>,
}

impl EventTreeNode {
    pub fn new(context: impl Into<String>, event: Event) -> Self {
        Self {
            context: context.into(),
            event,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Append a child node.
    pub fn append(&self, child: EventTreeNode) {
        self.lock_children().push(child);
    }

    pub fn children(&self) -> MutexGuard<'_, Vec<EventTreeNode>> {
        self.lock_children()
    }

    pub fn children_len(&self) -> usize {
        self.lock_children().len()
    }

    pub fn has_children(&self) -> bool {
        self.children_len() > 0
    }

    fn lock_children(&self) -> MutexGuard<'_, Vec<EventTreeNode>> {
        match self.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Serialize for EventTreeNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let children = self.lock_children();
        let fields = if children.is_empty() { 2 } else { 3 };
        let mut st = serializer.serialize_struct("EventTreeNode", fields)?;
        st.serialize_field("context", &self.context)?;
        st.serialize_field("event", &self.event)?;
        if !children.is_empty() {
            st.serialize_field("children", &*children)?;
        }
        st.end()
    }
}

impl<'de> Deserialize<'de> for EventTreeNode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Repr {
            #[serde(default)]
            context: String,
            #[serde(default)]
            event: Event,
            #[serde(default)]
            children: Vec<EventTreeNode>,
        }
        let repr = Repr::deserialize(deserializer)?;
        Ok(EventTreeNode {
            context: repr.context,
            event: repr.event,
            children: Mutex::new(repr.children),
        })
    }
}

/// Observes events as the walker raises them.
///
/// A handler may block; the walker holds no internal locks across the call.
/// Errors are collected into the walk's joined error without aborting it.
pub trait EventHandler: Send + Sync {
    fn handle(&self, node: &EventTreeNode) -> Result<()>;

    /// Called once after the walk completes.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

static DEFAULT_HANDLER: OnceLock<Arc<dyn EventHandler>> = OnceLock::new();

/// The process-wide default event handler (tabular, bound to stdout).
pub fn default_event_handler() -> Arc<dyn EventHandler> {
    DEFAULT_HANDLER
        .get_or_init(|| Arc::new(TableEventHandler::new(std::io::stdout())))
        .clone()
}

/// Replace the process-wide default handler.
///
/// Must be called before the first [`default_event_handler`] use; returns
/// false (leaving the existing handler in place) otherwise.
pub fn set_default_event_handler(handler: Arc<dyn EventHandler>) -> bool {
    DEFAULT_HANDLER.set(handler).is_ok()
}

/// Renders one aligned row per leaf event.
///
/// Columns are `TYPE NAME INPUT-0 INPUT-1`; rows accumulate and the table
/// is written on [`flush`](EventHandler::flush), mirroring a buffered tab
/// writer.
pub struct TableEventHandler<W: Write + Send> {
    state: Mutex<TableState<W>>,
}

struct TableState<W> {
    writer: W,
    table: Table,
    has_rows: bool,
}

impl<W: Write + Send> TableEventHandler<W> {
    pub fn new(writer: W) -> Self {
        let mut table = Table::new();
        table.load_preset(comfy_table::presets::NOTHING);
        Self {
            state: Mutex::new(TableState {
                writer,
                table,
                has_rows: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState<W>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventHandler for TableEventHandler<W> {
    fn handle(&self, node: &EventTreeNode) -> Result<()> {
        tracing::debug!("Event: {}", node.event);
        // Only leaf events become rows.
        if node.has_children() {
            return Ok(());
        }
        let Some(row) = render_row(node) else {
            tracing::warn!("Unknown event: {}", node.event);
            return Ok(());
        };
        let mut state = self.lock();
        if !state.has_rows {
            state
                .table
                .set_header(vec!["TYPE", "NAME", "INPUT-0", "INPUT-1"]);
            state.has_rows = true;
        }
        state.table.add_row(row);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        if state.has_rows {
            let rendered = state.table.to_string();
            writeln!(state.writer, "{rendered}")?;
            state.writer.flush()?;
        }
        Ok(())
    }
}

fn render_row(node: &EventTreeNode) -> Option<Vec<String>> {
    let ev = &node.event;
    let (mut d0, mut d1) = if ev.note.is_empty() {
        ("?".to_owned(), "?".to_owned())
    } else {
        (ev.note.clone(), String::new())
    };
    let mut name = if node.context.is_empty() {
        "-".to_owned()
    } else {
        format!("ctx:{}", node.context)
    };

    let tag = match ev.event_type {
        EventType::DescriptorMismatch => {
            if let (Some(desc0), Some(desc1)) =
                (&ev.inputs[0].descriptor, &ev.inputs[1].descriptor)
            {
                name = desc0.media_type.clone();
                if desc0.media_type != desc1.media_type {
                    d0 = desc0.media_type.clone();
                    d1 = desc1.media_type.clone();
                } else if desc0.digest != desc1.digest {
                    d0 = strip_sha256(&desc0.digest).to_owned();
                    d1 = strip_sha256(&desc1.digest).to_owned();
                }
            }
            "Desc"
        }
        EventType::IndexBlobMismatch => "Idx",
        EventType::ManifestBlobMismatch => "Mani",
        EventType::ConfigBlobMismatch => "Cfg",
        EventType::LayerBlobMismatch => "Layer",
        EventType::TarEntryMismatch => {
            let ent0 = ev.inputs[0].tar_entry.as_ref();
            let ent1 = ev.inputs[1].tar_entry.as_ref();
            name = "?".to_owned();
            d0 = "?".to_owned();
            d1 = "?".to_owned();
            match (ent0, ent1) {
                (None, None) => {
                    d0 = "missing".to_owned();
                    d1 = "missing".to_owned();
                }
                (Some(ent0), None) => {
                    name = ent0.header.name.clone();
                    d1 = "missing".to_owned();
                }
                (None, Some(ent1)) => {
                    name = ent1.header.name.clone();
                    d0 = "missing".to_owned();
                }
                (Some(ent0), Some(ent1)) => {
                    name = ent0.header.name.clone();
                    (d0, d1) = dominant_tar_difference(ent0, ent1);
                }
            }
            "File"
        }
        EventType::None => return None,
    };

    Some(vec![tag.to_owned(), name, d0, d1])
}

/// Resolve the dominant differing field of a tar-entry pair for display.
fn dominant_tar_difference(ent0: &TarEntry, ent1: &TarEntry) -> (String, String) {
    let hdr0 = &ent0.header;
    let hdr1 = &ent1.header;
    if hdr0.name != hdr1.name {
        (hdr0.name.clone(), hdr1.name.clone())
    } else if hdr0.linkname != hdr1.linkname {
        (
            format!("Linkname {}", hdr0.linkname),
            format!("Linkname {}", hdr1.linkname),
        )
    } else if hdr0.mode != hdr1.mode {
        (
            format!("Mode 0x{:x}", hdr0.mode),
            format!("Mode 0x{:x}", hdr1.mode),
        )
    } else if hdr0.uid != hdr1.uid {
        (format!("Uid {}", hdr0.uid), format!("Uid {}", hdr1.uid))
    } else if hdr0.gid != hdr1.gid {
        (format!("Gid {}", hdr0.gid), format!("Gid {}", hdr1.gid))
    } else if hdr0.uname != hdr1.uname {
        (
            format!("Uname {}", hdr0.uname),
            format!("Uname {}", hdr1.uname),
        )
    } else if hdr0.gname != hdr1.gname {
        (
            format!("Gname {}", hdr0.gname),
            format!("Gname {}", hdr1.gname),
        )
    } else if hdr0.dev_major != hdr1.dev_major || hdr0.dev_minor != hdr1.dev_minor {
        (
            format!("Dev {}:{}", hdr0.dev_major, hdr0.dev_minor),
            format!("Dev {}:{}", hdr1.dev_major, hdr1.dev_minor),
        )
    } else if ent0.digest != ent1.digest {
        (
            strip_sha256(&ent0.digest).to_owned(),
            strip_sha256(&ent1.digest).to_owned(),
        )
    } else if hdr0.mod_time != hdr1.mod_time {
        (hdr0.mod_time.to_string(), hdr1.mod_time.to_string())
    } else if hdr0.access_time != hdr1.access_time {
        (
            format!("Atime {}", fmt_opt(hdr0.access_time)),
            format!("Atime {}", fmt_opt(hdr1.access_time)),
        )
    } else if hdr0.change_time != hdr1.change_time {
        (
            format!("Ctime {}", fmt_opt(hdr0.change_time)),
            format!("Ctime {}", fmt_opt(hdr1.change_time)),
        )
    } else if ent0.index != ent1.index {
        (
            format!("Index {}", ent0.index),
            format!("Index {}", ent1.index),
        )
    } else if hdr0.format != hdr1.format {
        (
            format!("Format {}", fmt_format(hdr0.format)),
            format!("Format {}", fmt_format(hdr1.format)),
        )
    } else {
        ("?".to_owned(), "?".to_owned())
    }
}

fn fmt_opt(v: Option<u64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "-".to_owned(),
    }
}

fn fmt_format(format: Option<crate::tar_stream::TarFormat>) -> String {
    match format {
        Some(format) => serde_json::to_value(format)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default(),
        None => "-".to_owned(),
    }
}

fn strip_sha256(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

/// Prints every event, including internal aggregators.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerboseEventHandler;

impl EventHandler for VerboseEventHandler {
    fn handle(&self, node: &EventTreeNode) -> Result<()> {
        println!("Event: {}", node.event);
        Ok(())
    }
}

/// Wrap a handler error for accumulation.
pub(crate) fn handler_error(err: DiffError) -> DiffError {
    match err {
        err @ DiffError::Handler(_) => err,
        other => DiffError::Handler(other.to_string()),
    }
}
