//! Report persistence.
//!
//! A report file receives the JSON-encoded event tree. A report directory
//! additionally receives every extracted tar entry under `input-0/` and
//! `input-1/`, a short `README.md`, and the tree as `report.json`. On entry
//! the directory is created and any stale children from a previous run are
//! removed.

use std::path::{Path, PathBuf};

use cap_std::ambient_authority;
use cap_std::fs::Dir;

use crate::error::Result;
use crate::event::EventTreeNode;
use crate::untar::ExtractDir;

/// Name of the serialized event tree inside a report directory.
pub const REPORT_DIR_REPORT_JSON: &str = "report.json";

/// Extraction subdirectory for the first input.
pub const REPORT_DIR_INPUT_0: &str = "input-0";

/// Extraction subdirectory for the second input.
pub const REPORT_DIR_INPUT_1: &str = "input-1";

/// Children of the report directory that are replaced on every run.
pub const REPORT_DIR_ROOT_FILENAMES: [&str; 4] = [
    "README.md",
    REPORT_DIR_REPORT_JSON,
    REPORT_DIR_INPUT_0,
    REPORT_DIR_INPUT_1,
];

const README: &str = "\
# Image diff report

Produced by ocidiff.

- `report.json`: the event tree of every detected difference.
- `input-0/`, `input-1/`: tar entries that differed between the two
  images, laid out under their event-tree context path. Entries that
  matched were removed after comparison.
";

/// An opened, prepared report directory.
pub(crate) struct ReportRoot {
    dir: Dir,
    path: PathBuf,
}

impl ReportRoot {
    /// Create (or reuse) the report directory and clear stale children.
    pub(crate) fn prepare(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let dir = Dir::open_ambient_dir(path, ambient_authority())?;
        for name in REPORT_DIR_ROOT_FILENAMES {
            tracing::debug!("removing {name:?} from the report dir (if present)");
            match dir.symlink_metadata(name) {
                Ok(meta) if meta.is_dir() => dir.remove_dir_all(name)?,
                Ok(_) => dir.remove_file(name)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        dir.write("README.md", README)?;
        Ok(Self {
            dir,
            path: path.to_path_buf(),
        })
    }

    /// Open `<report-dir>/input-N/<context>` for extraction, creating it.
    pub(crate) fn open_extract_dir(&self, input: usize, context: &str) -> Result<ExtractDir> {
        let input_name = if input == 0 {
            REPORT_DIR_INPUT_0
        } else {
            REPORT_DIR_INPUT_1
        };
        let mut rel = PathBuf::from(input_name);
        let context = context.trim_matches('/');
        if !context.is_empty() {
            rel.push(context);
        }
        self.dir.create_dir_all(&rel)?;
        let dir = self.dir.open_dir(&rel)?;
        let abs = self.path.join(&rel);
        Ok(ExtractDir::new(dir, rel, abs))
    }

    /// Best-effort removal of a matched entry's extracted file.
    pub(crate) fn remove_file_best_effort(&self, rel: &str) {
        if let Err(err) = self.dir.remove_file(rel) {
            tracing::debug!("failed to remove extracted file {rel:?}: {err}");
        }
    }

    /// Remove matched directories, children first, only if they are empty.
    pub(crate) fn remove_dirs_if_empty(&self, mut rels: Vec<String>) {
        rels.sort();
        rels.reverse();
        for rel in rels {
            // Non-recursive by design; a non-empty directory stays.
            let _ = self.dir.remove_dir(&rel);
        }
    }

    /// Serialize the final event tree to `report.json`.
    pub(crate) fn write_report_json(&self, node: &EventTreeNode) -> Result<()> {
        let file = self.dir.create(REPORT_DIR_REPORT_JSON)?;
        serde_json::to_writer(file, node).map_err(std::io::Error::from)?;
        Ok(())
    }
}

/// Serialize the event tree to an arbitrary report file path.
pub(crate) fn write_report_file(path: &Path, node: &EventTreeNode) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(file, node).map_err(std::io::Error::from)?;
    Ok(())
}
