//! Tar entry extraction into the report directory.
//!
//! When a report directory is configured, every tar entry is written to
//! `<report-dir>/input-{0,1}/<context>/<entry-name>` while its SHA-256 is
//! computed in the same pass. All file creation goes through a
//! [`cap_std::fs::Dir`] handle rooted at the per-layer context directory, so
//! symlinked parents inside a hostile layer cannot escape the report
//! directory. Metadata syscalls use `rustix` with `AT_SYMLINK_NOFOLLOW`.
//!
//! Ownership and xattr failures are tolerated (logged at debug); mode and
//! timestamp failures are not. Directory mtimes must be applied after the
//! whole layer is processed, since creating further entries inside a
//! directory perturbs its mtime; [`apply_dir_times`] runs those deferred
//! updates.

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use cap_std::fs::{Dir, OpenOptions};
use rustix::fs::{AtFlags, FileType, Gid, Mode, Timespec, Timestamps, Uid, XattrFlags};
use sha2::{Digest as _, Sha256};

use crate::diff::CancelToken;
use crate::error::{DiffError, Result};
use crate::tar_stream::TarHeader;

/// PAX record prefix carrying extended attributes.
const PAX_SCHILY_XATTR: &str = "SCHILY.xattr.";

/// The extraction root for one input side of one layer.
pub(crate) struct ExtractDir {
    /// Handle to `<report-dir>/input-N/<context>`; every create goes
    /// through it.
    dir: Dir,
    /// The same directory relative to the report root, for cleanup paths.
    rel: PathBuf,
    /// Absolute path, used only for path-based xattr calls.
    abs: PathBuf,
}

impl ExtractDir {
    pub(crate) fn new(dir: Dir, rel: PathBuf, abs: PathBuf) -> Self {
        Self { dir, rel, abs }
    }
}

/// Result of extracting (or hashing) one entry.
#[derive(Debug)]
pub(crate) struct ExtractOutcome {
    /// Path relative to the report root, when a report dir is configured.
    pub rel_path: Option<String>,
    /// `sha256:<hex>` of the entry body; empty for entries that resolve to
    /// the extraction root.
    pub digest: String,
    /// Deferred directory timestamp update, applied by [`apply_dir_times`].
    pub dir_times: Option<PendingDirTimes>,
}

/// A directory whose atime/mtime must be set after the layer completes.
#[derive(Debug)]
pub(crate) struct PendingDirTimes {
    rel: PathBuf,
    atime: u64,
    mtime: u64,
}

/// Hash an entry body without extracting it.
pub(crate) fn digest_entry(body: &mut dyn Read, cancel: Option<&CancelToken>) -> Result<String> {
    let mut hasher = Sha256::new();
    copy_cancelable(body, &mut HashWriter(&mut hasher), cancel)?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Extract one tar entry under `root`, hashing the body in the same pass.
pub(crate) fn extract_entry(
    root: &ExtractDir,
    hdr: &TarHeader,
    body: &mut dyn Read,
    cancel: Option<&CancelToken>,
) -> Result<ExtractOutcome> {
    let Some(rel) = normalize_entry_path(&hdr.name)? else {
        // The entry names the extraction root itself; nothing to create.
        tracing::debug!("entry {:?} resolved to the extraction root", hdr.name);
        return Ok(ExtractOutcome {
            rel_path: Some(path_string(&root.rel)),
            digest: String::new(),
            dir_times: None,
        });
    };

    if let Some(parent) = rel.parent().filter(|p| !p.as_os_str().is_empty()) {
        root.dir.create_dir_all(parent)?;
    }

    let mut hasher = Sha256::new();
    let mut dir_times = None;

    match hdr.typeflag {
        // Directory: merge with an existing one, otherwise create.
        b'5' => {
            match root.dir.symlink_metadata(&rel) {
                Ok(meta) if meta.is_dir() => {}
                _ => root.dir.create_dir(&rel)?,
            }
            dir_times = Some(PendingDirTimes {
                rel: rel.clone(),
                atime: effective_atime(hdr),
                mtime: hdr.mod_time,
            });
        }
        // Regular file (incl. the deprecated old-style regular marker).
        b'0' | 0 | b'7' => {
            let mut file = root.dir.open_with(
                &rel,
                OpenOptions::new().write(true).create(true).truncate(true),
            )?;
            let mut tee = TeeWriter {
                file: &mut file,
                hasher: &mut hasher,
            };
            copy_cancelable(body, &mut tee, cancel)?;
        }
        // Device nodes and FIFOs.
        b'3' | b'4' | b'6' => {
            let file_type = match hdr.typeflag {
                b'3' => FileType::CharacterDevice,
                b'4' => FileType::BlockDevice,
                _ => FileType::Fifo,
            };
            rustix::fs::mknodat(
                &root.dir,
                &rel,
                file_type,
                Mode::from_bits_truncate(hdr.mode & 0o7777),
                rustix::fs::makedev(hdr.dev_major, hdr.dev_minor),
            )
            .map_err(std::io::Error::from)?;
        }
        // Hard link, resolved within the extraction root. Linking to a
        // symlink links the symlink itself, not its target.
        b'1' => {
            let target = normalize_entry_path(&hdr.linkname)?.ok_or_else(|| {
                DiffError::Unsupported(format!(
                    "hardlink {:?} targets the extraction root",
                    hdr.name
                ))
            })?;
            root.dir.hard_link(&target, &root.dir, &rel)?;
        }
        // Symlink target is written verbatim; it may dangle.
        b'2' => {
            root.dir.symlink(&hdr.linkname, &rel)?;
        }
        // PAX global headers carry no file.
        b'g' => {
            tracing::debug!("PAX global extended header found and ignored");
            return Ok(ExtractOutcome {
                rel_path: Some(path_string(&root.rel.join(&rel))),
                digest: format!("sha256:{:x}", hasher.finalize()),
                dir_times: None,
            });
        }
        other => {
            return Err(DiffError::Unsupported(format!(
                "unhandled tar header type {other}"
            )));
        }
    }

    // rustix::fs::{Uid,Gid}::from_raw are `unsafe fn` purely because their
    // safety contract requires the raw value to be a valid Unix id, which any
    // u32 trivially satisfies; the call performs no actual unsafe operation.
    #[allow(unsafe_code)]
    let (owner_uid, owner_gid) = (
        unsafe { Uid::from_raw(hdr.uid as u32) },
        unsafe { Gid::from_raw(hdr.gid as u32) },
    );
    if let Err(err) = rustix::fs::chownat(
        &root.dir,
        &rel,
        Some(owner_uid),
        Some(owner_gid),
        AtFlags::SYMLINK_NOFOLLOW,
    ) {
        tracing::debug!(
            "failed to chown {:?} to {}:{}: {err}",
            rel,
            hdr.uid,
            hdr.gid
        );
    }

    for (key, value) in &hdr.pax_records {
        let Some(attr) = key.strip_prefix(PAX_SCHILY_XATTR) else {
            continue;
        };
        if attr.starts_with("trusted.") {
            tracing::debug!("skipping admin xattr {attr:?} on {:?}", rel);
            continue;
        }
        let abs = root.abs.join(&rel);
        if let Err(err) =
            rustix::fs::lsetxattr(&abs, attr, value.as_bytes(), XattrFlags::empty())
        {
            tracing::debug!("failed to setxattr {attr:?} on {:?}: {err}", rel);
        }
    }

    // chmod after chown, since chown can clear setuid bits. fchmodat cannot
    // avoid following a symlink final component on Linux, so skip those.
    if hdr.typeflag != b'2' {
        rustix::fs::chmodat(
            &root.dir,
            &rel,
            Mode::from_bits_truncate(hdr.mode & 0o7777),
            AtFlags::empty(),
        )
        .map_err(std::io::Error::from)?;
    }

    if hdr.typeflag != b'5' {
        set_times(&root.dir, &rel, effective_atime(hdr), hdr.mod_time)?;
    }

    Ok(ExtractOutcome {
        rel_path: Some(path_string(&root.rel.join(&rel))),
        digest: format!("sha256:{:x}", hasher.finalize()),
        dir_times,
    })
}

/// Apply deferred directory timestamps; failures are logged, not returned.
pub(crate) fn apply_dir_times(root: &ExtractDir, pending: &[PendingDirTimes]) {
    for times in pending {
        if let Err(err) = set_times(&root.dir, &times.rel, times.atime, times.mtime) {
            tracing::debug!("failed to finalize directory times on {:?}: {err}", times.rel);
        }
    }
}

fn set_times(dir: &Dir, rel: &Path, atime: u64, mtime: u64) -> Result<()> {
    let timestamps = Timestamps {
        last_access: Timespec {
            tv_sec: atime as i64,
            tv_nsec: 0,
        },
        last_modification: Timespec {
            tv_sec: mtime as i64,
            tv_nsec: 0,
        },
    };
    rustix::fs::utimensat(dir, rel, &timestamps, AtFlags::SYMLINK_NOFOLLOW)
        .map_err(std::io::Error::from)?;
    Ok(())
}

fn effective_atime(hdr: &TarHeader) -> u64 {
    hdr.access_time.unwrap_or(hdr.mod_time).max(hdr.mod_time)
}

/// Normalize a tar entry name to a path relative to the extraction root.
///
/// Leading `/` and `.` components are dropped; `..` escaping the root is an
/// error. `None` means the entry names the root itself.
pub(crate) fn normalize_entry_path(name: &str) -> Result<Option<PathBuf>> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(DiffError::Unsupported(format!(
                        "entry name {name:?} escapes the extraction root"
                    )));
                }
            }
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.iter().collect()))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

struct TeeWriter<'a, W: Write> {
    file: &'a mut W,
    hasher: &'a mut Sha256,
}

impl<W: Write> Write for TeeWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

struct HashWriter<'a>(&'a mut Sha256);

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn copy_cancelable(
    src: &mut dyn Read,
    dst: &mut dyn Write,
    cancel: Option<&CancelToken>,
) -> Result<u64> {
    let mut buf = [0u8; 32 * 1024];
    let mut written = 0u64;
    loop {
        if let Some(token) = cancel {
            if token.is_canceled() {
                return Err(DiffError::Canceled);
            }
        }
        let n = src.read(&mut buf)?;
        if n == 0 {
            return Ok(written);
        }
        dst.write_all(&buf[..n])?;
        written += n as u64;
    }
}
