//! Tar entry capture for the layer differ.
//!
//! Layers are gzip/zstd/plain tar archives. The differ does not compare raw
//! bytes; it captures each entry's header into a [`TarHeader`] snapshot
//! (plus a SHA-256 digest of the body, computed elsewhere) and compares
//! those. [`walk_entries`] drives a sequence of decompressed tar streams as
//! one logical archive, which is how layer squashing is realized: when the
//! two images split their filesystems into different layer counts, each
//! side's layers are walked back-to-back with a continuous entry index.

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tar archive flavor an entry was encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TarFormat {
    Ustar,
    Pax,
    Gnu,
    Old,
}

/// Snapshot of one tar entry's header fields.
///
/// Field coverage follows what the comparison rules need: identity (name,
/// type, link target), ownership, permissions, sizes, timestamps, device
/// numbers, PAX records, and the encoder format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TarHeader {
    pub name: String,

    /// Raw tar typeflag byte (`b'0'` regular, `b'5'` directory, ...).
    pub typeflag: u8,

    pub mode: u32,

    pub uid: u64,

    pub gid: u64,

    pub size: u64,

    pub mod_time: u64,

    /// Access time, present only in GNU headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_time: Option<u64>,

    /// Change time, present only in GNU headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_time: Option<u64>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub linkname: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uname: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gname: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub dev_major: u32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub dev_minor: u32,

    /// PAX records attached to this entry (xattrs, high-resolution times).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pax_records: BTreeMap<String, String>,

    /// Cleared when tar-format differences are to be ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TarFormat>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// One captured tar entry: position, header, and body digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TarEntry {
    /// Position in the (possibly squashed) entry stream.
    pub index: i64,

    pub header: TarHeader,

    /// SHA-256 of the entry body, `sha256:<hex>`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,

    /// Where the entry body was extracted to, relative to the report
    /// directory. Never serialized.
    #[serde(skip)]
    pub(crate) extracted_path: Option<String>,
}

/// Header capture normalization selected by the active ignorance options.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderNorm {
    /// Strip leading `/` and `./` from entry names.
    pub canonical_paths: bool,
    /// Clear the captured encoder format.
    pub clear_format: bool,
}

/// Strip leading `/` and `./` segments from a tar entry name.
pub(crate) fn canonicalize_name(name: &str) -> &str {
    let mut s = name;
    loop {
        if let Some(rest) = s.strip_prefix("./") {
            s = rest;
        } else if let Some(rest) = s.strip_prefix('/') {
            s = rest;
        } else {
            return s;
        }
    }
}

/// Capture the header of the current entry.
///
/// Must be called before the entry body is consumed (PAX extensions are
/// read from the entry stream).
pub(crate) fn capture_header<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    norm: HeaderNorm,
) -> Result<TarHeader> {
    let mut pax_records = BTreeMap::new();
    let mut has_pax = false;
    if let Some(extensions) = entry.pax_extensions()? {
        for extension in extensions {
            let extension = extension?;
            has_pax = true;
            let key = String::from_utf8_lossy(extension.key_bytes()).into_owned();
            let value = String::from_utf8_lossy(extension.value_bytes()).into_owned();
            pax_records.insert(key, value);
        }
    }

    let mut name = entry.path()?.to_string_lossy().into_owned();
    if norm.canonical_paths {
        name = canonicalize_name(&name).to_owned();
    }
    let linkname = entry
        .link_name()?
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let header = entry.header();
    let format = if norm.clear_format {
        None
    } else if has_pax {
        Some(TarFormat::Pax)
    } else if header.as_gnu().is_some() {
        Some(TarFormat::Gnu)
    } else if header.as_ustar().is_some() {
        Some(TarFormat::Ustar)
    } else {
        Some(TarFormat::Old)
    };

    Ok(TarHeader {
        name,
        typeflag: header.entry_type().as_byte(),
        mode: header.mode()?,
        uid: header.uid()?,
        gid: header.gid()?,
        size: header.size()?,
        mod_time: header.mtime()?,
        access_time: header.as_gnu().and_then(|gnu| gnu.atime().ok()),
        change_time: header.as_gnu().and_then(|gnu| gnu.ctime().ok()),
        linkname,
        uname: header
            .username()
            .ok()
            .flatten()
            .map(str::to_owned)
            .unwrap_or_default(),
        gname: header
            .groupname()
            .ok()
            .flatten()
            .map(str::to_owned)
            .unwrap_or_default(),
        dev_major: header.device_major().ok().flatten().unwrap_or_default(),
        dev_minor: header.device_minor().ok().flatten().unwrap_or_default(),
        pax_records,
        format,
    })
}

/// Drive `f` over every entry of `streams`, treated as one logical archive.
///
/// The entry index passed to `f` continues across stream boundaries. With a
/// single stream this is an ordinary tar walk; with several it is the
/// squashed walk used when layer counts differ.
pub(crate) fn walk_entries<R: Read>(
    streams: Vec<R>,
    mut f: impl FnMut(i64, &mut tar::Entry<'_, R>) -> Result<()>,
) -> Result<()> {
    let mut index: i64 = 0;
    for stream in streams {
        let mut archive = tar::Archive::new(stream);
        for entry in archive.entries()? {
            let mut entry = entry?;
            f(index, &mut entry)?;
            index += 1;
        }
    }
    Ok(())
}
