//! Platform matching for index walks.
//!
//! The walker is handed a [`PlatformMatcher`]; index entries whose platform
//! is set but not matched are skipped without error, and a manifest whose
//! descriptor platform is unmatched short-circuits to success.

use crate::oci::Platform;

/// Decides whether a manifest platform is of interest to the walk.
pub trait PlatformMatcher {
    /// True when `platform` should be descended into.
    fn matches(&self, platform: &Platform) -> bool;
}

/// Matches every platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAny;

impl PlatformMatcher for MatchAny {
    fn matches(&self, _platform: &Platform) -> bool {
        true
    }
}

/// Matches any platform from a fixed set.
///
/// OS and architecture are compared after normalization; a variant
/// constrains the match only when the wanted platform specifies one.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    wanted: Vec<Platform>,
}

impl MatchSet {
    pub fn new(wanted: Vec<Platform>) -> Self {
        Self { wanted }
    }
}

impl PlatformMatcher for MatchSet {
    fn matches(&self, platform: &Platform) -> bool {
        self.wanted.iter().any(|want| {
            normalize_os(&want.os) == normalize_os(&platform.os)
                && normalize_arch(&want.architecture) == normalize_arch(&platform.architecture)
                && match &want.variant {
                    Some(variant) => platform.variant.as_deref() == Some(variant.as_str()),
                    None => true,
                }
        })
    }
}

/// Parse a `os/arch[/variant]` specifier (e.g. `linux/amd64`,
/// `linux/arm/v7`). A bare `os` or `os/arch` is accepted.
pub fn parse_platform(spec: &str) -> Option<Platform> {
    let mut parts = spec.split('/');
    let os = parts.next().filter(|s| !s.is_empty())?;
    let architecture = parts.next().unwrap_or("");
    let variant = parts.next().map(str::to_owned);
    if parts.next().is_some() {
        return None;
    }
    Some(Platform {
        architecture: normalize_arch(architecture),
        os: normalize_os(os),
        os_version: None,
        os_features: None,
        variant,
    })
}

/// Render a platform as `os/arch[/variant]`.
pub fn format_platform(platform: &Platform) -> String {
    let mut s = format!("{}/{}", platform.os, platform.architecture);
    if let Some(variant) = &platform.variant {
        s.push('/');
        s.push_str(variant);
    }
    s
}

fn normalize_os(os: &str) -> String {
    let os = os.to_ascii_lowercase();
    match os.as_str() {
        "macos" => "darwin".to_owned(),
        _ => os,
    }
}

fn normalize_arch(arch: &str) -> String {
    let arch = arch.to_ascii_lowercase();
    match arch.as_str() {
        "x86_64" | "x86-64" => "amd64".to_owned(),
        "aarch64" | "arm64" => "arm64".to_owned(),
        "i386" | "i486" | "i586" | "i686" => "386".to_owned(),
        _ => arch,
    }
}
