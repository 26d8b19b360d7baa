//! Name and version canonicalization.

use pep440_rs::Version;
use std::str::FromStr;

/// Canonicalize a project name: lowercase, runs of `-`, `_`, `.` become `-`.
pub fn canonicalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
            continue;
        }
        in_separator = false;
        out.extend(c.to_lowercase());
    }
    out
}

/// True if `name` is a valid distribution name (PEP 508).
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}

/// Parse a PEP 440 version.
pub fn parse_version(version: &str) -> Option<Version> {
    Version::from_str(version.trim()).ok()
}

/// Canonicalize a version string.
///
/// The PEP 440 normal form with trailing zero release segments removed,
/// so `1.0` becomes `1` and `2.0.0rc1` becomes `2rc1`. Returns `None` for
/// strings that are not valid versions.
pub fn canonicalize_version(version: &str) -> Option<String> {
    let parsed = parse_version(version)?;
    let normalized = parsed.to_string();

    let release = parsed.release();
    let epoch_prefix = if parsed.epoch() > 0 {
        format!("{}!", parsed.epoch())
    } else {
        String::new()
    };
    let release_str = join_release(release);
    let rest = normalized
        .strip_prefix(&epoch_prefix)
        .and_then(|s| s.strip_prefix(&release_str))
        .unwrap_or_default();

    let keep = release
        .iter()
        .rposition(|&part| part != 0)
        .map_or(1, |last| last + 1);

    Some(format!(
        "{}{}{}",
        epoch_prefix,
        join_release(&release[..keep.min(release.len())]),
        rest
    ))
}

fn join_release(release: &[u64]) -> String {
    release
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
