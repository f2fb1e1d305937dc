//! Storage filename derivation.
//!
//! A sanitized fragment is a best-effort filename. Distinct identity keys can map to
//! the same fragment (`"A B"` and `"A_B"` both become `"A_B"`), so callers must never
//! use it as a uniqueness key. [`keyed_fragment`] disambiguates by appending a digest
//! of the full identity key.

use sha2::{Digest, Sha256};

/// Image extensions accepted for resource ingestion.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Number of hex characters of the identity digest used by [`keyed_fragment`].
const KEYED_SUFFIX_LEN: usize = 8;

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// Pure, deterministic and total. Each Unicode scalar value maps to exactly one
/// output character, so the fragment has as many characters as the input.
pub fn sanitize_fragment(identity_key: &str) -> String {
    identity_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitized fragment suffixed with a short SHA-256 digest of the raw identity key.
pub fn keyed_fragment(identity_key: &str) -> String {
    let digest = Sha256::digest(identity_key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}",
        sanitize_fragment(identity_key),
        &hex[..KEYED_SUFFIX_LEN]
    )
}

/// Lower-cased extension of a storage path, if it has a usable one.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Stem of a storage path (file name without directory or extension).
pub fn stem_of(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Content type for an accepted image extension.
pub fn content_type_for(extension: &str) -> crate::Result<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "gif" => Ok("image/gif"),
        other => Err(crate::Error::UnsupportedFileType(format!(
            "'{other}' (expected one of {})",
            IMAGE_EXTENSIONS.join(", ")
        ))),
    }
}

/// Build a destination filename from a fragment and extension.
pub fn destination_filename(fragment: &str, extension: &str) -> String {
    format!("{fragment}.{extension}")
}

/// Join storage-relative path segments with `/`.
pub fn join_storage_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
