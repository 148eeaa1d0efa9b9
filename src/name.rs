//! Validation of client supplied resource names.
//!
//! Names are checked lexically, before any filesystem access, so that no
//! name can reach outside the store root. Symlinks placed inside the root
//! by the operator are followed as-is.

use std::path::{Path, PathBuf};

/// Resolves `name` against `root`.
///
/// Returns `None` if the name is empty, absolute, contains a backslash or
/// NUL byte, contains a `..` segment anywhere, or names the root itself.
/// Empty and `.` segments are skipped, so `a//./b.mp4` resolves to
/// `root/a/b.mp4`.
pub fn resolve(root: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() || name.starts_with('/') || name.contains(['\\', '\0']) {
        return None;
    }

    let mut path = root.to_path_buf();
    let mut segments = 0;
    for segment in name.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            segment => {
                path.push(segment);
                segments += 1;
            }
        }
    }

    (segments > 0).then_some(path)
}

/// Whether `name` would resolve inside any root. See [`resolve`].
pub fn is_safe(name: &str) -> bool {
    resolve(Path::new(""), name).is_some()
}

/// Reduces an uploaded filename to a flat, portable name.
///
/// - Drops non-ASCII characters
/// - Turns path separators and runs of whitespace into a single `_`
/// - Keeps only `A-Z a-z 0-9 _ . -`
/// - Trims leading and trailing `.` and `_`
///
/// Returns `None` when nothing usable is left.
pub fn secure_filename(name: &str) -> Option<String> {
    let spaced: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_ascii_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Whether the extension after the last `.` is one of `allowed`,
/// compared case-insensitively.
pub fn has_allowed_extension<S: AsRef<str>>(name: &str, allowed: &[S]) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => allowed.iter().any(|a| a.as_ref().eq_ignore_ascii_case(ext)),
        None => false,
    }
}
