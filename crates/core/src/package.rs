//! Locating a previously built app package.
//!
//! The packaging stage drops its zip in one of a few conventional spots
//! depending on the build script in use; the locator probes them in a
//! fixed order and returns the first hit.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Candidate package locations for `target` under `root`, most specific
/// first.
fn candidates(target: &str, root: &Path) -> [PathBuf; 3] {
    [
        root.join("dist").join(format!("{target}-appPackage.zip")),
        root.join("appPackage").join("build").join(format!("{target}.zip")),
        root.join(target).join("appPackage.zip"),
    ]
}

/// Find the built package for `target` under `root`.
///
/// Returns `None` when no candidate exists; absence is an answer, not an
/// error.
pub fn find_package(target: &str, root: &Path) -> Option<PathBuf> {
    for candidate in candidates(target, root) {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "found app package");
            return Some(candidate);
        }
    }
    None
}
