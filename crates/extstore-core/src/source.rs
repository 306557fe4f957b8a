//! External source directory layout: version declaration and update scripts.
//!
//! The source directory is operator-controlled and read-only from this
//! engine's perspective. It may hold a replacement payload named exactly as
//! the store, a `version.info` file declaring the version the source wants
//! the store at, and per-version update scripts.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::DeployError;

/// Reserved name of the version declaration file inside a source directory.
pub const VERSION_INFO_FILE: &str = "version.info";

/// Filename of the update script targeting `version`, derived from the
/// store name. Pure; does not touch the filesystem.
#[must_use]
pub fn script_file_name(store_name: &str, version: i64) -> String {
    format!("{store_name}_update_{version}.sql")
}

/// Resolve the version the source directory declares.
///
/// A missing `version.info` is the common case and falls back to `default`
/// (the store's current version, so the pass becomes a no-op). A file that
/// is present but unusable is an operator mistake and fails the pass.
///
/// # Errors
/// `MalformedVersionDeclaration` when the file exists but is unreadable or
/// not an integer; `InvalidVersionValue` when it parses below 1.
pub fn declared_version(source_dir: &Path, default: i64) -> Result<i64, DeployError> {
    let path = source_dir.join(VERSION_INFO_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::info!(
                path = %path.display(),
                default,
                "no version declaration in source directory, continuing with current version"
            );
            return Ok(default);
        }
        Err(err) => {
            return Err(DeployError::MalformedVersionDeclaration {
                path,
                detail: err.to_string(),
            })
        }
    };

    let value: i64 = text
        .trim()
        .parse()
        .map_err(|err: std::num::ParseIntError| DeployError::MalformedVersionDeclaration {
            path,
            detail: err.to_string(),
        })?;

    if value < 1 {
        return Err(DeployError::InvalidVersionValue { value });
    }
    Ok(value)
}

/// Read the update script targeting `target_version`, if the source ships
/// one. A missing file means no SQL is needed for this version transition.
///
/// Read failures other than not-found are tolerated and treated as absent
/// so a broken script file cannot block a payload-driven migration, but
/// they are surfaced as a warning because they can also mask a genuine
/// missing-migration-path condition.
#[must_use]
pub fn update_script(source_dir: &Path, store_name: &str, target_version: i64) -> Option<String> {
    let path = source_dir.join(script_file_name(store_name, target_version));
    match fs::read_to_string(&path) {
        Ok(text) if text.trim().is_empty() => {
            tracing::info!(path = %path.display(), "update script file is empty, treating as absent");
            None
        }
        Ok(text) => Some(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "update script exists but could not be read, proceeding as if absent"
            );
            None
        }
    }
}
