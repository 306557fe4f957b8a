//! Error types for the deployment engine.
//!
//! `DeployError` is the caller-facing taxonomy: every fatal condition a
//! deployment pass can hit maps to exactly one variant. Collaborator
//! implementations (store engines, reconciliation hooks) fail with the
//! opaque `StoreError` and the orchestrator wraps it into the variant
//! matching the step that failed.

use std::path::PathBuf;

use thiserror::Error;

/// Opaque failure reported by a store engine, handle, or hook implementation.
///
/// The core never inspects the underlying error; it only decides which
/// `DeployError` variant the failure belongs to based on the step in which
/// it occurred.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct StoreError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl StoreError {
    /// Wrap an implementation-specific error.
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }

    /// Build an error from a plain message, for implementations without a
    /// richer error type of their own.
    pub fn message(msg: impl Into<String>) -> Self {
        Self(msg.into().into())
    }
}

/// Fatal conditions aborting an `ensure_deployed` pass.
///
/// Nothing is retried by the engine itself; a caller may re-invoke the pass
/// on the next access where the taxonomy makes that meaningful (for example
/// `NoMigrationPathAvailable` clears once the operator ships a script or a
/// replacement payload).
#[derive(Debug, Error)]
pub enum DeployError {
    /// The host environment forbids reading the external source directory.
    /// Checked before any state-machine work.
    #[error("read access to external source {source_dir} is not granted")]
    PermissionDenied { source_dir: PathBuf },

    /// The version declaration file exists but is unreadable or does not
    /// hold an integer. A missing file is not an error.
    #[error("version declaration {path} is unusable: {detail}")]
    MalformedVersionDeclaration { path: PathBuf, detail: String },

    /// The version declaration parsed but holds a value below 1.
    #[error("declared version must be >= 1, was {value}")]
    InvalidVersionValue { value: i64 },

    /// The declared version differs from the stored one, but the source
    /// offers neither an update script nor a replacement payload to act on.
    /// The store is left untouched at the old version.
    #[error("no update script and no replacement payload for version change {from} -> {to}")]
    NoMigrationPathAvailable { from: i64, to: i64 },

    /// An update script executed but errored; its transaction was rolled
    /// back and the stored version is unchanged.
    #[error("update script for version {version} failed: {source}")]
    MigrationScriptFailed {
        version: i64,
        #[source]
        source: StoreError,
    },

    /// A replacement payload exists but cannot be opened as a valid store.
    /// The working local store is never overwritten with it.
    #[error("external payload {path} is not a valid store: {source}")]
    CorruptExternalSource {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    /// Byte copy during fresh install failed; the partial destination has
    /// been removed.
    #[error("failed to copy store payload to {destination}: {source}")]
    TransferFailed {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fresh install was required but neither the external payload nor a
    /// bundled asset copy exists.
    #[error("store {name} is not installed and no external payload or bundled asset provides it")]
    NoInstallSourceAvailable { name: String },

    /// A caller-supplied reconciliation hook failed. Both handles were
    /// released before this surfaced; the version stamp did not run.
    #[error("reconciliation hook for version change {from} -> {to} failed: {source}")]
    ReconciliationHookFailed {
        from: i64,
        to: i64,
        #[source]
        source: StoreError,
    },

    /// Store engine plumbing (open, close, version read, stamp) failed
    /// outside the specifically named cases above.
    #[error("store engine error: {0}")]
    Store(#[source] StoreError),
}
