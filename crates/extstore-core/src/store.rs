//! Collaborator contracts consumed by the deployment engine.
//!
//! The engine never talks to a database library directly: everything it
//! needs from the relational store is behind `StoreEngine`/`StoreHandle`,
//! the packaged fallback copy behind `AssetStore`, the host permission
//! check behind `SourceAccessPolicy`, and application-level merge logic
//! behind `ReconciliationHooks`. All of them are object-safe so a
//! `Deployer` can own boxed implementations.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// How a store handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Must not create the file and must reject writes.
    ReadOnly,
    /// Writable; may create the file if the engine's backend does so.
    ReadWrite,
}

/// A live connection to one store file.
///
/// Opening a handle on a path that is not a valid store must fail; the
/// orchestrator relies on that to detect corrupt replacement payloads.
pub trait StoreHandle {
    /// Read the version stamp persisted in the store.
    fn version(&mut self) -> Result<i64, StoreError>;

    /// Persist a new version stamp. Takes effect under the surrounding
    /// transaction if one is open.
    fn set_version(&mut self, version: i64) -> Result<(), StoreError>;

    fn begin_transaction(&mut self) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Execute raw statement text. The engine does not parse or validate
    /// it; execution failure is the only detection path.
    fn execute(&mut self, statements: &str) -> Result<(), StoreError>;

    /// Release the handle. Errors here matter on success paths (a commit
    /// that never hit disk); on error paths the orchestrator logs and
    /// keeps the original failure.
    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

/// Factory for store handles, implemented by the backing database layer.
pub trait StoreEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn StoreHandle>, StoreError>;
}

/// Fallback source of store payloads bundled with the application, used
/// for fresh installs when the external directory has no payload file.
pub trait AssetStore {
    /// Open the bundled payload for `name`, or `Ok(None)` if the
    /// application ships none under that name.
    ///
    /// # Errors
    /// Any failure other than the payload being absent.
    fn open_payload(&self, name: &str) -> io::Result<Option<Box<dyn Read>>>;
}

/// An application that bundles no store payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBundledAssets;

impl AssetStore for NoBundledAssets {
    fn open_payload(&self, _name: &str) -> io::Result<Option<Box<dyn Read>>> {
        Ok(None)
    }
}

/// Bundled payloads laid out as plain files under one directory, named
/// exactly as their stores.
#[derive(Debug, Clone)]
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetStore for DirAssetStore {
    fn open_payload(&self, name: &str) -> io::Result<Option<Box<dyn Read>>> {
        match File::open(self.root.join(name)) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Host-environment gate on reading the external source directory.
///
/// The engine checks this once per pass, before any other work.
pub trait SourceAccessPolicy {
    fn allows_read(&self, source_dir: &Path) -> bool;
}

/// Policy for hosts without a permission model of their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SourceAccessPolicy for AllowAll {
    fn allows_read(&self, _source_dir: &Path) -> bool {
        true
    }
}

/// Caller-supplied reconciliation logic invoked once per migration pass
/// when a replacement payload exists.
///
/// The live handle still reads the *old* version stamp at this point: the
/// hook runs after any update script has committed but before the version
/// stamp step. Both handles are released by the orchestrator after the
/// hook returns, whether or not it succeeded.
pub trait ReconciliationHooks {
    /// Called when the externally declared version is above the stored one.
    ///
    /// # Errors
    /// A hook error aborts the pass before the version stamp.
    fn on_upgrade_externally(
        &mut self,
        live: &mut dyn StoreHandle,
        external: &mut dyn StoreHandle,
        external_path: &Path,
        from_version: i64,
        to_version: i64,
    ) -> Result<(), StoreError> {
        let _ = (live, external, external_path, from_version, to_version);
        Ok(())
    }

    /// Called when the externally declared version is below the stored one.
    ///
    /// # Errors
    /// A hook error aborts the pass before the version stamp.
    fn on_downgrade_externally(
        &mut self,
        live: &mut dyn StoreHandle,
        external: &mut dyn StoreHandle,
        external_path: &Path,
        from_version: i64,
        to_version: i64,
    ) -> Result<(), StoreError> {
        let _ = (live, external, external_path, from_version, to_version);
        Ok(())
    }
}

/// Hooks that do nothing, for callers whose domain needs no reconciliation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ReconciliationHooks for NoHooks {}
