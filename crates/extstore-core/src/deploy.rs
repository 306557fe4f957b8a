//! The deployment decision engine.
//!
//! On every access the `Deployer` decides between three mutually exclusive
//! branches for its store: install it fresh from the external source (or a
//! bundled asset), migrate it in place because the externally declared
//! version differs from the stored one, or leave it untouched. Migration
//! sequences three individually transactional steps: update-script
//! execution, reconciliation hooks against the replacement payload, and
//! the version stamp. A failure in any step aborts the pass with the store
//! still at its old version; the caller decides whether to retry on a
//! later access.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{DeployError, StoreError};
use crate::source;
use crate::store::{
    AllowAll, AssetStore, NoBundledAssets, NoHooks, OpenMode, ReconciliationHooks,
    SourceAccessPolicy, StoreEngine, StoreHandle,
};
use crate::transfer;

/// What a deployment pass did. Transient; useful for logging and tests,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    /// Store already matched the externally declared version.
    NotNeeded,
    /// Store did not exist and was installed from a payload or asset copy.
    FreshInstalled,
    /// Store was migrated in place and stamped with the new version.
    Migrated { from: i64, to: i64 },
}

/// Process-wide lock registry, one guard per logical store name. Passes
/// for different stores do not contend.
static DEPLOY_LOCKS: Lazy<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Fetch (or create) the guard for `store_name`. Guards no pass holds
/// anymore are swept on each lookup, so the registry stays bounded by the
/// number of stores with a deployment currently in flight.
fn lock_for(store_name: &str) -> Arc<Mutex<()>> {
    let mut locks = DEPLOY_LOCKS.lock();
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    locks
        .entry(store_name.to_owned())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[cfg(test)]
fn lock_registry_contains(store_name: &str) -> bool {
    DEPLOY_LOCKS.lock().contains_key(store_name)
}

/// Keeps one local store synchronized with its external source.
///
/// Built with [`Deployer::builder`]; the engine is mandatory, the asset
/// store, hooks, and access policy default to
/// [`NoBundledAssets`]/[`NoHooks`]/[`AllowAll`].
pub struct Deployer {
    name: String,
    source_dir: PathBuf,
    destination: PathBuf,
    engine: Box<dyn StoreEngine>,
    assets: Box<dyn AssetStore>,
    hooks: Box<dyn ReconciliationHooks>,
    policy: Box<dyn SourceAccessPolicy>,
}

/// Configures a [`Deployer`].
pub struct DeployerBuilder {
    inner: Deployer,
}

impl DeployerBuilder {
    /// Replace the fallback asset store used for fresh installs.
    #[must_use]
    pub fn assets(mut self, assets: impl AssetStore + 'static) -> Self {
        self.inner.assets = Box::new(assets);
        self
    }

    /// Install reconciliation hooks invoked when a replacement payload
    /// takes part in a migration.
    #[must_use]
    pub fn hooks(mut self, hooks: impl ReconciliationHooks + 'static) -> Self {
        self.inner.hooks = Box::new(hooks);
        self
    }

    /// Replace the permission gate on the external source directory.
    #[must_use]
    pub fn access_policy(mut self, policy: impl SourceAccessPolicy + 'static) -> Self {
        self.inner.policy = Box::new(policy);
        self
    }

    #[must_use]
    pub fn build(self) -> Deployer {
        self.inner
    }
}

impl Deployer {
    /// Start configuring a deployer for the store `name`, synchronized
    /// from `source_dir` into the file at `destination`.
    pub fn builder(
        name: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        engine: impl StoreEngine + 'static,
    ) -> DeployerBuilder {
        DeployerBuilder {
            inner: Self {
                name: name.into(),
                source_dir: source_dir.into(),
                destination: destination.into(),
                engine: Box::new(engine),
                assets: Box::new(NoBundledAssets),
                hooks: Box::new(NoHooks),
                policy: Box::new(AllowAll),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Bring the local store in line with the external source.
    ///
    /// Serializes with every other pass for the same store name via a
    /// process-wide lock held for the whole call. The lock is not
    /// reentrant: calling back into this deployer from a reconciliation
    /// hook deadlocks.
    ///
    /// # Errors
    /// See [`DeployError`]; the store is never left stamped with a version
    /// it was not actually reconciled to.
    pub fn ensure_deployed(&mut self) -> Result<DeploymentOutcome, DeployError> {
        let lock = lock_for(&self.name);
        let _held = lock.lock();
        self.deploy_locked()
    }

    /// Run a deployment pass, then open a handle to the live store.
    ///
    /// Both happen under the same per-name lock, so no other pass can
    /// interleave between the deployment and the open.
    ///
    /// # Errors
    /// Deployment errors as for [`Self::ensure_deployed`]; open failures
    /// surface as [`DeployError::Store`].
    pub fn open_live(&mut self, mode: OpenMode) -> Result<Box<dyn StoreHandle>, DeployError> {
        let lock = lock_for(&self.name);
        let _held = lock.lock();
        self.deploy_locked()?;
        self.engine
            .open(&self.destination, mode)
            .map_err(DeployError::Store)
    }

    fn deploy_locked(&mut self) -> Result<DeploymentOutcome, DeployError> {
        if !self.policy.allows_read(&self.source_dir) {
            return Err(DeployError::PermissionDenied {
                source_dir: self.source_dir.clone(),
            });
        }

        if !self.destination.exists() {
            self.install_fresh()?;
            return Ok(DeploymentOutcome::FreshInstalled);
        }

        let current = self.stored_version()?;
        let external = source::declared_version(&self.source_dir, current)?;
        if external == current {
            tracing::debug!(store = %self.name, version = current, "store already at declared version");
            return Ok(DeploymentOutcome::NotNeeded);
        }

        self.migrate(current, external)?;
        Ok(DeploymentOutcome::Migrated {
            from: current,
            to: external,
        })
    }

    /// The destination does not exist yet; copy the payload in. The engine
    /// is deliberately not opened first, so the destination file is never
    /// created as a side effect of probing it.
    fn install_fresh(&self) -> Result<(), DeployError> {
        let payload = self.source_dir.join(&self.name);
        if payload.exists() {
            let mut reader = File::open(&payload).map_err(|source| DeployError::TransferFailed {
                destination: self.destination.clone(),
                source,
            })?;
            let written = transfer::copy_into(&mut reader, &self.destination)?;
            tracing::info!(
                store = %self.name,
                source = %payload.display(),
                bytes = written,
                "installed store from external source"
            );
            return Ok(());
        }

        match self.assets.open_payload(&self.name) {
            Ok(Some(mut reader)) => {
                let written = transfer::copy_into(reader.as_mut(), &self.destination)?;
                tracing::info!(store = %self.name, bytes = written, "installed store from bundled asset");
                Ok(())
            }
            Ok(None) => Err(DeployError::NoInstallSourceAvailable {
                name: self.name.clone(),
            }),
            Err(source) => Err(DeployError::TransferFailed {
                destination: self.destination.clone(),
                source,
            }),
        }
    }

    /// Read the stored version through a short-lived read-only handle.
    fn stored_version(&self) -> Result<i64, DeployError> {
        let mut handle = self
            .engine
            .open(&self.destination, OpenMode::ReadOnly)
            .map_err(DeployError::Store)?;
        match handle.version() {
            Ok(version) => {
                handle.close().map_err(DeployError::Store)?;
                Ok(version)
            }
            Err(err) => {
                close_quietly(handle, &self.destination);
                Err(DeployError::Store(err))
            }
        }
    }

    /// Stored and declared versions differ: script, hooks, stamp, in that
    /// order. Hooks observe the post-script, pre-stamp state.
    fn migrate(&mut self, current: i64, external: i64) -> Result<(), DeployError> {
        let payload = self.source_dir.join(&self.name);
        let script = source::update_script(&self.source_dir, &self.name, external);

        if script.is_none() && !payload.exists() {
            return Err(DeployError::NoMigrationPathAvailable {
                from: current,
                to: external,
            });
        }

        if let Some(script) = script {
            self.run_script(&script, external)?;
            tracing::info!(store = %self.name, version = external, "update script applied");
        }

        if payload.exists() {
            self.reconcile(&payload, current, external)?;
        }

        self.stamp_version(external)?;
        tracing::info!(
            store = %self.name,
            from = current,
            to = external,
            "store migrated to externally declared version"
        );
        Ok(())
    }

    fn run_script(&self, script: &str, target: i64) -> Result<(), DeployError> {
        let mut handle = self
            .engine
            .open(&self.destination, OpenMode::ReadWrite)
            .map_err(DeployError::Store)?;
        match apply_in_transaction(handle.as_mut(), |handle| handle.execute(script)) {
            Ok(()) => handle.close().map_err(DeployError::Store),
            Err(source) => {
                close_quietly(handle, &self.destination);
                Err(DeployError::MigrationScriptFailed {
                    version: target,
                    source,
                })
            }
        }
    }

    /// Open the live store and the replacement payload read-only and
    /// dispatch the matching hook. Both handles are released afterwards no
    /// matter what the hook did; a hook error surfaces only after cleanup.
    fn reconcile(&mut self, payload: &Path, current: i64, external: i64) -> Result<(), DeployError> {
        let mut live = self
            .engine
            .open(&self.destination, OpenMode::ReadOnly)
            .map_err(DeployError::Store)?;
        let mut remote = match self.engine.open(payload, OpenMode::ReadOnly) {
            Ok(handle) => handle,
            Err(source) => {
                close_quietly(live, &self.destination);
                return Err(DeployError::CorruptExternalSource {
                    path: payload.to_path_buf(),
                    source,
                });
            }
        };

        let hook_result = if current < external {
            self.hooks
                .on_upgrade_externally(live.as_mut(), remote.as_mut(), payload, current, external)
        } else {
            self.hooks
                .on_downgrade_externally(live.as_mut(), remote.as_mut(), payload, current, external)
        };

        close_quietly(remote, payload);
        close_quietly(live, &self.destination);

        hook_result.map_err(|source| DeployError::ReconciliationHookFailed {
            from: current,
            to: external,
            source,
        })
    }

    fn stamp_version(&self, external: i64) -> Result<(), DeployError> {
        let mut handle = self
            .engine
            .open(&self.destination, OpenMode::ReadWrite)
            .map_err(DeployError::Store)?;
        match apply_in_transaction(handle.as_mut(), |handle| handle.set_version(external)) {
            Ok(()) => handle.close().map_err(DeployError::Store),
            Err(source) => {
                close_quietly(handle, &self.destination);
                Err(DeployError::Store(source))
            }
        }
    }
}

/// Run `op` inside a transaction on `handle`, rolling back on failure.
/// The original error wins over a rollback error, which is only logged.
fn apply_in_transaction(
    handle: &mut dyn StoreHandle,
    op: impl FnOnce(&mut dyn StoreHandle) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    handle.begin_transaction()?;
    match op(handle) {
        Ok(()) => handle.commit(),
        Err(err) => {
            if let Err(rollback_err) = handle.rollback() {
                tracing::error!(error = %rollback_err, "rollback failed after transaction error");
            }
            Err(err)
        }
    }
}

/// Close a handle on a path we are abandoning; a close failure must not
/// mask the error that got us here.
fn close_quietly(handle: Box<dyn StoreHandle>, path: &Path) {
    if let Err(err) = handle.close() {
        tracing::error!(path = %path.display(), error = %err, "failed to close store handle");
    }
}
