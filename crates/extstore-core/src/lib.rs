//! Provisioning and migration of a local, versioned relational-store file
//! from an operator-controlled external source.
//!
//! The authoritative copy of the data lives outside the application's
//! private storage — a shared or removable directory that an operator may
//! replace or accompany with incremental SQL patches between runs. On each
//! access the [`Deployer`] decides whether the local store must be
//! installed fresh, migrated in place, or left alone, and carries that out
//! under an atomicity and idempotence contract.
//!
//! The crate is backend-agnostic: the actual database layer is consumed
//! through the [`StoreEngine`]/[`StoreHandle`] contracts (see the
//! `extstore-sqlite` crate for the SQLite implementation), the packaged
//! fallback copy through [`AssetStore`], the host permission model through
//! [`SourceAccessPolicy`], and application-level merge logic through
//! [`ReconciliationHooks`].
//!
//! ```no_run
//! use extstore_core::{Deployer, OpenMode};
//! # use extstore_core::{NoBundledAssets, StoreEngine, StoreHandle, StoreError};
//! # use std::path::Path;
//! # struct Engine;
//! # impl StoreEngine for Engine {
//! #     fn open(&self, _: &Path, _: OpenMode) -> Result<Box<dyn StoreHandle>, StoreError> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut deployer = Deployer::builder(
//!     "contacts.db",
//!     "/mnt/shared/databases",
//!     "/var/lib/app/databases/contacts.db",
//!     Engine,
//! )
//! .build();
//!
//! let outcome = deployer.ensure_deployed()?;
//! let handle = deployer.open_live(OpenMode::ReadWrite)?;
//! # let _ = (outcome, handle);
//! # Ok(())
//! # }
//! ```

pub mod deploy;
pub mod error;
pub mod source;
pub mod store;
pub mod transfer;

pub use deploy::{Deployer, DeployerBuilder, DeploymentOutcome};
pub use error::{DeployError, StoreError};
pub use source::{declared_version, script_file_name, update_script, VERSION_INFO_FILE};
pub use store::{
    AllowAll, AssetStore, DirAssetStore, NoBundledAssets, NoHooks, OpenMode, ReconciliationHooks,
    SourceAccessPolicy, StoreEngine, StoreHandle,
};
pub use transfer::copy_into;
