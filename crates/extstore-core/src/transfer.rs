//! All-or-nothing byte transfer into the destination store path.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use crate::error::DeployError;

/// Stream `reader` into a freshly created file at `destination`.
///
/// The destination's parent directory is created if missing. On any I/O
/// failure the partially written destination is removed before the error
/// is returned, so a half-copied file can never be mistaken for a valid
/// store on a later pass. Returns the number of bytes written.
///
/// # Errors
/// `TransferFailed` wrapping the underlying I/O error.
pub fn copy_into(reader: &mut dyn Read, destination: &Path) -> Result<u64, DeployError> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| DeployError::TransferFailed {
                destination: destination.to_path_buf(),
                source,
            })?;
        }
    }

    let written: io::Result<u64> = (|| {
        let mut file = File::create(destination)?;
        let written = io::copy(reader, &mut file)?;
        file.sync_all()?;
        Ok(written)
    })();

    match written {
        Ok(written) => Ok(written),
        Err(source) => {
            if let Err(cleanup) = fs::remove_file(destination) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::error!(
                        path = %destination.display(),
                        error = %cleanup,
                        "failed to remove partial destination after copy error"
                    );
                }
            }
            Err(DeployError::TransferFailed {
                destination: destination.to_path_buf(),
                source,
            })
        }
    }
}
