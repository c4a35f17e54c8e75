use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::ServeError;

/// Pre-flight check of the served directory. Only done once at startup;
/// the directory disappearing later shows up as 404s.
pub fn validate(directory: &Path) -> Result<(), ServeError> {
    let metadata = match fs::metadata(directory) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ServeError::DirectoryNotFound(directory.to_path_buf()));
        }
        Err(e) => {
            return Err(ServeError::DirectoryAccess {
                path: directory.to_path_buf(),
                source: e,
            });
        }
    };

    if !metadata.is_dir() {
        return Err(ServeError::NotADirectory(directory.to_path_buf()));
    }

    fs::read_dir(directory).map_err(|e| ServeError::DirectoryAccess {
        path: directory.to_path_buf(),
        source: e,
    })?;

    debug!("Validated served directory {:?}", directory);
    Ok(())
}
