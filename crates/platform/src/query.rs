//! Installed-package lookup

use sideload_errors::Error;

/// Answers whether a package id is already present on the target
pub trait PackageQuery: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the target could not be queried. "Not installed"
    /// is `Ok(false)`, never an error.
    fn is_installed(&self, package_id: &str) -> Result<bool, Error>;
}
