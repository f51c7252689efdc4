//! Package manifest parsing

use std::path::Path;

use sideload_errors::Error;
use sideload_types::IconBitmap;

/// Launcher icon as found in the package, before rasterization
#[derive(Debug, Clone, PartialEq)]
pub enum IconResource {
    /// Already decoded bitmap
    Raster(IconBitmap),
    /// Vector or adaptive drawable; only its intrinsic size is known
    Drawable { width: i32, height: i32 },
}

/// Raw manifest fields; absent values are `None`, not placeholders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedManifest {
    pub package_id: String,
    pub label: Option<String>,
    pub version_name: Option<String>,
    pub icon: Option<IconResource>,
}

/// Reads package identity and presentation data from an installable file
pub trait ManifestParser: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the file is not a parseable package.
    fn parse(&self, path: &Path) -> Result<ParsedManifest, Error>;
}
