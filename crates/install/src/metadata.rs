//! Package metadata extraction

use std::path::Path;
use std::sync::Arc;

use sideload_errors::{Error, InstallError, PlatformError, UserFacingError};
use sideload_platform::{IconResource, ManifestParser, ParsedManifest};
use sideload_types::{IconBitmap, PackageMetadata, UNKNOWN};
use tracing::debug;

/// Turns an extracted package into display metadata
#[derive(Clone)]
pub struct MetadataExtractor {
    parser: Arc<dyn ManifestParser>,
}

impl MetadataExtractor {
    #[must_use]
    pub fn new(parser: Arc<dyn ManifestParser>) -> Self {
        Self { parser }
    }

    /// Parse the package at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ManifestParseFailure` if the parser rejects the file or the
    /// manifest has no package id. A missing parser tool is reported as-is.
    pub fn extract(&self, path: &Path) -> Result<PackageMetadata, Error> {
        let parsed = self.parser.parse(path).map_err(|err| match err {
            Error::Platform(PlatformError::CommandNotFound { .. }) => err,
            other => parse_failure(path, other.user_message().into_owned()),
        })?;
        if parsed.package_id.trim().is_empty() {
            return Err(parse_failure(path, "manifest declares no package id".to_string()));
        }

        let meta = metadata_from_manifest(parsed);
        debug!(
            package_id = %meta.package_id,
            version = %meta.version_name,
            has_icon = meta.icon.is_some(),
            "extracted package metadata"
        );
        Ok(meta)
    }
}

fn parse_failure(path: &Path, message: String) -> Error {
    InstallError::ManifestParseFailure {
        path: path.display().to_string(),
        message,
    }
    .into()
}

/// Fill in placeholders for absent fields and rasterize the icon
#[must_use]
pub fn metadata_from_manifest(parsed: ParsedManifest) -> PackageMetadata {
    let label = non_blank(parsed.label).unwrap_or_else(|| UNKNOWN.to_string());
    let version = non_blank(parsed.version_name).unwrap_or_else(|| UNKNOWN.to_string());
    let meta = PackageMetadata::new(label, parsed.package_id, version);
    match parsed.icon {
        Some(icon) => meta.with_icon(rasterize(icon)),
        None => meta,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Render an icon resource to a bitmap.
///
/// Raster icons pass through. Vector and adaptive drawables are not drawn:
/// they become a fully transparent placeholder of their intrinsic size,
/// each side at least one pixel, so callers get the right dimensions but no
/// artwork.
#[must_use]
pub fn rasterize(icon: IconResource) -> IconBitmap {
    match icon {
        IconResource::Raster(bitmap) => bitmap,
        IconResource::Drawable { width, height } => {
            IconBitmap::transparent(canvas_side(width), canvas_side(height))
        }
    }
}

fn canvas_side(intrinsic: i32) -> u32 {
    u32::try_from(intrinsic).unwrap_or(0).max(1)
}
