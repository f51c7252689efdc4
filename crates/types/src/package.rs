//! Package metadata produced by the analysis path

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Placeholder used when the manifest omits a label or version name
pub const UNKNOWN: &str = "Unknown";

/// Display metadata of an installable package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub label: String,
    pub package_id: String,
    pub version_name: String,
    #[serde(skip)]
    pub icon: Option<IconBitmap>,
}

impl PackageMetadata {
    /// Create metadata without an icon
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        package_id: impl Into<String>,
        version_name: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            package_id: package_id.into(),
            version_name: version_name.into(),
            icon: None,
        }
    }

    /// Attach a rasterized icon
    #[must_use]
    pub fn with_icon(mut self, icon: IconBitmap) -> Self {
        self.icon = Some(icon);
        self
    }
}

/// Fixed-format RGBA8 bitmap
///
/// Pixels are stored row-major, four bytes per pixel. Width and height are
/// never zero. The pixel buffer is shared so cloning a state that carries an
/// icon stays cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconBitmap {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl IconBitmap {
    /// Wrap an RGBA8 buffer, returning `None` if the dimensions are zero or
    /// the buffer length does not match them.
    #[must_use]
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = u64::from(width) * u64::from(height) * 4;
        if width == 0 || height == 0 || pixels.len() as u64 != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// A fully transparent canvas, each dimension clamped to at least 1
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn transparent(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let len = (u64::from(width) * u64::from(height) * 4) as usize;
        Self {
            width,
            height,
            pixels: vec![0u8; len].into(),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}
