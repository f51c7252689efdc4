//! Host-side manifest parsing with `aapt dump badging`

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::Regex;
use sideload_errors::{Error, PlatformError};
use sideload_types::IconBitmap;
use tracing::{debug, warn};

use crate::manifest::{IconResource, ManifestParser, ParsedManifest};
use crate::process::PlatformCommand;

/// Launcher icon density aapt reports when the resource is density-free
const ANYDPI_DENSITY: u32 = 65534;
/// Adaptive icons are 108dp square
const ADAPTIVE_ICON_DP: u32 = 108;
const BASELINE_DPI: u32 = 160;

#[derive(Debug, Clone)]
pub struct AaptManifestParser {
    aapt_path: PathBuf,
}

impl AaptManifestParser {
    #[must_use]
    pub fn new(aapt_path: impl Into<PathBuf>) -> Self {
        Self {
            aapt_path: aapt_path.into(),
        }
    }
}

impl ManifestParser for AaptManifestParser {
    fn parse(&self, path: &Path) -> Result<ParsedManifest, Error> {
        let mut cmd = PlatformCommand::new(&self.aapt_path);
        cmd.args(["dump", "badging"]).arg(path);
        let output = cmd.output()?;
        if !output.success() {
            return Err(PlatformError::ManifestUnreadable {
                message: output.combined_message(),
            }
            .into());
        }

        let badging = parse_badging(&output.stdout_str())?;
        let icon = badging
            .icon
            .as_ref()
            .and_then(|(entry, density)| load_icon(path, entry, *density));

        debug!(
            package_id = %badging.package_id,
            has_icon = icon.is_some(),
            "parsed package manifest"
        );
        Ok(ParsedManifest {
            package_id: badging.package_id,
            label: badging.label,
            version_name: badging.version_name,
            icon,
        })
    }
}

/// Fields of interest from `aapt dump badging`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badging {
    pub package_id: String,
    pub version_name: Option<String>,
    pub label: Option<String>,
    /// Icon entry path inside the APK and the density it was declared for
    pub icon: Option<(String, u32)>,
}

fn compile(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern).map_err(|e| Error::internal(format!("failed to compile regex: {e}")))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse the textual badging dump
///
/// # Errors
///
/// Returns `ManifestUnreadable` if the dump has no package name.
pub fn parse_badging(dump: &str) -> Result<Badging, Error> {
    let package_line = compile(r"(?m)^package: (.*)$")?
        .captures(dump)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| PlatformError::ManifestUnreadable {
            message: "badging output has no package line".to_string(),
        })?;

    let package_id = compile(r"(?:^|\s)name='([^']*)'")?
        .captures(package_line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| non_empty(m.as_str()))
        .ok_or_else(|| PlatformError::ManifestUnreadable {
            message: "package name missing from manifest".to_string(),
        })?;

    let version_name = compile(r"versionName='([^']*)'")?
        .captures(package_line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| non_empty(m.as_str()));

    let label = compile(r"(?m)^application-label:'([^']*)'")?
        .captures(dump)
        .or(compile(r"(?m)^application: label='([^']*)'")?.captures(dump))
        .and_then(|caps| caps.get(1))
        .and_then(|m| non_empty(m.as_str()));

    let icon = best_icon(dump)?;

    Ok(Badging {
        package_id,
        version_name,
        label,
        icon,
    })
}

/// Highest-density concrete icon, then a density-free one, then the
/// `application:` default
fn best_icon(dump: &str) -> Result<Option<(String, u32)>, Error> {
    let mut best: Option<(String, u32)> = None;
    for caps in compile(r"(?m)^application-icon-(\d+):'([^']*)'")?.captures_iter(dump) {
        let (Some(density), Some(entry)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(density) = density.as_str().parse::<u32>() else {
            continue;
        };
        if entry.as_str().is_empty() {
            continue;
        }
        let rank = |d: u32| if d >= ANYDPI_DENSITY { 0 } else { d };
        if best.as_ref().is_none_or(|(_, current)| rank(density) > rank(*current)) {
            best = Some((entry.as_str().to_string(), density));
        }
    }
    if best.is_some() {
        return Ok(best);
    }

    Ok(compile(r"(?m)^application: .*icon='([^']*)'")?
        .captures(dump)
        .and_then(|caps| caps.get(1))
        .and_then(|m| non_empty(m.as_str()))
        .map(|entry| (entry, BASELINE_DPI)))
}

/// Intrinsic pixel size of an adaptive icon declared for `density`
#[must_use]
pub fn adaptive_icon_size(density: u32) -> i32 {
    let density = if density == 0 || density >= ANYDPI_DENSITY {
        BASELINE_DPI
    } else {
        density
    };
    i32::try_from(ADAPTIVE_ICON_DP * density / BASELINE_DPI).unwrap_or(i32::MAX)
}

fn load_icon(apk: &Path, entry: &str, density: u32) -> Option<IconResource> {
    if entry.ends_with(".xml") {
        let size = adaptive_icon_size(density);
        return Some(IconResource::Drawable {
            width: size,
            height: size,
        });
    }

    match read_raster_icon(apk, entry) {
        Ok(bitmap) => Some(IconResource::Raster(bitmap)),
        Err(message) => {
            warn!(entry, %message, "could not load package icon");
            None
        }
    }
}

fn read_raster_icon(apk: &Path, entry: &str) -> Result<IconBitmap, String> {
    let file = File::open(apk).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut bytes = Vec::new();
    archive
        .by_name(entry)
        .map_err(|e| e.to_string())?
        .read_to_end(&mut bytes)
        .map_err(|e| e.to_string())?;

    let image = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    IconBitmap::from_rgba(width, height, rgba.into_raw())
        .ok_or_else(|| format!("icon has invalid dimensions {width}x{height}"))
}
