//! Pre-install analysis of a selected source

use std::path::PathBuf;
use std::sync::Arc;

use sideload_archive::{extract_representative, ExtractedFrom, PackageSource};
use sideload_errors::{Error, InstallError};
use sideload_platform::{ManifestParser, PackageQuery};
use sideload_types::PackageMetadata;
use tracing::{debug, info, warn};

use crate::metadata::MetadataExtractor;

/// What the user is about to install
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub meta: PackageMetadata,
    /// The package id is already installed on the target
    pub is_update: bool,
    /// Which part of the source the metadata was read from
    pub origin: ExtractedFrom,
}

/// Extracts the representative package of a source and describes it
pub struct PackageAnalyzer {
    extractor: MetadataExtractor,
    query: Arc<dyn PackageQuery>,
    scratch_dir: PathBuf,
}

impl PackageAnalyzer {
    #[must_use]
    pub fn new(
        parser: Arc<dyn ManifestParser>,
        query: Arc<dyn PackageQuery>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor: MetadataExtractor::new(parser),
            query,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Analyse `source` on the calling thread.
    ///
    /// The extracted copy is deleted before this returns, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnreadable`, `NoInstallablePackageFound` or
    /// `ManifestParseFailure` depending on where analysis stopped.
    pub fn analyze_blocking(&self, source: &dyn PackageSource) -> Result<AnalysisReport, Error> {
        let extracted = extract_representative(source, &self.scratch_dir)?;
        let meta = self.extractor.extract(extracted.path())?;
        let origin = extracted.origin().clone();
        drop(extracted);

        // A target that cannot be queried is treated as a fresh install
        let is_update = match self.query.is_installed(&meta.package_id) {
            Ok(installed) => installed,
            Err(err) => {
                warn!(package_id = %meta.package_id, error = %err, "could not query installed packages");
                false
            }
        };

        info!(
            source = %source.display_name(),
            package_id = %meta.package_id,
            is_update,
            "analysed package"
        );
        Ok(AnalysisReport {
            meta,
            is_update,
            origin,
        })
    }

    /// Analyse `source` on a blocking worker.
    ///
    /// # Errors
    ///
    /// As [`Self::analyze_blocking`], plus `TaskError` if the worker panics.
    pub async fn analyze(
        self: &Arc<Self>,
        source: Arc<dyn PackageSource>,
    ) -> Result<AnalysisReport, Error> {
        let analyzer = Arc::clone(self);
        debug!(source = %source.display_name(), "starting analysis");
        tokio::task::spawn_blocking(move || analyzer.analyze_blocking(source.as_ref()))
            .await
            .map_err(|e| {
                Error::from(InstallError::TaskError {
                    message: e.to_string(),
                })
            })?
    }
}
