use normalize_storage::LoaderFileFormat;
use std::collections::HashSet;

/// Immutable per-run descriptor of what the destination loader accepts
/// (`spec.md` §3). Constructing one with both preferred formats null is a
/// programming error -- at least one must be set.
#[derive(Clone, Debug)]
pub struct DestinationCapabilities {
    pub preferred_loader_file_format: Option<LoaderFileFormat>,
    pub preferred_staging_file_format: Option<LoaderFileFormat>,
    pub supported_loader_file_formats: HashSet<LoaderFileFormat>,
}

impl DestinationCapabilities {
    pub fn new(
        preferred_loader_file_format: Option<LoaderFileFormat>,
        preferred_staging_file_format: Option<LoaderFileFormat>,
        supported_loader_file_formats: HashSet<LoaderFileFormat>,
    ) -> Self {
        assert!(
            preferred_loader_file_format.is_some() || preferred_staging_file_format.is_some(),
            "DestinationCapabilities requires at least one preferred format",
        );
        Self { preferred_loader_file_format, preferred_staging_file_format, supported_loader_file_formats }
    }

    pub fn supports_parquet(&self) -> bool {
        self.supported_loader_file_formats.contains(&LoaderFileFormat::Parquet)
    }

    /// The write-format selection rule from `spec.md` §4.3 step 2, minus the
    /// parquet-passthrough special case (handled by the caller, which knows
    /// the input file's format).
    pub fn default_write_format(&self) -> LoaderFileFormat {
        self.preferred_loader_file_format
            .or(self.preferred_staging_file_format)
            .expect("invariant: at least one preferred format is set")
    }
}
