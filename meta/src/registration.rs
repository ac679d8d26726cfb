//! Static provider registration during BOOTSTRAPPING. The concrete
//! catalogs a deployment ingests — and their upstream/source/storage
//! process ids — are operational configuration, not something this core
//! hardcodes; `ProviderSpec` is the shape a deployment supplies at
//! startup.

use serde::Deserialize;

/// One entry of the provider manifest a `meta` process is launched with.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    pub provider_id: String,
    /// URN kind segment, e.g. `"cve"`.
    pub kind: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_permits")]
    pub default_permits: u32,
    /// URN source segment, e.g. `"nvd"`.
    pub source: String,
    /// Process id that answers `FetchBatch` for this provider.
    pub source_service: String,
    /// Process id that answers `StorageGet`/`StorageWrite` for this provider.
    pub storage_service: String,
}

fn default_permits() -> u32 {
    1
}

/// Parses a provider manifest from its JSON form (an array of
/// `ProviderSpec`). The manifest's location and loading mechanism are
/// deployment-specific and out of scope for this core; `main` reads it
/// from the path in `META_PROVIDERS_PATH`.
pub fn parse_manifest(json: &str) -> Result<Vec<ProviderSpec>, serde_json::Error> {
    serde_json::from_str(json)
}
